//! Contact lifecycle store — owns membership rows, the claim/outcome state
//! machine, and view/redemption counters.
//!
//! `claim_batch` is the one mutation that must exclude concurrent callers:
//! it runs as a single guarded UPDATE..RETURNING under the connection lock,
//! so two overlapping ticks can never claim the same member twice.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use rusqlite::Connection;

use pestflow_core::error::{PestFlowError, Result};

use crate::member::{ContactListMember, MemberStatus, Outcome};
use crate::persistence::parse_ts;

/// Same-session views inside this window count as a single view.
const VIEW_DEDUPE_WINDOW_MINUTES: i64 = 5;

/// Store handle; clones share the campaign DB connection.
#[derive(Clone)]
pub struct LifecycleStore {
    conn: Arc<Mutex<Connection>>,
}

impl LifecycleStore {
    pub(crate) fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert a fresh pending membership row.
    pub fn add_pending(&self, member: &ContactListMember) -> Result<()> {
        self.lock()
            .execute(
                "INSERT INTO contact_list_members
                 (id, contact_list_id, customer_id, campaign_id, status, error_message,
                  first_viewed_at, last_viewed_at, view_count, view_session, view_session_at,
                  redeemed_at, processed_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, NULL, NULL, ?10, ?11, ?12)",
                rusqlite::params![
                    member.id,
                    member.contact_list_id,
                    member.customer_id,
                    member.campaign_id,
                    member.status.as_str(),
                    member.error_message,
                    member.first_viewed_at.map(|t| t.to_rfc3339()),
                    member.last_viewed_at.map(|t| t.to_rfc3339()),
                    member.view_count,
                    member.redeemed_at.map(|t| t.to_rfc3339()),
                    member.processed_at.map(|t| t.to_rfc3339()),
                    member.created_at.to_rfc3339(),
                ],
            )
            .map_err(PestFlowError::db)?;
        Ok(())
    }

    /// Atomically claim up to `limit` pending members for a campaign,
    /// oldest-added first, flipping them to `processing`. Concurrent callers
    /// receive disjoint sets.
    pub fn claim_batch(&self, campaign_id: &str, limit: u32) -> Result<Vec<ContactListMember>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let conn = self.lock();
        let mut stmt = conn
            .prepare(&format!(
                "UPDATE contact_list_members SET status = 'processing'
                 WHERE id IN (
                     SELECT id FROM contact_list_members
                     WHERE campaign_id = ?1 AND status = 'pending'
                     ORDER BY rowid LIMIT ?2
                 )
                 RETURNING {MEMBER_COLUMNS}, rowid"
            ))
            .map_err(PestFlowError::db)?;
        let rows = stmt
            .query_map(rusqlite::params![campaign_id, limit as i64], |row| {
                Ok((row.get::<_, i64>(12)?, member_from_row(row)?))
            })
            .map_err(PestFlowError::db)?;
        let mut claimed = rows
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(PestFlowError::db)?;
        // RETURNING order is unspecified; restore insertion order.
        claimed.sort_by_key(|(rowid, _)| *rowid);
        Ok(claimed.into_iter().map(|(_, member)| member).collect())
    }

    /// Move a `processing` member to its terminal outcome. `failed` requires
    /// a non-empty error message.
    pub fn mark_outcome(
        &self,
        member_id: &str,
        outcome: Outcome,
        error_message: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if outcome == Outcome::Failed && error_message.map_or(true, str::is_empty) {
            return Err(PestFlowError::invalid_transition(format!(
                "member {member_id}: failed outcome requires an error message"
            )));
        }
        let conn = self.lock();
        let flipped = conn
            .execute(
                "UPDATE contact_list_members
                 SET status = ?1, error_message = ?2, processed_at = ?3
                 WHERE id = ?4 AND status = 'processing'",
                rusqlite::params![
                    outcome.status().as_str(),
                    error_message,
                    now.to_rfc3339(),
                    member_id
                ],
            )
            .map_err(PestFlowError::db)?;
        if flipped == 1 {
            return Ok(());
        }
        match member_status(&conn, member_id)? {
            Some(current) => Err(PestFlowError::invalid_transition(format!(
                "member {member_id} is {current}, not processing"
            ))),
            None => Err(PestFlowError::not_found(format!("member {member_id}"))),
        }
    }

    /// Record a landing-page view. Repeats from the same session within five
    /// minutes of the last counted view update `last_viewed_at` only; a view
    /// outside the window (or from another session) increments `view_count`
    /// and re-anchors the dedupe window. Returns whether the view counted.
    pub fn record_view(&self, member_id: &str, session: &str, at: DateTime<Utc>) -> Result<bool> {
        let conn = self.lock();
        let anchor = conn
            .query_row(
                "SELECT view_session, view_session_at FROM contact_list_members WHERE id = ?1",
                [member_id],
                |row| {
                    Ok((
                        row.get::<_, Option<String>>(0)?,
                        row.get::<_, Option<String>>(1)?,
                    ))
                },
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    PestFlowError::not_found(format!("member {member_id}"))
                }
                other => PestFlowError::db(other),
            })?;

        let duplicate = match (anchor.0, parse_ts(anchor.1)) {
            (Some(prev_session), Some(anchor_at)) => {
                prev_session == session
                    && at - anchor_at < Duration::minutes(VIEW_DEDUPE_WINDOW_MINUTES)
            }
            _ => false,
        };

        if duplicate {
            conn.execute(
                "UPDATE contact_list_members SET last_viewed_at = ?1 WHERE id = ?2",
                rusqlite::params![at.to_rfc3339(), member_id],
            )
            .map_err(PestFlowError::db)?;
        } else {
            conn.execute(
                "UPDATE contact_list_members SET
                     first_viewed_at = COALESCE(first_viewed_at, ?1),
                     last_viewed_at = ?1,
                     view_count = view_count + 1,
                     view_session = ?2,
                     view_session_at = ?1
                 WHERE id = ?3",
                rusqlite::params![at.to_rfc3339(), session, member_id],
            )
            .map_err(PestFlowError::db)?;
        }
        Ok(!duplicate)
    }

    /// Record a coupon redemption. Idempotent: a second call is a no-op, not
    /// an error, and the original timestamp survives.
    pub fn record_redemption(&self, member_id: &str, at: DateTime<Utc>) -> Result<()> {
        let conn = self.lock();
        let changed = conn
            .execute(
                "UPDATE contact_list_members SET redeemed_at = ?1
                 WHERE id = ?2 AND redeemed_at IS NULL",
                rusqlite::params![at.to_rfc3339(), member_id],
            )
            .map_err(PestFlowError::db)?;
        if changed == 1 {
            return Ok(());
        }
        if member_status(&conn, member_id)?.is_none() {
            return Err(PestFlowError::not_found(format!("member {member_id}")));
        }
        Ok(())
    }

    /// Member counts grouped by lifecycle status.
    pub fn count_by_status(&self, campaign_id: &str) -> Result<HashMap<MemberStatus, u32>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(
                "SELECT status, COUNT(*) FROM contact_list_members
                 WHERE campaign_id = ?1 GROUP BY status",
            )
            .map_err(PestFlowError::db)?;
        let rows = stmt
            .query_map([campaign_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })
            .map_err(PestFlowError::db)?;
        let mut counts = HashMap::new();
        for row in rows {
            let (status, count) = row.map_err(PestFlowError::db)?;
            if let Some(status) = MemberStatus::parse(&status) {
                counts.insert(status, count as u32);
            }
        }
        Ok(counts)
    }

    /// All membership rows for a campaign, insertion order.
    pub fn members_of_campaign(&self, campaign_id: &str) -> Result<Vec<ContactListMember>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {MEMBER_COLUMNS} FROM contact_list_members
                 WHERE campaign_id = ?1 ORDER BY rowid"
            ))
            .map_err(PestFlowError::db)?;
        let rows = stmt
            .query_map([campaign_id], member_from_row)
            .map_err(PestFlowError::db)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(PestFlowError::db)
    }

    /// Unique viewers and redemption count for a campaign.
    pub fn engagement_counts(&self, campaign_id: &str) -> Result<(u32, u32)> {
        self.lock()
            .query_row(
                "SELECT
                     COALESCE(SUM(view_count > 0), 0),
                     COALESCE(SUM(redeemed_at IS NOT NULL), 0)
                 FROM contact_list_members WHERE campaign_id = ?1",
                [campaign_id],
                |row| Ok((row.get::<_, i64>(0)? as u32, row.get::<_, i64>(1)? as u32)),
            )
            .map_err(PestFlowError::db)
    }

    /// Recompute `total_contacts` from the membership rows. The original
    /// system kept this in sync with a database trigger; here it is an
    /// explicit reconciliation run after membership writes.
    pub fn recount_total_contacts(&self, campaign_id: &str) -> Result<u32> {
        let conn = self.lock();
        let total: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM contact_list_members WHERE campaign_id = ?1",
                [campaign_id],
                |row| row.get(0),
            )
            .map_err(PestFlowError::db)?;
        conn.execute(
            "UPDATE campaigns SET total_contacts = ?1 WHERE id = ?2",
            rusqlite::params![total, campaign_id],
        )
        .map_err(PestFlowError::db)?;
        Ok(total as u32)
    }
}

fn member_status(conn: &Connection, member_id: &str) -> Result<Option<MemberStatus>> {
    let status = conn
        .query_row(
            "SELECT status FROM contact_list_members WHERE id = ?1",
            [member_id],
            |row| row.get::<_, String>(0),
        )
        .map(|s| MemberStatus::parse(&s));
    match status {
        Ok(s) => Ok(s),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(PestFlowError::db(e)),
    }
}

const MEMBER_COLUMNS: &str = "id, contact_list_id, customer_id, campaign_id, status, \
     error_message, first_viewed_at, last_viewed_at, view_count, redeemed_at, processed_at, \
     created_at";

fn member_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ContactListMember> {
    let status: String = row.get(4)?;
    Ok(ContactListMember {
        id: row.get(0)?,
        contact_list_id: row.get(1)?,
        customer_id: row.get(2)?,
        campaign_id: row.get(3)?,
        status: MemberStatus::parse(&status).unwrap_or(MemberStatus::Pending),
        error_message: row.get(5)?,
        first_viewed_at: parse_ts(row.get(6)?),
        last_viewed_at: parse_ts(row.get(7)?),
        view_count: row.get(8)?,
        redeemed_at: parse_ts(row.get(9)?),
        processed_at: parse_ts(row.get(10)?),
        created_at: parse_ts(row.get(11)?).unwrap_or_else(Utc::now),
    })
}
