//! SQLite-backed persistence for campaigns and their child resources.
//! One connection behind a mutex; every claim/counter mutation happens as a
//! single guarded statement or transaction under that lock.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use pestflow_core::error::{PestFlowError, Result};

use crate::campaign::{Campaign, CampaignStatus};
use crate::lifecycle::LifecycleStore;
use crate::member::Outcome;
use crate::settings::CompanySettingsStore;

/// Campaign database handle. Cheap to clone; all clones share one connection.
#[derive(Clone)]
pub struct CampaignDb {
    conn: Arc<Mutex<Connection>>,
}

impl CampaignDb {
    /// Open or create the campaigns database.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(PestFlowError::db)?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.migrate()?;
        Ok(db)
    }

    /// In-memory database, used by tests and throwaway runs.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(PestFlowError::db)?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.migrate()?;
        Ok(db)
    }

    /// Lifecycle store sharing this connection.
    pub fn lifecycle(&self) -> LifecycleStore {
        LifecycleStore::new(self.conn.clone())
    }

    /// Company-settings store sharing this connection.
    pub fn settings(&self) -> CompanySettingsStore {
        CompanySettingsStore::new(self.conn.clone())
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Connection> {
        // A poisoned lock means a panic mid-statement; propagating the
        // poison here would just mask the original panic.
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Create tables.
    fn migrate(&self) -> Result<()> {
        self.lock()
            .execute_batch(
                "
            CREATE TABLE IF NOT EXISTS campaigns (
                id TEXT PRIMARY KEY,
                company_id TEXT NOT NULL,
                name TEXT NOT NULL,
                code TEXT NOT NULL UNIQUE,       -- external id, global
                description TEXT,
                batch_size INTEGER NOT NULL DEFAULT 50,
                batch_interval_minutes INTEGER NOT NULL DEFAULT 30,
                daily_limit INTEGER NOT NULL DEFAULT 200,
                respect_business_hours INTEGER NOT NULL DEFAULT 1,
                exclude_weekends INTEGER NOT NULL DEFAULT 0,
                start_datetime TEXT,
                end_datetime TEXT,
                status TEXT NOT NULL DEFAULT 'draft',
                total_contacts INTEGER NOT NULL DEFAULT 0,
                processed_contacts INTEGER NOT NULL DEFAULT 0,
                successful_contacts INTEGER NOT NULL DEFAULT 0,
                failed_contacts INTEGER NOT NULL DEFAULT 0,
                current_batch INTEGER NOT NULL DEFAULT 0,
                last_batch_sent_at TEXT,
                contacts_sent_today INTEGER NOT NULL DEFAULT 0,
                current_day_date TEXT,           -- company-local YYYY-MM-DD
                created_at TEXT NOT NULL
            );

            -- One row per contact x list x optional campaign. Insertion
            -- order (rowid) is the claim order.
            CREATE TABLE IF NOT EXISTS contact_list_members (
                id TEXT PRIMARY KEY,
                contact_list_id TEXT NOT NULL,
                customer_id TEXT NOT NULL,
                campaign_id TEXT,
                status TEXT NOT NULL DEFAULT 'pending',
                error_message TEXT,
                first_viewed_at TEXT,
                last_viewed_at TEXT,
                view_count INTEGER NOT NULL DEFAULT 0,
                view_session TEXT,               -- dedupe anchor session
                view_session_at TEXT,            -- last counted view
                redeemed_at TEXT,
                processed_at TEXT,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_members_claim
                ON contact_list_members (campaign_id, status);

            -- Contact-list assignment links.
            CREATE TABLE IF NOT EXISTS campaign_contact_lists (
                campaign_id TEXT NOT NULL,
                contact_list_id TEXT NOT NULL,
                PRIMARY KEY (campaign_id, contact_list_id)
            );

            CREATE TABLE IF NOT EXISTS campaign_landing_pages (
                campaign_id TEXT PRIMARY KEY,
                headline TEXT NOT NULL DEFAULT '',
                body TEXT NOT NULL DEFAULT '',
                cta_label TEXT NOT NULL DEFAULT '',
                theme TEXT NOT NULL DEFAULT 'default'
            );

            -- Per-company key/value settings (business hours, timezone).
            CREATE TABLE IF NOT EXISTS company_settings (
                company_id TEXT NOT NULL,
                setting_key TEXT NOT NULL,
                setting_value TEXT NOT NULL,
                PRIMARY KEY (company_id, setting_key)
            );
         ",
            )
            .map_err(PestFlowError::db)
    }

    // ─── Campaigns ──────────────────────────────────────

    /// Insert or update a campaign row.
    pub fn save_campaign(&self, campaign: &Campaign) -> Result<()> {
        self.lock()
            .execute(
                "INSERT OR REPLACE INTO campaigns
                 (id, company_id, name, code, description, batch_size, batch_interval_minutes,
                  daily_limit, respect_business_hours, exclude_weekends, start_datetime,
                  end_datetime, status, total_contacts, processed_contacts, successful_contacts,
                  failed_contacts, current_batch, last_batch_sent_at, contacts_sent_today,
                  current_day_date, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                         ?17, ?18, ?19, ?20, ?21, ?22)",
                rusqlite::params![
                    campaign.id,
                    campaign.company_id,
                    campaign.name,
                    campaign.code,
                    campaign.description,
                    campaign.batch_size,
                    campaign.batch_interval_minutes,
                    campaign.daily_limit,
                    campaign.respect_business_hours as i32,
                    campaign.exclude_weekends as i32,
                    campaign.start_datetime.map(|t| t.to_rfc3339()),
                    campaign.end_datetime.map(|t| t.to_rfc3339()),
                    campaign.status.as_str(),
                    campaign.total_contacts,
                    campaign.processed_contacts,
                    campaign.successful_contacts,
                    campaign.failed_contacts,
                    campaign.current_batch,
                    campaign.last_batch_sent_at.map(|t| t.to_rfc3339()),
                    campaign.contacts_sent_today,
                    campaign.current_day_date.map(|d| d.to_string()),
                    campaign.created_at.to_rfc3339(),
                ],
            )
            .map_err(PestFlowError::db)?;
        Ok(())
    }

    /// Load a campaign by internal id.
    pub fn get_campaign(&self, id: &str) -> Result<Campaign> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {CAMPAIGN_COLUMNS} FROM campaigns WHERE id = ?1"
            ))
            .map_err(PestFlowError::db)?;
        let mut rows = stmt
            .query_map([id], campaign_from_row)
            .map_err(PestFlowError::db)?;
        match rows.next() {
            Some(row) => row.map_err(PestFlowError::db),
            None => Err(PestFlowError::not_found(format!("campaign {id}"))),
        }
    }

    /// All campaigns currently in `status`, oldest first.
    pub fn campaigns_with_status(&self, status: CampaignStatus) -> Result<Vec<Campaign>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {CAMPAIGN_COLUMNS} FROM campaigns WHERE status = ?1 ORDER BY created_at"
            ))
            .map_err(PestFlowError::db)?;
        let rows = stmt
            .query_map([status.as_str()], campaign_from_row)
            .map_err(PestFlowError::db)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(PestFlowError::db)
    }

    /// Whether a campaign name is taken inside a company.
    pub fn name_exists(&self, company_id: &str, name: &str) -> Result<bool> {
        self.lock()
            .query_row(
                "SELECT COUNT(*) FROM campaigns WHERE company_id = ?1 AND name = ?2",
                rusqlite::params![company_id, name],
                |row| row.get::<_, i64>(0),
            )
            .map(|n| n > 0)
            .map_err(PestFlowError::db)
    }

    /// Whether an external campaign code is taken anywhere (codes are global,
    /// not per-company).
    pub fn code_exists(&self, code: &str) -> Result<bool> {
        self.lock()
            .query_row(
                "SELECT COUNT(*) FROM campaigns WHERE code = ?1",
                [code],
                |row| row.get::<_, i64>(0),
            )
            .map(|n| n > 0)
            .map_err(PestFlowError::db)
    }

    /// Apply one member's send outcome and the campaign counters as a single
    /// atomic unit: member status flip (guarded on `processing`) plus
    /// processed/successful-or-failed/sent-today increments in one
    /// transaction, so no partial increment is ever visible.
    pub fn record_send_outcome(
        &self,
        campaign_id: &str,
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
        let mut conn = self.lock();
        let tx = conn.transaction().map_err(PestFlowError::db)?;

        let flipped = tx
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
        if flipped == 0 {
            return Err(PestFlowError::invalid_transition(format!(
                "member {member_id} is not processing"
            )));
        }

        let successful = matches!(outcome, Outcome::Processed) as i64;
        tx.execute(
            "UPDATE campaigns SET
                 processed_contacts = processed_contacts + 1,
                 successful_contacts = successful_contacts + ?1,
                 failed_contacts = failed_contacts + ?2,
                 contacts_sent_today = contacts_sent_today + 1
             WHERE id = ?3",
            rusqlite::params![successful, 1 - successful, campaign_id],
        )
        .map_err(PestFlowError::db)?;

        tx.commit().map_err(PestFlowError::db)
    }

    /// Reset the daily send counter for a new company-local day.
    pub fn reset_daily_counter(&self, campaign_id: &str, today: NaiveDate) -> Result<()> {
        self.lock()
            .execute(
                "UPDATE campaigns SET contacts_sent_today = 0, current_day_date = ?1 WHERE id = ?2",
                rusqlite::params![today.to_string(), campaign_id],
            )
            .map_err(PestFlowError::db)?;
        Ok(())
    }

    /// Advance the batch sequence after a sent batch.
    pub fn record_batch_sent(&self, campaign_id: &str, now: DateTime<Utc>) -> Result<()> {
        self.lock()
            .execute(
                "UPDATE campaigns SET current_batch = current_batch + 1, last_batch_sent_at = ?1
                 WHERE id = ?2",
                rusqlite::params![now.to_rfc3339(), campaign_id],
            )
            .map_err(PestFlowError::db)?;
        Ok(())
    }

    /// Flip a campaign's status, enforcing the state machine.
    pub fn transition_campaign(&self, campaign_id: &str, next: CampaignStatus) -> Result<Campaign> {
        let mut campaign = self.get_campaign(campaign_id)?;
        campaign.transition_to(next)?;
        self.save_campaign(&campaign)?;
        Ok(campaign)
    }

    // ─── Landing pages ──────────────────────────────────

    pub fn get_landing_page(&self, campaign_id: &str) -> Result<Option<LandingPage>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(
                "SELECT campaign_id, headline, body, cta_label, theme
                 FROM campaign_landing_pages WHERE campaign_id = ?1",
            )
            .map_err(PestFlowError::db)?;
        let mut rows = stmt
            .query_map([campaign_id], |row| {
                Ok(LandingPage {
                    campaign_id: row.get(0)?,
                    headline: row.get(1)?,
                    body: row.get(2)?,
                    cta_label: row.get(3)?,
                    theme: row.get(4)?,
                })
            })
            .map_err(PestFlowError::db)?;
        match rows.next() {
            Some(row) => row.map(Some).map_err(PestFlowError::db),
            None => Ok(None),
        }
    }

    pub fn save_landing_page(&self, page: &LandingPage) -> Result<()> {
        self.lock()
            .execute(
                "INSERT OR REPLACE INTO campaign_landing_pages
                 (campaign_id, headline, body, cta_label, theme)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    page.campaign_id,
                    page.headline,
                    page.body,
                    page.cta_label,
                    page.theme
                ],
            )
            .map_err(PestFlowError::db)?;
        Ok(())
    }

    // ─── Contact-list assignments ───────────────────────

    pub fn assigned_lists(&self, campaign_id: &str) -> Result<Vec<String>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(
                "SELECT contact_list_id FROM campaign_contact_lists
                 WHERE campaign_id = ?1 ORDER BY contact_list_id",
            )
            .map_err(PestFlowError::db)?;
        let rows = stmt
            .query_map([campaign_id], |row| row.get::<_, String>(0))
            .map_err(PestFlowError::db)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(PestFlowError::db)
    }

    pub fn assign_list(&self, campaign_id: &str, contact_list_id: &str) -> Result<()> {
        self.lock()
            .execute(
                "INSERT OR IGNORE INTO campaign_contact_lists (campaign_id, contact_list_id)
                 VALUES (?1, ?2)",
                rusqlite::params![campaign_id, contact_list_id],
            )
            .map_err(PestFlowError::db)?;
        Ok(())
    }
}

/// Campaign landing-page configuration (cloned alongside the campaign).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LandingPage {
    pub campaign_id: String,
    pub headline: String,
    pub body: String,
    pub cta_label: String,
    pub theme: String,
}

const CAMPAIGN_COLUMNS: &str = "id, company_id, name, code, description, batch_size, \
     batch_interval_minutes, daily_limit, respect_business_hours, exclude_weekends, \
     start_datetime, end_datetime, status, total_contacts, processed_contacts, \
     successful_contacts, failed_contacts, current_batch, last_batch_sent_at, \
     contacts_sent_today, current_day_date, created_at";

fn campaign_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Campaign> {
    let status_str: String = row.get(12)?;
    let start: Option<String> = row.get(10)?;
    let end: Option<String> = row.get(11)?;
    let last_batch: Option<String> = row.get(18)?;
    let day_date: Option<String> = row.get(20)?;
    let created_at_str: String = row.get(21)?;

    Ok(Campaign {
        id: row.get(0)?,
        company_id: row.get(1)?,
        name: row.get(2)?,
        code: row.get(3)?,
        description: row.get(4)?,
        batch_size: row.get(5)?,
        batch_interval_minutes: row.get(6)?,
        daily_limit: row.get(7)?,
        respect_business_hours: row.get::<_, i32>(8)? != 0,
        exclude_weekends: row.get::<_, i32>(9)? != 0,
        start_datetime: parse_ts(start),
        end_datetime: parse_ts(end),
        status: CampaignStatus::parse(&status_str).unwrap_or(CampaignStatus::Draft),
        total_contacts: row.get(13)?,
        processed_contacts: row.get(14)?,
        successful_contacts: row.get(15)?,
        failed_contacts: row.get(16)?,
        current_batch: row.get(17)?,
        last_batch_sent_at: parse_ts(last_batch),
        contacts_sent_today: row.get(19)?,
        current_day_date: day_date.and_then(|d| d.parse::<NaiveDate>().ok()),
        created_at: parse_ts(Some(created_at_str)).unwrap_or_else(Utc::now),
    })
}

pub(crate) fn parse_ts(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|t| t.with_timezone(&Utc))
}
