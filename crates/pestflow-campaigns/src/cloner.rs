//! Campaign cloning — duplicate a campaign's configuration under a fresh
//! identity, with run state reset and best-effort copies of the satellite
//! records.
//!
//! Identity rules: the clone's name must be unique within the company and
//! its code globally unique. A caller-requested code that collides is a hard
//! conflict (with suggestions); everything after identity resolution is a
//! soft cascade that degrades to a warning instead of failing the clone.

use chrono::Utc;
use tracing::warn;

use pestflow_core::error::{PestFlowError, Result};

use crate::campaign::{Campaign, CampaignStatus};
use crate::member::ContactListMember;
use crate::persistence::{CampaignDb, LandingPage};

/// Caller knobs for one clone.
#[derive(Debug, Clone, Default)]
pub struct CloneOptions {
    /// Requested clone name; defaults to "<source> (Copy)".
    pub name: Option<String>,
    /// Requested campaign code; derived from the clone name when absent.
    pub code: Option<String>,
    /// Copy list assignments and re-create members as fresh pending rows.
    pub copy_contact_lists: bool,
    /// Copy the landing page content.
    pub copy_landing_page: bool,
}

impl CloneOptions {
    pub fn full_copy() -> Self {
        Self {
            name: None,
            code: None,
            copy_contact_lists: true,
            copy_landing_page: true,
        }
    }
}

/// A successful clone plus any soft-cascade warnings.
#[derive(Debug, Clone)]
pub struct CloneOutcome {
    pub campaign: Campaign,
    pub warnings: Vec<String>,
}

/// Clone `source_id` within its company.
pub fn clone_campaign(
    db: &CampaignDb,
    source_id: &str,
    options: &CloneOptions,
) -> Result<CloneOutcome> {
    let source = db.get_campaign(source_id)?;

    let name = resolve_name(db, &source, options.name.as_deref())?;
    let code = resolve_code(db, &name, options.code.as_deref())?;

    let mut clone = Campaign::new(&source.company_id, &name, &code);
    clone.description = source.description.clone();
    clone.batch_size = source.batch_size;
    clone.batch_interval_minutes = source.batch_interval_minutes;
    clone.daily_limit = source.daily_limit;
    clone.respect_business_hours = source.respect_business_hours;
    clone.exclude_weekends = source.exclude_weekends;
    clone.start_datetime = source.start_datetime;
    clone.end_datetime = source.end_datetime;
    // Run state stays at the Campaign::new draft defaults.
    debug_assert_eq!(clone.status, CampaignStatus::Draft);

    db.save_campaign(&clone)?;

    let mut warnings = Vec::new();
    if options.copy_landing_page {
        if let Err(e) = copy_landing_page(db, source_id, &clone.id) {
            warn!(source_id, clone_id = %clone.id, error = %e, "landing page copy failed");
            warnings.push(format!("Failed to copy landing page: {e}"));
        }
    }
    if options.copy_contact_lists {
        if let Err(e) = copy_contact_lists(db, source_id, &clone.id) {
            warn!(source_id, clone_id = %clone.id, error = %e, "contact list copy failed");
            warnings.push(format!("Failed to copy contact lists: {e}"));
        }
    }

    // Totals reflect whatever the cascade actually created.
    let clone = db.get_campaign(&clone.id)?;
    Ok(CloneOutcome { campaign: clone, warnings })
}

/// Pick a unique clone name: the requested (or "<source> (Copy)") base,
/// then "<base> 2" … "<base> 100", then a timestamp suffix.
fn resolve_name(db: &CampaignDb, source: &Campaign, requested: Option<&str>) -> Result<String> {
    let base = match requested {
        Some(name) => name.to_string(),
        None => format!("{} (Copy)", source.name),
    };
    if !db.name_exists(&source.company_id, &base)? {
        return Ok(base);
    }
    for n in 2..=100u32 {
        let candidate = format!("{base} {n}");
        if !db.name_exists(&source.company_id, &candidate)? {
            return Ok(candidate);
        }
    }
    Ok(format!("{base} {}", millis_suffix()))
}

/// Resolve the clone's code. A requested code that already exists is a hard
/// conflict; a derived code gets a fresh suffix per attempt.
fn resolve_code(db: &CampaignDb, name: &str, requested: Option<&str>) -> Result<String> {
    if let Some(code) = requested {
        if db.code_exists(code)? {
            return Err(PestFlowError::Conflict {
                message: format!("campaign code {code} already exists"),
                suggestions: vec![
                    format!("{code}_COPY"),
                    format!("{code}_{}", millis_suffix()),
                ],
            });
        }
        return Ok(code.to_string());
    }
    let base = derive_code_base(name);
    let millis = Utc::now().timestamp_millis();
    // Bump the suffix per attempt so same-millisecond clones still diverge.
    for attempt in 0..100 {
        let candidate = format!("{base}_{:06}", (millis + attempt).rem_euclid(1_000_000));
        if !db.code_exists(&candidate)? {
            return Ok(candidate);
        }
    }
    Err(PestFlowError::conflict(
        format!("could not derive a unique code from {name}"),
        vec![format!("{base}_COPY")],
    ))
}

/// Uppercase alphanumeric prefix of the name, at most 15 characters.
fn derive_code_base(name: &str) -> String {
    let cleaned: String = name
        .to_uppercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(15)
        .collect();
    if cleaned.is_empty() {
        "CAMPAIGN".to_string()
    } else {
        cleaned
    }
}

fn millis_suffix() -> String {
    format!("{:06}", Utc::now().timestamp_millis().rem_euclid(1_000_000))
}

fn copy_landing_page(db: &CampaignDb, source_id: &str, clone_id: &str) -> Result<()> {
    if let Some(page) = db.get_landing_page(source_id)? {
        db.save_landing_page(&LandingPage {
            campaign_id: clone_id.to_string(),
            ..page
        })?;
    }
    Ok(())
}

/// Mirror list assignments and membership as fresh pending rows — the clone
/// starts with zero engagement and zero delivery history.
fn copy_contact_lists(db: &CampaignDb, source_id: &str, clone_id: &str) -> Result<()> {
    let lifecycle = db.lifecycle();
    for list_id in db.assigned_lists(source_id)? {
        db.assign_list(clone_id, &list_id)?;
    }
    for member in lifecycle.members_of_campaign(source_id)? {
        lifecycle.add_pending(&ContactListMember::pending(
            &member.contact_list_id,
            &member.customer_id,
            Some(clone_id),
        ))?;
    }
    lifecycle.recount_total_contacts(clone_id)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::LifecycleStore;
    use crate::member::{MemberStatus, Outcome};

    fn db_with_source() -> (CampaignDb, Campaign) {
        let db = CampaignDb::open_in_memory().unwrap();
        let mut campaign = Campaign::new("co-1", "Spring Promo", "SPRING24");
        campaign.batch_size = 25;
        campaign.daily_limit = 80;
        campaign.description = Some("Quarterly push".into());
        db.save_campaign(&campaign).unwrap();
        (db, campaign)
    }

    fn seed_members(store: &LifecycleStore, campaign_id: &str, count: usize) {
        for i in 0..count {
            store
                .add_pending(&ContactListMember::pending(
                    "list-1",
                    &format!("cust-{i}"),
                    Some(campaign_id),
                ))
                .unwrap();
        }
    }

    #[test]
    fn test_clone_copies_config_resets_run_state() {
        let (db, source) = db_with_source();
        let mut running = source.clone();
        running.status = CampaignStatus::Running;
        running.processed_contacts = 40;
        running.successful_contacts = 38;
        running.failed_contacts = 2;
        running.current_batch = 3;
        db.save_campaign(&running).unwrap();

        let outcome = clone_campaign(&db, &source.id, &CloneOptions::default()).unwrap();
        let clone = outcome.campaign;
        assert_eq!(clone.name, "Spring Promo (Copy)");
        assert_ne!(clone.id, source.id);
        assert_ne!(clone.code, source.code);
        assert_eq!(clone.batch_size, 25);
        assert_eq!(clone.daily_limit, 80);
        assert_eq!(clone.description.as_deref(), Some("Quarterly push"));
        assert_eq!(clone.status, CampaignStatus::Draft);
        assert_eq!(clone.processed_contacts, 0);
        assert_eq!(clone.current_batch, 0);
        assert!(outcome.warnings.is_empty());
    }

    #[test]
    fn test_name_collision_appends_counter() {
        let (db, source) = db_with_source();
        let first = clone_campaign(&db, &source.id, &CloneOptions::default()).unwrap();
        assert_eq!(first.campaign.name, "Spring Promo (Copy)");
        let second = clone_campaign(&db, &source.id, &CloneOptions::default()).unwrap();
        assert_eq!(second.campaign.name, "Spring Promo (Copy) 2");
        let third = clone_campaign(&db, &source.id, &CloneOptions::default()).unwrap();
        assert_eq!(third.campaign.name, "Spring Promo (Copy) 3");
    }

    #[test]
    fn test_requested_code_conflict_suggests_alternatives() {
        let (db, source) = db_with_source();
        let options = CloneOptions {
            code: Some("SPRING24".into()),
            ..CloneOptions::default()
        };
        match clone_campaign(&db, &source.id, &options) {
            Err(PestFlowError::Conflict { suggestions, .. }) => {
                assert_eq!(suggestions[0], "SPRING24_COPY");
                assert!(suggestions[1].starts_with("SPRING24_"));
            }
            other => panic!("expected Conflict, got {other:?}"),
        }
    }

    #[test]
    fn test_derived_code_shape() {
        assert_eq!(derive_code_base("Spring Promo (Copy)"), "SPRINGPROMOCOPY");
        assert_eq!(derive_code_base("Summer Sale — big! 2024"), "SUMMERSALEBIG20");
        assert_eq!(derive_code_base("!!!"), "CAMPAIGN");
        let (db, source) = db_with_source();
        let outcome = clone_campaign(&db, &source.id, &CloneOptions::default()).unwrap();
        let code = &outcome.campaign.code;
        assert!(code.starts_with("SPRINGPROMOCOPY_"), "unexpected code {code}");
        assert!(db.code_exists(code).unwrap());
    }

    #[test]
    fn test_contact_lists_copied_as_fresh_pending() {
        let (db, source) = db_with_source();
        let lifecycle = db.lifecycle();
        db.assign_list(&source.id, "list-1").unwrap();
        seed_members(&lifecycle, &source.id, 3);
        lifecycle.recount_total_contacts(&source.id).unwrap();

        // Give the source some history the clone must not inherit.
        let claimed = lifecycle.claim_batch(&source.id, 2).unwrap();
        lifecycle
            .mark_outcome(&claimed[0].id, Outcome::Processed, None, Utc::now())
            .unwrap();
        lifecycle
            .record_view(&claimed[0].id, "sess", Utc::now())
            .unwrap();

        let outcome = clone_campaign(&db, &source.id, &CloneOptions::full_copy()).unwrap();
        assert!(outcome.warnings.is_empty());
        let clone = outcome.campaign;
        assert_eq!(db.assigned_lists(&clone.id).unwrap(), vec!["list-1"]);
        assert_eq!(clone.total_contacts, 3);

        let members = lifecycle.members_of_campaign(&clone.id).unwrap();
        assert_eq!(members.len(), 3);
        for member in members {
            assert_eq!(member.status, MemberStatus::Pending);
            assert_eq!(member.view_count, 0);
            assert!(member.redeemed_at.is_none());
        }
        // Source untouched.
        let source_counts = lifecycle.count_by_status(&source.id).unwrap();
        assert_eq!(source_counts.get(&MemberStatus::Processed), Some(&1));
    }

    #[test]
    fn test_landing_page_copied() {
        let (db, source) = db_with_source();
        db.save_landing_page(&LandingPage {
            campaign_id: source.id.clone(),
            headline: "Save 20%".into(),
            body: "Spring special".into(),
            cta_label: "Book now".into(),
            theme: "green".into(),
        })
        .unwrap();

        let outcome = clone_campaign(&db, &source.id, &CloneOptions::full_copy()).unwrap();
        let page = db.get_landing_page(&outcome.campaign.id).unwrap().unwrap();
        assert_eq!(page.headline, "Save 20%");
        assert_eq!(page.campaign_id, outcome.campaign.id);
    }

    #[test]
    fn test_missing_source_is_not_found() {
        let (db, _source) = db_with_source();
        assert!(matches!(
            clone_campaign(&db, "ghost", &CloneOptions::default()),
            Err(PestFlowError::NotFound(_))
        ));
    }
}
