//! Distribution engine — drives running campaigns batch by batch.
//! Uses tokio::interval for the sweep loop (sleeps between checks); every
//! decision inside a tick takes an explicit `now` so tests never sleep.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use pestflow_core::config::DistributorConfig;
use pestflow_core::error::{PestFlowError, Result};
use pestflow_core::traits::{SettingsStore, Transport};
use pestflow_core::types::CampaignMessage;

use crate::campaign::{Campaign, CampaignStatus};
use crate::hours;
use crate::member::{ContactListMember, Outcome};
use crate::persistence::CampaignDb;

/// Why a tick sent nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Campaign is not in `running` state.
    NotRunning,
    /// Another tick for this campaign is still in flight.
    AlreadyTicking,
    /// `start_datetime` is in the future.
    NotStarted,
    /// Daily send budget exhausted.
    DailyLimitReached,
    /// Outside the company's business-hours window.
    OutsideBusinessHours,
    /// Company-local weekend with `exclude_weekends` set.
    Weekend,
    /// `batch_interval_minutes` has not elapsed since the last batch.
    BatchIntervalNotElapsed,
    /// Nothing pending, but earlier claims are still unresolved.
    NoPendingContacts,
}

/// Outcome of one `tick` call.
#[derive(Debug, Clone)]
pub struct TickReport {
    pub campaign_id: String,
    pub claimed: u32,
    pub sent: u32,
    pub failed: u32,
    pub skipped: Option<SkipReason>,
    /// Set when this tick transitioned the campaign to `completed`.
    pub completed: bool,
}

impl TickReport {
    fn skipped(campaign_id: &str, reason: SkipReason) -> Self {
        Self {
            campaign_id: campaign_id.to_string(),
            claimed: 0,
            sent: 0,
            failed: 0,
            skipped: Some(reason),
            completed: false,
        }
    }
}

/// Ticks campaigns: gates on schedule windows and budgets, claims a batch,
/// hands each member to the transport, and records outcomes.
pub struct DistributionEngine {
    db: CampaignDb,
    transport: Arc<dyn Transport>,
    settings: Arc<dyn SettingsStore>,
    config: DistributorConfig,
    /// Campaign-level lease: ids with a tick currently in flight.
    in_flight: Mutex<HashSet<String>>,
}

impl DistributionEngine {
    pub fn new(
        db: CampaignDb,
        transport: Arc<dyn Transport>,
        settings: Arc<dyn SettingsStore>,
        config: DistributorConfig,
    ) -> Self {
        Self {
            db,
            transport,
            settings,
            config,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Run one tick for a campaign at an explicit instant.
    ///
    /// Holds a per-campaign lease for the duration, so an overlapping tick
    /// (slow transport, aggressive trigger) no-ops instead of racing.
    pub async fn tick(&self, campaign_id: &str, now: DateTime<Utc>) -> Result<TickReport> {
        {
            let mut in_flight = self.lease();
            if !in_flight.insert(campaign_id.to_string()) {
                debug!(campaign_id, "tick already in flight, skipping");
                return Ok(TickReport::skipped(campaign_id, SkipReason::AlreadyTicking));
            }
        }
        let report = self.tick_inner(campaign_id, now).await;
        self.lease().remove(campaign_id);
        report
    }

    async fn tick_inner(&self, campaign_id: &str, now: DateTime<Utc>) -> Result<TickReport> {
        let mut campaign = self.db.get_campaign(campaign_id)?;
        if campaign.status != CampaignStatus::Running {
            return Ok(TickReport::skipped(campaign_id, SkipReason::NotRunning));
        }
        if let Some(start) = campaign.start_datetime
            && now < start
        {
            return Ok(TickReport::skipped(campaign_id, SkipReason::NotStarted));
        }
        if let Some(end) = campaign.end_datetime
            && now > end
        {
            info!(campaign_id, "send window over, completing campaign");
            self.db
                .transition_campaign(campaign_id, CampaignStatus::Completed)?;
            let mut report = TickReport::skipped(campaign_id, SkipReason::NotRunning);
            report.skipped = None;
            report.completed = true;
            return Ok(report);
        }

        let settings = self.settings.business_hours(&campaign.company_id).await?;

        // New company-local day: reset the daily counter before budgeting.
        let today = now.with_timezone(&settings.tz()).date_naive();
        if campaign.current_day_date != Some(today) {
            self.db.reset_daily_counter(campaign_id, today)?;
            campaign.contacts_sent_today = 0;
            campaign.current_day_date = Some(today);
        }

        let remaining_today = campaign.daily_limit.saturating_sub(campaign.contacts_sent_today);
        if remaining_today == 0 {
            debug!(campaign_id, "daily limit reached");
            return Ok(TickReport::skipped(campaign_id, SkipReason::DailyLimitReached));
        }

        if campaign.respect_business_hours && !hours::is_business_hours(&settings, now) {
            let slot = hours::next_business_hour_slot(&settings, now);
            if slot.indeterminate {
                warn!(
                    campaign_id,
                    "no business-hours slot within the search horizon, campaign stays running"
                );
            } else {
                debug!(campaign_id, next_slot = %slot.at, "outside business hours");
            }
            return Ok(TickReport::skipped(
                campaign_id,
                SkipReason::OutsideBusinessHours,
            ));
        }

        if campaign.exclude_weekends && hours::is_weekend(&settings, now) {
            return Ok(TickReport::skipped(campaign_id, SkipReason::Weekend));
        }

        if let Some(last) = campaign.last_batch_sent_at
            && now - last < chrono::Duration::minutes(campaign.batch_interval_minutes)
        {
            return Ok(TickReport::skipped(
                campaign_id,
                SkipReason::BatchIntervalNotElapsed,
            ));
        }

        let batch_limit = campaign.batch_size.min(remaining_today);
        let batch = self.db.lifecycle().claim_batch(campaign_id, batch_limit)?;
        if batch.is_empty() {
            if campaign.total_contacts == campaign.processed_contacts {
                info!(campaign_id, total = campaign.total_contacts, "campaign completed");
                self.db
                    .transition_campaign(campaign_id, CampaignStatus::Completed)?;
                let mut report = TickReport::skipped(campaign_id, SkipReason::NoPendingContacts);
                report.skipped = None;
                report.completed = true;
                return Ok(report);
            }
            return Ok(TickReport::skipped(campaign_id, SkipReason::NoPendingContacts));
        }

        info!(
            campaign_id,
            batch = campaign.current_batch + 1,
            size = batch.len(),
            "📬 sending batch"
        );

        let mut report = TickReport {
            campaign_id: campaign_id.to_string(),
            claimed: batch.len() as u32,
            sent: 0,
            failed: 0,
            skipped: None,
            completed: false,
        };
        for member in &batch {
            match self.deliver(&campaign, member).await {
                Ok(delivery_id) => {
                    self.db.record_send_outcome(
                        campaign_id,
                        &member.id,
                        Outcome::Processed,
                        None,
                        now,
                    )?;
                    report.sent += 1;
                    debug!(member_id = %member.id, delivery_id, "delivered");
                }
                Err(reason) => {
                    warn!(member_id = %member.id, reason, "delivery failed");
                    self.db.record_send_outcome(
                        campaign_id,
                        &member.id,
                        Outcome::Failed,
                        Some(&reason),
                        now,
                    )?;
                    report.failed += 1;
                }
            }
        }

        self.db.record_batch_sent(campaign_id, now)?;
        Ok(report)
    }

    /// One transport hand-off, bounded by the configured send timeout.
    /// Returns the provider delivery id, or the failure reason to record.
    async fn deliver(
        &self,
        campaign: &Campaign,
        member: &ContactListMember,
    ) -> std::result::Result<String, String> {
        let message = CampaignMessage {
            campaign_code: campaign.code.clone(),
            customer_id: member.customer_id.clone(),
            member_id: member.id.clone(),
            landing_url: format!(
                "{}/{}?m={}",
                self.config.landing_base_url.trim_end_matches('/'),
                campaign.code,
                member.id
            ),
        };
        let timeout = Duration::from_secs(self.config.send_timeout_secs);
        match tokio::time::timeout(timeout, self.transport.send(&message)).await {
            Ok(Ok(delivery_id)) => Ok(delivery_id),
            // Store the provider's opaque reason without the taxonomy prefix.
            Ok(Err(PestFlowError::Transport(reason))) => Err(reason),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err("timeout".to_string()),
        }
    }

    /// Tick every running campaign once.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<Vec<TickReport>> {
        let running = self.db.campaigns_with_status(CampaignStatus::Running)?;
        let mut reports = Vec::with_capacity(running.len());
        for campaign in running {
            match self.tick(&campaign.id, now).await {
                Ok(report) => reports.push(report),
                Err(e) => warn!(campaign_id = %campaign.id, error = %e, "tick failed"),
            }
        }
        Ok(reports)
    }

    fn lease(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Spawn the distribution loop as a background tokio task.
pub async fn spawn_distributor(engine: Arc<DistributionEngine>, check_interval_secs: u64) {
    info!("⏰ Distributor started (check every {}s)", check_interval_secs);

    let mut interval = tokio::time::interval(Duration::from_secs(check_interval_secs));

    loop {
        interval.tick().await;

        match engine.sweep(Utc::now()).await {
            Ok(reports) => {
                for report in reports.iter().filter(|r| r.claimed > 0) {
                    info!(
                        campaign_id = %report.campaign_id,
                        sent = report.sent,
                        failed = report.failed,
                        "batch done"
                    );
                }
            }
            Err(e) => warn!("⚠️ Sweep failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use pestflow_core::types::BusinessHoursSettings;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Transport stub: fails the listed customer ids, optionally stalls.
    struct StubTransport {
        fail_customers: Vec<String>,
        stall: Option<Duration>,
        calls: AtomicU32,
    }

    impl StubTransport {
        fn ok() -> Self {
            Self {
                fail_customers: Vec::new(),
                stall: None,
                calls: AtomicU32::new(0),
            }
        }

        fn failing(customers: &[&str]) -> Self {
            Self {
                fail_customers: customers.iter().map(|s| s.to_string()).collect(),
                stall: None,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl Transport for StubTransport {
        fn name(&self) -> &str {
            "stub"
        }

        async fn send(&self, message: &CampaignMessage) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(stall) = self.stall {
                tokio::time::sleep(stall).await;
            }
            if self.fail_customers.contains(&message.customer_id) {
                return Err(PestFlowError::transport("mailbox unavailable"));
            }
            Ok(format!("dlv-{}", message.member_id))
        }
    }

    struct FixedSettings(BusinessHoursSettings);

    #[async_trait]
    impl SettingsStore for FixedSettings {
        async fn business_hours(&self, _company_id: &str) -> Result<BusinessHoursSettings> {
            Ok(self.0.clone())
        }
    }

    fn ny(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        chrono_tz::America::New_York
            .with_ymd_and_hms(y, mo, d, h, mi, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    fn engine_with(
        transport: StubTransport,
        settings: BusinessHoursSettings,
        contacts: u32,
    ) -> (DistributionEngine, String) {
        let db = CampaignDb::open_in_memory().unwrap();
        let mut campaign = Campaign::new("co-1", "Spring Promo", "SPRING24");
        campaign.status = CampaignStatus::Running;
        db.save_campaign(&campaign).unwrap();
        let lifecycle = db.lifecycle();
        for i in 0..contacts {
            lifecycle
                .add_pending(&ContactListMember::pending(
                    "list-1",
                    &format!("cust-{i}"),
                    Some(&campaign.id),
                ))
                .unwrap();
        }
        lifecycle.recount_total_contacts(&campaign.id).unwrap();
        let engine = DistributionEngine::new(
            db,
            Arc::new(transport),
            Arc::new(FixedSettings(settings)),
            DistributorConfig::default(),
        );
        (engine, campaign.id)
    }

    fn relaxed() -> BusinessHoursSettings {
        BusinessHoursSettings {
            enforced: false,
            ..Default::default()
        }
    }

    // Monday 2024-03-04 11:00 New York, inside the default window.
    fn monday_late_morning() -> DateTime<Utc> {
        ny(2024, 3, 4, 11, 0)
    }

    #[tokio::test]
    async fn test_full_batch_sends_and_counts() {
        let (engine, id) = engine_with(StubTransport::ok(), relaxed(), 3);
        let report = engine.tick(&id, monday_late_morning()).await.unwrap();
        assert_eq!(report.claimed, 3);
        assert_eq!(report.sent, 3);
        assert_eq!(report.failed, 0);

        let campaign = engine.db.get_campaign(&id).unwrap();
        assert_eq!(campaign.processed_contacts, 3);
        assert_eq!(campaign.successful_contacts, 3);
        assert_eq!(campaign.contacts_sent_today, 3);
        assert_eq!(campaign.current_batch, 1);
        assert!(campaign.last_batch_sent_at.is_some());
        assert!(campaign.counters_consistent());
    }

    #[tokio::test]
    async fn test_transport_failure_mid_batch_continues() {
        let (engine, id) = engine_with(StubTransport::failing(&["cust-2"]), relaxed(), 5);
        let report = engine.tick(&id, monday_late_morning()).await.unwrap();
        assert_eq!(report.sent, 4);
        assert_eq!(report.failed, 1);

        let campaign = engine.db.get_campaign(&id).unwrap();
        assert_eq!(campaign.processed_contacts, 5);
        assert_eq!(campaign.successful_contacts, 4);
        assert_eq!(campaign.failed_contacts, 1);
        assert!(campaign.counters_consistent());

        let failed: Vec<_> = engine
            .db
            .lifecycle()
            .members_of_campaign(&id)
            .unwrap()
            .into_iter()
            .filter(|m| m.status == crate::member::MemberStatus::Failed)
            .collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].customer_id, "cust-2");
        assert_eq!(failed[0].error_message.as_deref(), Some("mailbox unavailable"));
    }

    #[tokio::test]
    async fn test_timeout_records_failed_member() {
        let (mut engine, id) = {
            let transport = StubTransport {
                fail_customers: Vec::new(),
                stall: Some(Duration::from_secs(5)),
                calls: AtomicU32::new(0),
            };
            engine_with(transport, relaxed(), 1)
        };
        engine.config.send_timeout_secs = 0;

        let report = engine.tick(&id, monday_late_morning()).await.unwrap();
        assert_eq!(report.failed, 1);
        let member = engine
            .db
            .lifecycle()
            .members_of_campaign(&id)
            .unwrap()
            .remove(0);
        assert_eq!(member.status, crate::member::MemberStatus::Failed);
        assert_eq!(member.error_message.as_deref(), Some("timeout"));
    }

    #[tokio::test]
    async fn test_daily_limit_and_reset() {
        let (engine, id) = engine_with(StubTransport::ok(), relaxed(), 10);
        let mut campaign = engine.db.get_campaign(&id).unwrap();
        campaign.daily_limit = 4;
        campaign.batch_size = 10;
        campaign.batch_interval_minutes = 0;
        engine.db.save_campaign(&campaign).unwrap();

        let monday = monday_late_morning();
        let report = engine.tick(&id, monday).await.unwrap();
        assert_eq!(report.sent, 4);

        // Budget exhausted for the rest of the day.
        let report = engine.tick(&id, monday + chrono::Duration::hours(1)).await.unwrap();
        assert_eq!(report.skipped, Some(SkipReason::DailyLimitReached));

        // Next company-local day: counter resets and sending resumes.
        let tuesday = ny(2024, 3, 5, 11, 0);
        let report = engine.tick(&id, tuesday).await.unwrap();
        assert_eq!(report.sent, 4);
        let campaign = engine.db.get_campaign(&id).unwrap();
        assert_eq!(campaign.contacts_sent_today, 4);
        assert_eq!(campaign.processed_contacts, 8);
    }

    #[tokio::test]
    async fn test_business_hours_gate() {
        let (engine, id) = engine_with(StubTransport::ok(), BusinessHoursSettings::default(), 2);
        // Monday 18:00 NY: after hours.
        let report = engine.tick(&id, ny(2024, 3, 4, 18, 0)).await.unwrap();
        assert_eq!(report.skipped, Some(SkipReason::OutsideBusinessHours));
        // Monday 11:00 NY: inside the window.
        let report = engine.tick(&id, monday_late_morning()).await.unwrap();
        assert_eq!(report.sent, 2);
    }

    #[tokio::test]
    async fn test_weekend_gate() {
        let (engine, id) = engine_with(StubTransport::ok(), relaxed(), 2);
        let mut campaign = engine.db.get_campaign(&id).unwrap();
        campaign.exclude_weekends = true;
        engine.db.save_campaign(&campaign).unwrap();

        // Saturday NY.
        let report = engine.tick(&id, ny(2024, 3, 9, 11, 0)).await.unwrap();
        assert_eq!(report.skipped, Some(SkipReason::Weekend));
    }

    #[tokio::test]
    async fn test_batch_interval_gate() {
        let (engine, id) = engine_with(StubTransport::ok(), relaxed(), 10);
        let mut campaign = engine.db.get_campaign(&id).unwrap();
        campaign.batch_size = 2;
        engine.db.save_campaign(&campaign).unwrap();

        let t0 = monday_late_morning();
        assert_eq!(engine.tick(&id, t0).await.unwrap().sent, 2);
        // 10 minutes later: interval (30m) not elapsed.
        let report = engine.tick(&id, t0 + chrono::Duration::minutes(10)).await.unwrap();
        assert_eq!(report.skipped, Some(SkipReason::BatchIntervalNotElapsed));
        // 30 minutes later: next batch goes out.
        let report = engine.tick(&id, t0 + chrono::Duration::minutes(30)).await.unwrap();
        assert_eq!(report.sent, 2);
        assert_eq!(engine.db.get_campaign(&id).unwrap().current_batch, 2);
    }

    #[tokio::test]
    async fn test_drained_campaign_completes() {
        let (engine, id) = engine_with(StubTransport::ok(), relaxed(), 2);
        let mut campaign = engine.db.get_campaign(&id).unwrap();
        campaign.batch_interval_minutes = 0;
        engine.db.save_campaign(&campaign).unwrap();

        let t0 = monday_late_morning();
        engine.tick(&id, t0).await.unwrap();
        let report = engine.tick(&id, t0 + chrono::Duration::minutes(1)).await.unwrap();
        assert!(report.completed);
        assert_eq!(
            engine.db.get_campaign(&id).unwrap().status,
            CampaignStatus::Completed
        );
        // A completed campaign no-ops from then on.
        let report = engine.tick(&id, t0 + chrono::Duration::minutes(2)).await.unwrap();
        assert_eq!(report.skipped, Some(SkipReason::NotRunning));
    }

    #[tokio::test]
    async fn test_empty_campaign_completes_immediately() {
        let (engine, id) = engine_with(StubTransport::ok(), relaxed(), 0);
        let report = engine.tick(&id, monday_late_morning()).await.unwrap();
        assert!(report.completed);
    }

    #[tokio::test]
    async fn test_paused_campaign_noop() {
        let (engine, id) = engine_with(StubTransport::ok(), relaxed(), 2);
        engine
            .db
            .transition_campaign(&id, CampaignStatus::Paused)
            .unwrap();
        let report = engine.tick(&id, monday_late_morning()).await.unwrap();
        assert_eq!(report.skipped, Some(SkipReason::NotRunning));
        // Members untouched.
        let counts = engine.db.lifecycle().count_by_status(&id).unwrap();
        assert_eq!(counts.get(&crate::member::MemberStatus::Pending), Some(&2));
    }

    #[tokio::test]
    async fn test_schedule_window_bounds() {
        let (engine, id) = engine_with(StubTransport::ok(), relaxed(), 2);
        let t0 = monday_late_morning();
        let mut campaign = engine.db.get_campaign(&id).unwrap();
        campaign.start_datetime = Some(t0 + chrono::Duration::hours(2));
        engine.db.save_campaign(&campaign).unwrap();

        let report = engine.tick(&id, t0).await.unwrap();
        assert_eq!(report.skipped, Some(SkipReason::NotStarted));

        // Past the end: the campaign closes out without sending.
        campaign.start_datetime = None;
        campaign.end_datetime = Some(t0 - chrono::Duration::hours(1));
        engine.db.save_campaign(&campaign).unwrap();
        let report = engine.tick(&id, t0).await.unwrap();
        assert!(report.completed);
        assert_eq!(
            engine.db.get_campaign(&id).unwrap().status,
            CampaignStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_lease_excludes_overlapping_tick() {
        let (engine, id) = engine_with(StubTransport::ok(), relaxed(), 2);
        engine.lease().insert(id.clone());
        let report = engine.tick(&id, monday_late_morning()).await.unwrap();
        assert_eq!(report.skipped, Some(SkipReason::AlreadyTicking));
        engine.lease().remove(&id);
        // Lease released: tick proceeds.
        let report = engine.tick(&id, monday_late_morning()).await.unwrap();
        assert_eq!(report.sent, 2);
    }
}
