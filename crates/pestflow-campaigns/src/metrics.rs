//! Metrics aggregation — one read-only snapshot combining campaign run
//! counters, member engagement, and provider delivery events.

use serde::Serialize;

use pestflow_core::error::Result;
use pestflow_core::traits::DeliveryEventLog;
use pestflow_core::types::DeliveryStats;

use crate::campaign::CampaignStatus;
use crate::persistence::CampaignDb;

/// Aggregated campaign snapshot. All rates are whole percentages rounded
/// half-up; every divide-by-zero case reports 0.
#[derive(Debug, Clone, Serialize)]
pub struct CampaignMetrics {
    pub campaign_id: String,
    pub campaign_code: String,
    pub status: CampaignStatus,

    pub total_contacts: u32,
    pub processed_contacts: u32,
    pub successful_contacts: u32,
    pub failed_contacts: u32,
    /// processed / total.
    pub progress_percentage: u32,
    /// successful / processed.
    pub success_rate: u32,

    pub unique_viewers: u32,
    pub redemptions: u32,
    /// redemptions / unique viewers.
    pub view_to_redemption_rate: u32,

    pub delivery: DeliveryStats,
    /// opened / delivered.
    pub open_rate: u32,
    /// clicked / delivered.
    pub click_rate: u32,
    /// bounced / sent.
    pub bounce_rate: u32,
    /// complained / delivered.
    pub complaint_rate: u32,
}

/// Build the full snapshot for one campaign.
pub async fn campaign_metrics(
    db: &CampaignDb,
    events: &dyn DeliveryEventLog,
    campaign_id: &str,
) -> Result<CampaignMetrics> {
    let campaign = db.get_campaign(campaign_id)?;
    let (unique_viewers, redemptions) = db.lifecycle().engagement_counts(campaign_id)?;
    let delivery = events.campaign_counts(&campaign.code).await?;

    Ok(CampaignMetrics {
        progress_percentage: pct(campaign.processed_contacts.into(), campaign.total_contacts.into()),
        success_rate: pct(
            campaign.successful_contacts.into(),
            campaign.processed_contacts.into(),
        ),
        view_to_redemption_rate: pct(redemptions.into(), unique_viewers.into()),
        open_rate: pct(delivery.opened, delivery.delivered),
        click_rate: pct(delivery.clicked, delivery.delivered),
        bounce_rate: pct(delivery.bounced, delivery.sent),
        complaint_rate: pct(delivery.complained, delivery.delivered),
        campaign_id: campaign.id,
        campaign_code: campaign.code,
        status: campaign.status,
        total_contacts: campaign.total_contacts,
        processed_contacts: campaign.processed_contacts,
        successful_contacts: campaign.successful_contacts,
        failed_contacts: campaign.failed_contacts,
        unique_viewers,
        redemptions,
        delivery,
    })
}

/// Whole percentage, rounded half-up; 0 when the denominator is 0.
fn pct(numerator: u64, denominator: u64) -> u32 {
    if denominator == 0 {
        return 0;
    }
    (numerator as f64 / denominator as f64 * 100.0).round() as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::campaign::Campaign;
    use crate::member::{ContactListMember, Outcome};
    use async_trait::async_trait;
    use chrono::Utc;

    struct FixedEvents(DeliveryStats);

    #[async_trait]
    impl DeliveryEventLog for FixedEvents {
        async fn campaign_counts(&self, _code: &str) -> Result<DeliveryStats> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn test_pct_rounding_and_zero_guard() {
        assert_eq!(pct(1, 3), 33);
        assert_eq!(pct(2, 3), 67);
        assert_eq!(pct(1, 200), 1);
        assert_eq!(pct(5, 5), 100);
        assert_eq!(pct(3, 0), 0);
    }

    #[tokio::test]
    async fn test_snapshot_combines_all_sources() {
        let db = CampaignDb::open_in_memory().unwrap();
        let mut campaign = Campaign::new("co-1", "Spring Promo", "SPRING24");
        campaign.total_contacts = 200;
        campaign.processed_contacts = 50;
        campaign.successful_contacts = 45;
        campaign.failed_contacts = 5;
        db.save_campaign(&campaign).unwrap();

        let lifecycle = db.lifecycle();
        for i in 0..4 {
            let member =
                ContactListMember::pending("list-1", &format!("cust-{i}"), Some(&campaign.id));
            lifecycle.add_pending(&member).unwrap();
            if i < 2 {
                lifecycle
                    .record_view(&member.id, "sess", Utc::now())
                    .unwrap();
            }
            if i == 0 {
                lifecycle.record_redemption(&member.id, Utc::now()).unwrap();
            }
        }

        let events = FixedEvents(DeliveryStats {
            sent: 50,
            delivered: 48,
            opened: 20,
            clicked: 5,
            bounced: 2,
            complained: 1,
        });

        let metrics = campaign_metrics(&db, &events, &campaign.id).await.unwrap();
        assert_eq!(metrics.progress_percentage, 25);
        assert_eq!(metrics.success_rate, 90);
        assert_eq!(metrics.unique_viewers, 2);
        assert_eq!(metrics.redemptions, 1);
        assert_eq!(metrics.view_to_redemption_rate, 50);
        // 20 opens over 48 delivered.
        assert_eq!(metrics.open_rate, 42);
        assert_eq!(metrics.click_rate, 10);
        assert_eq!(metrics.bounce_rate, 4);
        assert_eq!(metrics.complaint_rate, 2);
    }

    #[tokio::test]
    async fn test_zero_activity_reports_zero_rates() {
        let db = CampaignDb::open_in_memory().unwrap();
        let campaign = Campaign::new("co-1", "Empty", "EMPTY1");
        db.save_campaign(&campaign).unwrap();
        let events = FixedEvents(DeliveryStats::default());

        let metrics = campaign_metrics(&db, &events, &campaign.id).await.unwrap();
        assert_eq!(metrics.progress_percentage, 0);
        assert_eq!(metrics.success_rate, 0);
        assert_eq!(metrics.view_to_redemption_rate, 0);
        assert_eq!(metrics.open_rate, 0);
    }

    #[tokio::test]
    async fn test_mark_outcome_feeds_success_rate() {
        let db = CampaignDb::open_in_memory().unwrap();
        let campaign = Campaign::new("co-1", "Live", "LIVE1");
        db.save_campaign(&campaign).unwrap();
        let lifecycle = db.lifecycle();
        for i in 0..2 {
            lifecycle
                .add_pending(&ContactListMember::pending(
                    "list-1",
                    &format!("cust-{i}"),
                    Some(&campaign.id),
                ))
                .unwrap();
        }
        lifecycle.recount_total_contacts(&campaign.id).unwrap();
        let batch = lifecycle.claim_batch(&campaign.id, 2).unwrap();
        db.record_send_outcome(&campaign.id, &batch[0].id, Outcome::Processed, None, Utc::now())
            .unwrap();
        db.record_send_outcome(
            &campaign.id,
            &batch[1].id,
            Outcome::Failed,
            Some("smtp 550"),
            Utc::now(),
        )
        .unwrap();

        let events = FixedEvents(DeliveryStats::default());
        let metrics = campaign_metrics(&db, &events, &campaign.id).await.unwrap();
        assert_eq!(metrics.processed_contacts, 2);
        assert_eq!(metrics.success_rate, 50);
        assert_eq!(metrics.progress_percentage, 100);
    }
}
