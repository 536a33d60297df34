//! Collaborator traits. The distribution core never owns transport or
//! identity concerns; it talks to these interfaces only.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{BusinessHoursSettings, CampaignMessage, DeliveryStats};

/// External send collaborator (email/SMS provider, workflow runner, ...).
///
/// Callers bound every `send` with a timeout; a timeout is treated exactly
/// like a transport failure.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Short channel name for logs ("email", "sms", ...).
    fn name(&self) -> &str;

    /// Deliver one rendered message. Returns the provider delivery id.
    async fn send(&self, message: &CampaignMessage) -> Result<String>;
}

/// Read-only source of per-campaign delivery-event aggregates, keyed by
/// external campaign code. Consumed by the metrics aggregator only.
#[async_trait]
pub trait DeliveryEventLog: Send + Sync {
    async fn campaign_counts(&self, campaign_code: &str) -> Result<DeliveryStats>;
}

/// Read-only source of per-company business-hours settings.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn business_hours(&self, company_id: &str) -> Result<BusinessHoursSettings>;
}
