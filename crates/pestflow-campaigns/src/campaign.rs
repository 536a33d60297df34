//! Campaign definitions — the core data model for distributed sends.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use pestflow_core::error::{PestFlowError, Result};

/// Campaign run status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Draft,
    Scheduled,
    Running,
    Paused,
    Completed,
    Cancelled,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignStatus::Draft => "draft",
            CampaignStatus::Scheduled => "scheduled",
            CampaignStatus::Running => "running",
            CampaignStatus::Paused => "paused",
            CampaignStatus::Completed => "completed",
            CampaignStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(CampaignStatus::Draft),
            "scheduled" => Some(CampaignStatus::Scheduled),
            "running" => Some(CampaignStatus::Running),
            "paused" => Some(CampaignStatus::Paused),
            "completed" => Some(CampaignStatus::Completed),
            "cancelled" => Some(CampaignStatus::Cancelled),
            _ => None,
        }
    }

    /// Completed and cancelled campaigns never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, CampaignStatus::Completed | CampaignStatus::Cancelled)
    }

    /// Allowed edges: draft→scheduled→running⇄paused→completed;
    /// cancelled from any non-terminal state.
    pub fn can_transition_to(&self, next: CampaignStatus) -> bool {
        if next == CampaignStatus::Cancelled {
            return !self.is_terminal();
        }
        matches!(
            (self, next),
            (CampaignStatus::Draft, CampaignStatus::Scheduled)
                | (CampaignStatus::Scheduled, CampaignStatus::Running)
                | (CampaignStatus::Running, CampaignStatus::Paused)
                | (CampaignStatus::Paused, CampaignStatus::Running)
                | (CampaignStatus::Running, CampaignStatus::Completed)
        )
    }
}

impl std::fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A marketing campaign: immutable send configuration plus mutable run state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    /// Internal id (opaque, stable).
    pub id: String,
    /// Owning company.
    pub company_id: String,
    /// Human-chosen name, unique within the company.
    pub name: String,
    /// External campaign code — globally unique, used in public URLs.
    pub code: String,
    pub description: Option<String>,

    // Send configuration (fixed once running, except pause/resume).
    /// Max contacts per tick.
    pub batch_size: u32,
    /// Minimum minutes between ticks that actually send.
    pub batch_interval_minutes: i64,
    /// Max contacts per company-local calendar day.
    pub daily_limit: u32,
    pub respect_business_hours: bool,
    pub exclude_weekends: bool,
    pub start_datetime: Option<DateTime<Utc>>,
    pub end_datetime: Option<DateTime<Utc>>,

    // Run state.
    pub status: CampaignStatus,
    pub total_contacts: u32,
    pub processed_contacts: u32,
    pub successful_contacts: u32,
    pub failed_contacts: u32,
    /// Batch sequence number.
    pub current_batch: u32,
    pub last_batch_sent_at: Option<DateTime<Utc>>,
    pub contacts_sent_today: u32,
    /// Company-local date `contacts_sent_today` refers to.
    pub current_day_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
}

impl Campaign {
    /// Create a new draft campaign with stock send limits.
    pub fn new(company_id: &str, name: &str, code: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            company_id: company_id.to_string(),
            name: name.to_string(),
            code: code.to_string(),
            description: None,
            batch_size: 50,
            batch_interval_minutes: 30,
            daily_limit: 200,
            respect_business_hours: true,
            exclude_weekends: false,
            start_datetime: None,
            end_datetime: None,
            status: CampaignStatus::Draft,
            total_contacts: 0,
            processed_contacts: 0,
            successful_contacts: 0,
            failed_contacts: 0,
            current_batch: 0,
            last_batch_sent_at: None,
            contacts_sent_today: 0,
            current_day_date: None,
            created_at: Utc::now(),
        }
    }

    /// Move to `next`, rejecting disallowed edges.
    pub fn transition_to(&mut self, next: CampaignStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(PestFlowError::invalid_transition(format!(
                "campaign {} cannot move {} -> {}",
                self.id, self.status, next
            )));
        }
        self.status = next;
        Ok(())
    }

    /// Counter invariant: processed = successful + failed ≤ total.
    pub fn counters_consistent(&self) -> bool {
        self.processed_contacts == self.successful_contacts + self.failed_contacts
            && self.processed_contacts <= self.total_contacts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_edges() {
        assert!(CampaignStatus::Draft.can_transition_to(CampaignStatus::Scheduled));
        assert!(CampaignStatus::Running.can_transition_to(CampaignStatus::Paused));
        assert!(CampaignStatus::Paused.can_transition_to(CampaignStatus::Running));
        assert!(CampaignStatus::Running.can_transition_to(CampaignStatus::Completed));
        assert!(!CampaignStatus::Draft.can_transition_to(CampaignStatus::Running));
        assert!(!CampaignStatus::Completed.can_transition_to(CampaignStatus::Running));
        // Cancellation from any non-terminal state, never out of a terminal one.
        assert!(CampaignStatus::Paused.can_transition_to(CampaignStatus::Cancelled));
        assert!(!CampaignStatus::Cancelled.can_transition_to(CampaignStatus::Cancelled));
    }

    #[test]
    fn test_transition_rejects_bad_edge() {
        let mut c = Campaign::new("co-1", "Spring Promo", "SPRING24");
        assert!(c.transition_to(CampaignStatus::Running).is_err());
        c.transition_to(CampaignStatus::Scheduled).unwrap();
        c.transition_to(CampaignStatus::Running).unwrap();
        assert_eq!(c.status, CampaignStatus::Running);
    }

    #[test]
    fn test_counters_consistent() {
        let mut c = Campaign::new("co-1", "x", "X1");
        c.total_contacts = 10;
        c.processed_contacts = 4;
        c.successful_contacts = 3;
        c.failed_contacts = 1;
        assert!(c.counters_consistent());
        c.failed_contacts = 2;
        assert!(!c.counters_consistent());
    }
}
