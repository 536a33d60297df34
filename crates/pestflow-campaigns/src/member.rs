//! Contact-list membership — one row per contact × list × optional campaign,
//! tracking the delivery and engagement lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a member.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MemberStatus {
    Pending,
    Processing,
    Processed,
    Failed,
    Bounced,
    Unsubscribed,
    Excluded,
}

impl MemberStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberStatus::Pending => "pending",
            MemberStatus::Processing => "processing",
            MemberStatus::Processed => "processed",
            MemberStatus::Failed => "failed",
            MemberStatus::Bounced => "bounced",
            MemberStatus::Unsubscribed => "unsubscribed",
            MemberStatus::Excluded => "excluded",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(MemberStatus::Pending),
            "processing" => Some(MemberStatus::Processing),
            "processed" => Some(MemberStatus::Processed),
            "failed" => Some(MemberStatus::Failed),
            "bounced" => Some(MemberStatus::Bounced),
            "unsubscribed" => Some(MemberStatus::Unsubscribed),
            "excluded" => Some(MemberStatus::Excluded),
            _ => None,
        }
    }

    /// Terminal states never revert (excluded→pending re-evaluation is an
    /// external concern).
    pub fn is_terminal(&self) -> bool {
        !matches!(self, MemberStatus::Pending | MemberStatus::Processing)
    }
}

impl std::fmt::Display for MemberStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal outcome of one claimed member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Processed,
    Failed,
    Bounced,
    Unsubscribed,
}

impl Outcome {
    pub fn status(&self) -> MemberStatus {
        match self {
            Outcome::Processed => MemberStatus::Processed,
            Outcome::Failed => MemberStatus::Failed,
            Outcome::Bounced => MemberStatus::Bounced,
            Outcome::Unsubscribed => MemberStatus::Unsubscribed,
        }
    }
}

/// One contact's relationship to one contact list, optionally scoped to a
/// campaign, with its delivery/engagement lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactListMember {
    pub id: String,
    pub contact_list_id: String,
    pub customer_id: String,
    /// A member can be tracked without a campaign (page-view-only tracking).
    pub campaign_id: Option<String>,
    pub status: MemberStatus,
    /// Set when status = failed.
    pub error_message: Option<String>,
    pub first_viewed_at: Option<DateTime<Utc>>,
    pub last_viewed_at: Option<DateTime<Utc>>,
    pub view_count: u32,
    /// Set at most once, never cleared.
    pub redeemed_at: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ContactListMember {
    pub fn pending(contact_list_id: &str, customer_id: &str, campaign_id: Option<&str>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            contact_list_id: contact_list_id.to_string(),
            customer_id: customer_id.to_string(),
            campaign_id: campaign_id.map(str::to_string),
            status: MemberStatus::Pending,
            error_message: None,
            first_viewed_at: None,
            last_viewed_at: None,
            view_count: 0,
            redeemed_at: None,
            processed_at: None,
            created_at: Utc::now(),
        }
    }
}
