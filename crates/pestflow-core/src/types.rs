//! Cross-crate types: business-hours settings, transport payloads,
//! delivery-event aggregates.

use std::collections::HashMap;

use chrono::{NaiveTime, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// Send window for one weekday.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DayHours {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// "HH:MM", company-local.
    #[serde(default = "default_start")]
    pub start: String,
    /// "HH:MM", company-local, inclusive.
    #[serde(default = "default_end")]
    pub end: String,
}

fn default_true() -> bool {
    true
}
fn default_start() -> String {
    "09:00".into()
}
fn default_end() -> String {
    "17:00".into()
}

impl DayHours {
    pub fn start_time(&self) -> NaiveTime {
        parse_hhmm(&self.start).unwrap_or_else(|| NaiveTime::from_hms_opt(9, 0, 0).unwrap())
    }

    pub fn end_time(&self) -> NaiveTime {
        parse_hhmm(&self.end).unwrap_or_else(|| NaiveTime::from_hms_opt(17, 0, 0).unwrap())
    }
}

fn parse_hhmm(s: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M").ok()
}

/// Per-company business-hours configuration snapshot.
///
/// Days missing from `days` fall back to the stock window: Monday–Friday
/// 09:00–17:00 enabled, Saturday/Sunday disabled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusinessHoursSettings {
    /// IANA timezone identifier, e.g. "America/New_York".
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Global enforcement flag. When off, every instant is sendable.
    #[serde(default = "default_true")]
    pub enforced: bool,
    /// Lowercase weekday name → window.
    #[serde(default)]
    pub days: HashMap<String, DayHours>,
}

fn default_timezone() -> String {
    "America/New_York".into()
}

impl Default for BusinessHoursSettings {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            enforced: true,
            days: HashMap::new(),
        }
    }
}

impl BusinessHoursSettings {
    /// Parsed company timezone. An unparseable identifier falls back to the
    /// default rather than failing the tick.
    pub fn tz(&self) -> Tz {
        self.timezone.parse().unwrap_or(Tz::America__New_York)
    }

    /// Window for a weekday, with the stock default for missing entries.
    pub fn day_hours(&self, weekday: Weekday) -> DayHours {
        self.days
            .get(weekday_name(weekday))
            .cloned()
            .unwrap_or_else(|| DayHours {
                enabled: !matches!(weekday, Weekday::Sat | Weekday::Sun),
                start: default_start(),
                end: default_end(),
            })
    }

    /// Count of enabled weekdays.
    pub fn working_days_per_week(&self) -> u32 {
        [
            Weekday::Mon,
            Weekday::Tue,
            Weekday::Wed,
            Weekday::Thu,
            Weekday::Fri,
            Weekday::Sat,
            Weekday::Sun,
        ]
        .iter()
        .filter(|d| self.day_hours(**d).enabled)
        .count() as u32
    }
}

/// Lowercase weekday name, matching the settings-store keys.
pub fn weekday_name(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "monday",
        Weekday::Tue => "tuesday",
        Weekday::Wed => "wednesday",
        Weekday::Thu => "thursday",
        Weekday::Fri => "friday",
        Weekday::Sat => "saturday",
        Weekday::Sun => "sunday",
    }
}

/// Rendered message handed to the transport collaborator for one contact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignMessage {
    /// External campaign code (public-URL identifier).
    pub campaign_code: String,
    pub customer_id: String,
    pub member_id: String,
    /// Tracking link to the campaign landing page.
    pub landing_url: String,
}

/// Per-campaign aggregate counts from the external delivery-event log.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeliveryStats {
    pub sent: u64,
    pub delivered: u64,
    pub opened: u64,
    pub clicked: u64,
    pub bounced: u64,
    pub complained: u64,
}
