//! Per-company settings, stored as key/value rows and assembled into a
//! [`BusinessHoursSettings`] snapshot for the calendar functions.
//!
//! Keys follow the admin UI's flat naming: `company_timezone`,
//! `automation_business_hours_only`, and one `business_hours_<day>` JSON
//! blob per weekday. Missing or malformed rows fall back to the stock
//! Monday–Friday 9–5 configuration rather than failing a tick.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use rusqlite::Connection;
use tracing::warn;

use pestflow_core::error::{PestFlowError, Result};
use pestflow_core::traits::SettingsStore;
use pestflow_core::types::{BusinessHoursSettings, DayHours};

const DAY_KEYS: [&str; 7] = [
    "monday",
    "tuesday",
    "wednesday",
    "thursday",
    "friday",
    "saturday",
    "sunday",
];

/// Key/value settings store; clones share the campaign DB connection.
#[derive(Clone)]
pub struct CompanySettingsStore {
    conn: Arc<Mutex<Connection>>,
}

impl CompanySettingsStore {
    pub(crate) fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Upsert one setting.
    pub fn set(&self, company_id: &str, key: &str, value: &str) -> Result<()> {
        self.lock()
            .execute(
                "INSERT OR REPLACE INTO company_settings (company_id, setting_key, setting_value)
                 VALUES (?1, ?2, ?3)",
                rusqlite::params![company_id, key, value],
            )
            .map_err(PestFlowError::db)?;
        Ok(())
    }

    /// Fetch one setting, `None` when unset.
    pub fn get(&self, company_id: &str, key: &str) -> Result<Option<String>> {
        let value = self.lock().query_row(
            "SELECT setting_value FROM company_settings
             WHERE company_id = ?1 AND setting_key = ?2",
            rusqlite::params![company_id, key],
            |row| row.get::<_, String>(0),
        );
        match value {
            Ok(v) => Ok(Some(v)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(PestFlowError::db(e)),
        }
    }

    /// Assemble the business-hours snapshot for a company. Every field
    /// degrades independently to its default.
    pub fn load_business_hours(&self, company_id: &str) -> Result<BusinessHoursSettings> {
        let mut settings = BusinessHoursSettings::default();

        if let Some(tz) = self.get(company_id, "company_timezone")? {
            settings.timezone = tz;
        }
        if let Some(enforced) = self.get(company_id, "automation_business_hours_only")? {
            settings.enforced = enforced == "true";
        }
        for day in DAY_KEYS {
            let key = format!("business_hours_{day}");
            if let Some(raw) = self.get(company_id, &key)? {
                match serde_json::from_str::<DayHours>(&raw) {
                    Ok(hours) => {
                        settings.days.insert(day.to_string(), hours);
                    }
                    Err(e) => {
                        warn!(company_id, key, error = %e, "ignoring malformed day hours");
                    }
                }
            }
        }
        Ok(settings)
    }
}

#[async_trait]
impl SettingsStore for CompanySettingsStore {
    async fn business_hours(&self, company_id: &str) -> Result<BusinessHoursSettings> {
        self.load_business_hours(company_id)
    }
}
