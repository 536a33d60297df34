//! PestFlow configuration system.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PestFlowError, Result};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PestFlowConfig {
    /// Directory holding the SQLite database.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub distributor: DistributorConfig,
}

/// Distribution-loop tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributorConfig {
    /// Seconds between tick sweeps over running campaigns.
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,
    /// Upper bound on one transport send. A timed-out send is recorded as a
    /// failed delivery, never left in `processing`.
    #[serde(default = "default_send_timeout")]
    pub send_timeout_secs: u64,
    /// Base URL for campaign landing links embedded in outgoing messages.
    #[serde(default = "default_landing_base")]
    pub landing_base_url: String,
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".pestflow")
}

fn default_check_interval() -> u64 {
    60
}

fn default_send_timeout() -> u64 {
    30
}

fn default_landing_base() -> String {
    "http://localhost:3000/c".into()
}

impl Default for DistributorConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: default_check_interval(),
            send_timeout_secs: default_send_timeout(),
            landing_base_url: default_landing_base(),
        }
    }
}

impl Default for PestFlowConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            distributor: DistributorConfig::default(),
        }
    }
}

impl PestFlowConfig {
    /// Load config from the default path (~/.pestflow/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| PestFlowError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| PestFlowError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Default config path.
    pub fn default_path() -> PathBuf {
        default_data_dir().join("config.toml")
    }

    /// Path of the campaigns database.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("campaigns.db")
    }
}
