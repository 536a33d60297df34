//! # PestFlow Campaigns
//!
//! Campaign distribution scheduler for the PestFlow CRM.
//! Optimized for a single shared SQLite file and tick-driven sends.
//!
//! ## Design Principles
//! - No external queue (no Redis, no job broker)
//! - SQLite persistence — survives restarts, hermetic in tests
//! - Tokio timers only — zero overhead between ticks
//! - Atomic member claims — overlapping ticks never double-send
//! - All calendar math in the company's timezone, never the server's
//!
//! ## Architecture
//! ```text
//! Distributor (tokio interval)
//!   └── tick(campaign, now)
//!         ├── gates: running? window? daily budget? business hours?
//!         ├── claim_batch: pending → processing (atomic)
//!         ├── Transport::send per member (bounded timeout)
//!         └── record outcome + counters (one transaction)
//!
//! Satellites
//!   ├── hours: business-hours calendar (pure functions)
//!   ├── cloner: duplicate config, reset run state, soft cascades
//!   ├── metrics: progress / success / engagement snapshot
//!   └── settings: per-company key/value → BusinessHoursSettings
//! ```

pub mod campaign;
pub mod cloner;
pub mod engine;
pub mod hours;
pub mod lifecycle;
pub mod member;
pub mod metrics;
pub mod persistence;
pub mod settings;

pub use campaign::{Campaign, CampaignStatus};
pub use cloner::{clone_campaign, CloneOptions, CloneOutcome};
pub use engine::{spawn_distributor, DistributionEngine, SkipReason, TickReport};
pub use lifecycle::LifecycleStore;
pub use member::{ContactListMember, MemberStatus, Outcome};
pub use metrics::{campaign_metrics, CampaignMetrics};
pub use persistence::{CampaignDb, LandingPage};
pub use settings::CompanySettingsStore;
