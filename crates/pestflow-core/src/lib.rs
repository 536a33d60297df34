//! # PestFlow Core
//!
//! Shared foundation for the PestFlow campaign distribution system:
//! error taxonomy, cross-crate types, collaborator traits, configuration.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::PestFlowConfig;
pub use error::{PestFlowError, Result};
