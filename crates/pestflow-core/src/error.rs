//! Error taxonomy for the campaign distribution core.
//!
//! Hard failures (`NotFound`, `Conflict`, `InvalidTransition`) surface to the
//! caller and are never retried internally. Transport failures are recorded
//! per member and never abort a batch.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, PestFlowError>;

/// All errors produced by the distribution core.
#[derive(Debug, Error)]
pub enum PestFlowError {
    /// Referenced campaign/member/company does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Uniqueness violation (campaign name or external code) during cloning.
    /// Carries actionable alternatives instead of silently mutating the
    /// caller's requested identifier.
    #[error("conflict: {message}")]
    Conflict {
        message: String,
        suggestions: Vec<String>,
    },

    /// Disallowed state-machine edge (campaign or member).
    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    /// The external send collaborator failed or timed out.
    #[error("transport: {0}")]
    Transport(String),

    /// SQLite / persistence failure.
    #[error("database: {0}")]
    Db(String),

    /// Configuration load/parse failure.
    #[error("config: {0}")]
    Config(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl PestFlowError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn conflict(message: impl Into<String>, suggestions: Vec<String>) -> Self {
        Self::Conflict {
            message: message.into(),
            suggestions,
        }
    }

    pub fn invalid_transition(what: impl Into<String>) -> Self {
        Self::InvalidTransition(what.into())
    }

    pub fn transport(what: impl Into<String>) -> Self {
        Self::Transport(what.into())
    }

    pub fn db(e: impl std::fmt::Display) -> Self {
        Self::Db(e.to_string())
    }
}
