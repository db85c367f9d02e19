//! Error types used throughout the application

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for billsync
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "message")]
pub enum BillSyncError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    /// The remote platform rejected a request in a way retrying cannot fix.
    #[error("Remote rejected request: {0}")]
    Remote(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BillSyncError {
    /// Whether this error must stop the whole phase (and so the run) instead
    /// of being tallied against a single fetch or persist unit.
    pub const fn aborts_phase(&self) -> bool {
        matches!(self, Self::Auth(_) | Self::Remote(_) | Self::Config(_) | Self::Cancelled(_))
    }

    /// Stable, low-cardinality label for logs.
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Database(_) => "database",
            Self::Config(_) => "config",
            Self::Network(_) => "network",
            Self::RateLimited(_) => "rate_limited",
            Self::Auth(_) => "auth",
            Self::Remote(_) => "remote",
            Self::NotFound(_) => "not_found",
            Self::InvalidInput(_) => "invalid_input",
            Self::Cancelled(_) => "cancelled",
            Self::Internal(_) => "internal",
        }
    }
}

/// Result type alias for billsync operations
pub type Result<T> = std::result::Result<T, BillSyncError>;
