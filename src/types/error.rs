//! Error types for tariffsim
//!
//! Cache misses are not errors and never appear here.

use std::time::Duration;

/// Main error type for simulation lifecycle operations
#[derive(Debug, thiserror::Error)]
pub enum SimError {
    #[error("Worker unavailable: {0}")]
    WorkerUnavailable(String),

    #[error("Worker error: {0}")]
    Worker(String),

    #[error("Simulation timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Run already in progress for input {0}")]
    RunInProgress(String),

    #[error("Invalid transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Invalid comparison: {0}")]
    InvalidComparison(String),

    #[error("Fingerprint collision: {0}")]
    KeyCollision(String),

    #[error("Simulation {0} has already been saved")]
    AlreadySaved(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<serde_json::Error> for SimError {
    fn from(err: serde_json::Error) -> Self {
        Self::Persistence(format!("JSON error: {}", err))
    }
}

/// Result type alias for tariffsim operations
pub type Result<T> = std::result::Result<T, SimError>;
