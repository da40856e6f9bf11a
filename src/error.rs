//! Error taxonomy for the sync, settlement and dispatch paths.
//!
//! Upstream failures are recovered locally by tier fallback, persistence
//! failures abort the current job firing, integrity violations are rejected
//! outright, and delivery failures are recorded on the queue entry.

use thiserror::Error;

use crate::types::Channel;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Network error or timeout against the enrichment service or sports API.
    #[error("{service} unavailable: {reason}")]
    Upstream { service: &'static str, reason: String },

    #[error("store error: {0}")]
    Persistence(#[from] sqlx::Error),

    /// Double settlement, regressive status transition, unreadable row.
    #[error("data integrity violation: {0}")]
    Integrity(String),

    #[error("{channel} delivery failed: {reason}")]
    Delivery { channel: Channel, reason: String },

    #[error("payload encoding error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("unknown task: {0}")]
    UnknownTask(String),

    #[error("task already registered: {0}")]
    DuplicateTask(String),

    #[error("task {0} is already running")]
    TaskBusy(String),

    #[error("task panicked: {0}")]
    TaskPanicked(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    pub fn upstream(service: &'static str, err: impl std::fmt::Display) -> Self {
        EngineError::Upstream {
            service,
            reason: err.to_string(),
        }
    }

    pub fn delivery(channel: Channel, err: impl std::fmt::Display) -> Self {
        EngineError::Delivery {
            channel,
            reason: err.to_string(),
        }
    }

    /// Whether the failure should trigger fallback rather than abort the caller.
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::Upstream { .. })
    }
}
