//! Error kinds for the runner supervisor core.
//!
//! Mirrors the error table in the specification: each variant names where
//! the error arises and is mapped by callers (HTTP handlers, the CLI) to
//! the appropriate recovery. `SubscriberOverflow` has no variant here
//! because the broker never returns it — a full subscriber queue is a
//! silent drop, not an error.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("failed to spawn child process: {0}")]
    ChildSpawnFailed(String),

    #[error("overloaded: {0}")]
    Overloaded(String),
}

impl SupervisorError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn conflict(what: impl Into<String>) -> Self {
        Self::Conflict(what.into())
    }

    pub fn invalid(what: impl Into<String>) -> Self {
        Self::InvalidInput(what.into())
    }
}

pub type Result<T> = std::result::Result<T, SupervisorError>;
