//! Error types for the engine

use thiserror::Error;

/// Errors returned by the remote management API
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("not connected to the fabric manager")]
    NotConnected,
    #[error("request timed out after {0}ms")]
    Timeout(u64),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("remote error: {0}")]
    Remote(String),
}

/// Errors raised while setting up the scheduler
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("failed to start background pool: {0}")]
    Runtime(#[from] std::io::Error),
    #[error("scheduler has been shut down")]
    ShutDown,
}
