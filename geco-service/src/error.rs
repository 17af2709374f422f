//! Service error types.

use geco_client::ClientError;
use thiserror::Error;

/// Service errors.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("engine is already running")]
    AlreadyRunning,

    #[error("engine shutting down")]
    ShuttingDown,
}

impl ServiceError {
    /// Returns whether the request was refused without touching the bus.
    pub fn is_rejection(&self) -> bool {
        matches!(self, ServiceError::Client(e) if e.is_rejection())
    }

    /// Returns whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ServiceError::Client(e) if e.is_retryable())
    }
}
