//! Client error types.

use geco_registers::RegisterError;
use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] geco_protocol::ProtocolError),

    #[error(transparent)]
    Register(#[from] RegisterError),

    #[error("connection lost: {0}")]
    ConnectionLost(String),

    #[error("no response within {timeout_ms} ms after {attempts} attempts")]
    Timeout { timeout_ms: u64, attempts: u32 },

    #[error("writes are not supported in {mode} mode")]
    ModeNotSupported { mode: crate::BusMode },

    #[error("no usable config block cached; read the config first")]
    NotReady,

    #[error("write of {register} failed: {reason}")]
    WriteFailed { register: String, reason: String },
}

impl ClientError {
    /// Returns whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::Io(_)
                | ClientError::Timeout { .. }
                | ClientError::ConnectionLost(_)
                | ClientError::NotReady
        )
    }

    /// Returns whether the error rejected the request before anything was
    /// sent on the bus.
    pub fn is_rejection(&self) -> bool {
        match self {
            ClientError::Register(err) => err.is_value_rejection(),
            ClientError::ModeNotSupported { .. } | ClientError::NotReady => true,
            _ => false,
        }
    }
}
