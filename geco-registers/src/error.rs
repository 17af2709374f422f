//! Register map error types.

use crate::block::Block;
use thiserror::Error;

/// Errors from decoding or encoding register values.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RegisterError {
    #[error("unknown register: {name}")]
    UnknownRegister { name: String },

    #[error("register is read-only: {name}")]
    ReadOnly { name: String },

    /// The value is outside the register's range or option set. `expected`
    /// describes the accepted domain, e.g. `10..=60` or `one of 0=Max, 1=Min`.
    #[error("value {value} out of range for {name}: expected {expected}")]
    OutOfRange {
        name: String,
        value: String,
        expected: String,
    },

    #[error("invalid value {value} for {name}: {reason}")]
    InvalidValue {
        name: String,
        value: String,
        reason: String,
    },

    #[error("{block} block has {actual} bytes, expected {expected}")]
    BlockLength {
        block: Block,
        expected: usize,
        actual: usize,
    },

    #[error("invalid {block} layout at {name}: {reason}")]
    Layout {
        block: Block,
        name: String,
        reason: String,
    },
}

impl RegisterError {
    /// Returns whether the error rejects a requested value, as opposed to a
    /// malformed block or map.
    pub fn is_value_rejection(&self) -> bool {
        matches!(
            self,
            RegisterError::UnknownRegister { .. }
                | RegisterError::ReadOnly { .. }
                | RegisterError::OutOfRange { .. }
                | RegisterError::InvalidValue { .. }
        )
    }
}
