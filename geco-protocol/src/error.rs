//! Protocol error types.

use thiserror::Error;

/// Errors that can occur while framing or unframing GECO packets.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("invalid start byte: expected 0x69, got {0:#04x}")]
    InvalidStartByte(u8),

    #[error("header CRC mismatch: expected {expected:#04x}, got {actual:#04x}")]
    HeaderCrcMismatch { expected: u8, actual: u8 },

    #[error("payload CRC mismatch: expected {expected:#06x}, got {actual:#06x}")]
    PayloadCrcMismatch { expected: u16, actual: u16 },

    #[error("payload too short: {len} bytes (min {min})")]
    PayloadTooShort { len: usize, min: usize },

    #[error("frame without register header: function {function:#04x}, {len} bytes")]
    NoRegisterHeader { function: u8, len: usize },

    #[error("register data too large: {size} bytes (max {max})")]
    DataTooLarge { size: usize, max: usize },
}

impl ProtocolError {
    /// Returns whether the bytes at the head of the buffer are corrupt (or a
    /// false start marker) and the decoder should resynchronize one byte on.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            ProtocolError::InvalidStartByte(_)
                | ProtocolError::HeaderCrcMismatch { .. }
                | ProtocolError::PayloadCrcMismatch { .. }
                | ProtocolError::PayloadTooShort { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_corruption_classification() {
        assert!(ProtocolError::InvalidStartByte(0x00).is_corruption());
        assert!(ProtocolError::HeaderCrcMismatch {
            expected: 1,
            actual: 2
        }
        .is_corruption());
        assert!(ProtocolError::PayloadCrcMismatch {
            expected: 1,
            actual: 2
        }
        .is_corruption());
        assert!(ProtocolError::PayloadTooShort { len: 3, min: 7 }.is_corruption());

        assert!(!ProtocolError::NoRegisterHeader {
            function: 0x40,
            len: 7
        }
        .is_corruption());
        assert!(!ProtocolError::DataTooLarge { size: 300, max: 243 }.is_corruption());
    }

    #[test]
    fn test_error_display() {
        let err = ProtocolError::PayloadCrcMismatch {
            expected: 0xBDB2,
            actual: 0x0001,
        };
        let msg = err.to_string();
        assert!(msg.contains("0xbdb2"));
        assert!(msg.contains("0x0001"));

        let err = ProtocolError::InvalidStartByte(0x42);
        assert!(err.to_string().contains("0x42"));

        let err = ProtocolError::DataTooLarge { size: 300, max: 243 };
        assert!(err.to_string().contains("300"));
    }
}
