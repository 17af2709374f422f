//! # geco-protocol
//!
//! Wire protocol implementation for the GECO RS485 bus used by Hewalex
//! heat-pump and solar controllers.
//!
//! This crate provides:
//! - Frame encoding with CRC-8 header and CRC-16 payload checksums
//! - An incremental decoder that resynchronizes after corruption
//! - Function and sub-function codes for register block exchanges

pub mod checksum;
pub mod codec;
pub mod error;
pub mod frame;

pub use codec::{DecoderStats, FrameDecoder};
pub use error::ProtocolError;
pub use frame::{function, sub_function, Endpoint, Frame, HEADER_SIZE, START_BYTE};

/// Nominal line settings of the bus behind the TCP adapter (38400 8N1).
pub const BAUD_RATE: u32 = 38_400;

/// Largest payload the one-byte length field can describe.
pub const MAX_PAYLOAD_SIZE: usize = u8::MAX as usize;

/// Largest complete frame on the wire.
pub const MAX_FRAME_SIZE: usize = HEADER_SIZE + MAX_PAYLOAD_SIZE;
