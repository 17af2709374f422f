//! # geco-registers
//!
//! Register map for GECO controllers.
//!
//! This crate provides:
//! - Status and config block descriptors
//! - Typed register definitions (scaled temperatures, enums, flags, time programs)
//! - Block decoding into named values
//! - Read-modify-write encoding that leaves every other byte of a block untouched
//! - The PCWU heat-pump register tables

pub mod block;
pub mod definition;
pub mod error;
pub mod map;
pub mod pcwu;
pub mod value;

pub use block::Block;
pub use definition::{Access, EnumOption, Range, RegisterDefinition, ValueKind};
pub use error::RegisterError;
pub use map::{RawDump, RegisterMap, Values};
pub use value::Value;
