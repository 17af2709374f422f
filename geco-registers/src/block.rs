//! Register blocks.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One of the two fixed-length register blocks a controller exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Block {
    /// Read-only live values.
    Status,
    /// Configurable settings, written back as a whole.
    Config,
}

impl Block {
    pub const ALL: [Block; 2] = [Block::Status, Block::Config];

    /// Number of the first register in the block.
    pub fn base_register(self) -> u16 {
        match self {
            Block::Status => 100,
            Block::Config => 300,
        }
    }

    /// Number of 16-bit registers in the block.
    pub fn register_count(self) -> u8 {
        50
    }

    /// Length of the block payload in bytes.
    pub fn byte_len(self) -> usize {
        self.register_count() as usize * 2
    }

    /// Register number stored at `byte_offset` of the block.
    pub fn register_at(self, byte_offset: usize) -> u16 {
        self.base_register() + (byte_offset / 2) as u16
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Block::Status => "status",
            Block::Config => "config",
        }
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Block {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "status" => Ok(Block::Status),
            "config" => Ok(Block::Config),
            other => Err(format!("unknown block '{other}' (expected status or config)")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_layout() {
        assert_eq!(Block::Status.base_register(), 100);
        assert_eq!(Block::Config.base_register(), 300);
        assert_eq!(Block::Status.byte_len(), 100);
        assert_eq!(Block::Config.register_at(10), 305);
    }

    #[test]
    fn test_block_parse() {
        assert_eq!("status".parse::<Block>().unwrap(), Block::Status);
        assert_eq!("CONFIG".parse::<Block>().unwrap(), Block::Config);
        assert!("history".parse::<Block>().is_err());
    }

    #[test]
    fn test_block_serialization() {
        assert_eq!(serde_json::to_string(&Block::Config).unwrap(), "\"config\"");
        let parsed: Block = serde_json::from_str("\"status\"").unwrap();
        assert_eq!(parsed, Block::Status);
    }
}
