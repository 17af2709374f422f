//! Register map: decoding blocks into named values and read-modify-write
//! encoding of single registers.
//!
//! The config block contains registers that are not modeled by name. A write
//! therefore always starts from the last raw block read from the controller
//! and changes only the bytes of the target register; everything else,
//! including unknown registers, is sent back exactly as it was read.

use crate::block::Block;
use crate::definition::{RegisterDefinition, ValueKind};
use crate::error::RegisterError;
use crate::pcwu;
use crate::value::Value;
use serde::Serialize;
use std::collections::BTreeMap;

/// Decoded values keyed by register name.
pub type Values = BTreeMap<String, Value>;

/// A versioned, immutable table of register definitions.
#[derive(Debug)]
pub struct RegisterMap {
    model: &'static str,
    version: u32,
    status: &'static [RegisterDefinition],
    config: &'static [RegisterDefinition],
}

static PCWU: RegisterMap = RegisterMap {
    model: "PCWU",
    version: 1,
    status: pcwu::STATUS,
    config: pcwu::CONFIG,
};

impl RegisterMap {
    /// The Hewalex PCWU heat-pump map.
    pub fn pcwu() -> &'static RegisterMap {
        &PCWU
    }

    pub fn model(&self) -> &'static str {
        self.model
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// All definitions of a block, in table order.
    pub fn definitions(&self, block: Block) -> &'static [RegisterDefinition] {
        match block {
            Block::Status => self.status,
            Block::Config => self.config,
        }
    }

    /// Looks up a register by name within a block.
    pub fn get(&self, block: Block, name: &str) -> Option<&'static RegisterDefinition> {
        self.definitions(block).iter().find(|d| d.name == name)
    }

    /// Looks up a register by name in either block.
    pub fn find(&self, name: &str) -> Option<&'static RegisterDefinition> {
        Block::ALL.iter().find_map(|&block| self.get(block, name))
    }

    /// Decodes a complete block.
    pub fn decode(&self, block: Block, raw: &[u8]) -> Result<Values, RegisterError> {
        check_len(block, raw)?;
        Ok(self
            .definitions(block)
            .iter()
            .map(|def| (def.name.to_string(), def.decode(&raw[def.span()])))
            .collect())
    }

    /// Decodes whatever registers lie entirely inside a window of `data`
    /// starting at register number `first_register`.
    ///
    /// Used for traffic observed on the bus, whose windows need not match the
    /// block boundaries this map polls with.
    pub fn decode_window(&self, block: Block, first_register: u16, data: &[u8]) -> Values {
        let base = block.base_register();
        if first_register < base {
            return Values::new();
        }
        let window_start = usize::from(first_register - base) * 2;
        let window_end = window_start + data.len();

        self.definitions(block)
            .iter()
            .filter(|def| def.offset >= window_start && def.offset + def.width <= window_end)
            .map(|def| {
                let start = def.offset - window_start;
                (
                    def.name.to_string(),
                    def.decode(&data[start..start + def.width]),
                )
            })
            .collect()
    }

    /// Checks that `name` is a writable register and `value` is acceptable
    /// for it, without needing the current block.
    pub fn validate(
        &self,
        block: Block,
        name: &str,
        value: &Value,
    ) -> Result<&'static RegisterDefinition, RegisterError> {
        let def = self
            .get(block, name)
            .ok_or_else(|| RegisterError::UnknownRegister {
                name: name.to_string(),
            })?;
        if !def.is_writable() {
            return Err(RegisterError::ReadOnly {
                name: name.to_string(),
            });
        }
        def.to_raw(value)?;
        Ok(def)
    }

    /// Returns a copy of `current` with only the bytes of `name` replaced by
    /// the encoding of `value`.
    pub fn encode(
        &self,
        block: Block,
        current: &[u8],
        name: &str,
        value: &Value,
    ) -> Result<Vec<u8>, RegisterError> {
        let def = self.validate(block, name, value)?;
        check_len(block, current)?;

        let mut updated = current.to_vec();
        def.encode_into(value, &mut updated[def.span()])?;
        Ok(updated)
    }

    /// Verifies the table invariants: every register lies inside its block
    /// and no two registers share bytes, except flags of one word that use
    /// disjoint masks.
    pub fn check_layout(&self) -> Result<(), RegisterError> {
        for block in Block::ALL {
            let defs = self.definitions(block);
            for (i, def) in defs.iter().enumerate() {
                let layout_error = |reason: String| RegisterError::Layout {
                    block,
                    name: def.name.to_string(),
                    reason,
                };

                if def.block != block {
                    return Err(layout_error(format!("listed under {block}")));
                }
                if def.offset + def.width > block.byte_len() {
                    return Err(layout_error(format!(
                        "bytes {:?} exceed block length {}",
                        def.span(),
                        block.byte_len()
                    )));
                }
                if defs[..i].iter().any(|other| other.name == def.name) {
                    return Err(layout_error("duplicate name".to_string()));
                }
                for other in &defs[..i] {
                    let overlaps =
                        def.offset < other.offset + other.width && other.offset < def.offset + def.width;
                    if !overlaps {
                        continue;
                    }
                    let disjoint_flags = match (def.kind, other.kind) {
                        (ValueKind::Flag { mask: a }, ValueKind::Flag { mask: b }) => {
                            def.span() == other.span() && a & b == 0
                        }
                        _ => false,
                    };
                    if !disjoint_flags {
                        return Err(layout_error(format!("overlaps {}", other.name)));
                    }
                }
            }
        }
        Ok(())
    }

    /// Raw view of a block for diagnostics.
    pub fn raw_dump(&self, block: Block, raw: &[u8]) -> RawDump {
        RawDump::new(block, raw)
    }
}

/// Hex and per-register view of a raw block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RawDump {
    pub block: Block,
    pub hex: String,
    /// Register number to 16-bit word.
    pub registers: BTreeMap<u16, u16>,
}

impl RawDump {
    pub fn new(block: Block, raw: &[u8]) -> Self {
        let registers = raw
            .chunks_exact(2)
            .enumerate()
            .map(|(i, word)| {
                (
                    block.base_register() + i as u16,
                    u16::from_be_bytes([word[0], word[1]]),
                )
            })
            .collect();
        Self {
            block,
            hex: hex::encode(raw),
            registers,
        }
    }
}

fn check_len(block: Block, raw: &[u8]) -> Result<(), RegisterError> {
    if raw.len() != block.byte_len() {
        return Err(RegisterError::BlockLength {
            block,
            expected: block.byte_len(),
            actual: raw.len(),
        });
    }
    Ok(())
}
