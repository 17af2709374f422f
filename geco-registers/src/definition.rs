//! Register definitions.
//!
//! A definition ties a register name to its position in a block and the rule
//! used to turn its raw bytes into a [`Value`] and back. Multi-byte registers
//! are big-endian, as the controller stores 16-bit words.

use crate::block::Block;
use crate::error::RegisterError;
use crate::value::Value;
use serde::Serialize;

/// Number of hours covered by a time program.
pub const TIME_PROGRAM_HOURS: usize = 24;

/// How raw register bytes map to a semantic value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ValueKind {
    /// Two's-complement integer divided by `divisor` (0.1 °C per unit for 10).
    Scaled { divisor: u16 },
    /// Unsigned integer.
    Unsigned,
    /// Unsigned integer shifted by a fixed amount (years stored since 2000).
    Offset(i64),
    /// Zero is false, anything else true.
    Bool,
    /// Enumerated code with labels.
    Enum(&'static [EnumOption]),
    /// A single bit of a status word.
    Flag { mask: u16 },
    /// One bit per hour of the day, bit 0 = 00:00.
    TimeProgram,
}

/// Whether a register may be written back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Access {
    ReadOnly,
    ReadWrite,
}

/// Inclusive range of valid values, in engineering units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Range {
    pub min: f64,
    pub max: f64,
}

/// A labelled enumeration code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EnumOption {
    pub code: u16,
    pub label: &'static str,
}

/// A named register within a block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegisterDefinition {
    pub name: &'static str,
    pub block: Block,
    /// Byte offset within the block.
    pub offset: usize,
    /// Width in bytes.
    pub width: usize,
    pub kind: ValueKind,
    pub access: Access,
    pub range: Option<Range>,
    pub unit: Option<&'static str>,
    pub description: &'static str,
}

impl RegisterDefinition {
    /// A read-only 16-bit register at `index` registers into the block.
    pub const fn word(block: Block, name: &'static str, index: usize, kind: ValueKind) -> Self {
        Self {
            name,
            block,
            offset: index * 2,
            width: 2,
            kind,
            access: Access::ReadOnly,
            range: None,
            unit: None,
            description: "",
        }
    }

    /// A read-only single byte at `offset` bytes into the block.
    pub const fn byte(block: Block, name: &'static str, offset: usize, kind: ValueKind) -> Self {
        Self {
            offset,
            width: 1,
            ..Self::word(block, name, 0, kind)
        }
    }

    /// A time program spanning two registers starting at `index`.
    pub const fn time_program(block: Block, name: &'static str, index: usize) -> Self {
        Self {
            width: 4,
            ..Self::word(block, name, index, ValueKind::TimeProgram)
        }
    }

    pub const fn writable(self) -> Self {
        Self {
            access: Access::ReadWrite,
            ..self
        }
    }

    pub const fn range(self, min: f64, max: f64) -> Self {
        Self {
            range: Some(Range { min, max }),
            ..self
        }
    }

    pub const fn unit(self, unit: &'static str) -> Self {
        Self {
            unit: Some(unit),
            ..self
        }
    }

    pub const fn describe(self, description: &'static str) -> Self {
        Self {
            description,
            ..self
        }
    }

    /// Byte range the register occupies within its block.
    pub fn span(&self) -> std::ops::Range<usize> {
        self.offset..self.offset + self.width
    }

    pub fn is_writable(&self) -> bool {
        self.access == Access::ReadWrite
    }

    /// Decodes the register from exactly `self.width` bytes.
    pub fn decode(&self, bytes: &[u8]) -> Value {
        let raw = read_be(bytes);
        match self.kind {
            ValueKind::Scaled { divisor } => {
                let signed = sign_extend(raw, self.width);
                Value::Float(signed as f64 / f64::from(divisor))
            }
            ValueKind::Unsigned => Value::Integer(i64::from(raw)),
            ValueKind::Offset(base) => Value::Integer(i64::from(raw) + base),
            ValueKind::Bool => Value::Bool(raw != 0),
            ValueKind::Enum(options) => match options.iter().find(|o| u32::from(o.code) == raw) {
                Some(option) => Value::Text(option.label.to_string()),
                None => Value::Integer(i64::from(raw)),
            },
            ValueKind::Flag { mask } => Value::Bool(raw & u32::from(mask) != 0),
            ValueKind::TimeProgram => Value::Text(
                (0..TIME_PROGRAM_HOURS)
                    .map(|hour| if raw & (1 << hour) != 0 { '1' } else { '0' })
                    .collect(),
            ),
        }
    }

    /// Writes `value` over the register's bytes in `bytes` (exactly
    /// `self.width` long). Flags only touch their own bit.
    pub fn encode_into(&self, value: &Value, bytes: &mut [u8]) -> Result<(), RegisterError> {
        let raw = self.to_raw(value)?;
        let raw = match self.kind {
            ValueKind::Flag { mask } => {
                let current = read_be(bytes);
                if raw != 0 {
                    current | u32::from(mask)
                } else {
                    current & !u32::from(mask)
                }
            }
            _ => raw,
        };
        write_be(raw, bytes);
        Ok(())
    }

    /// Checks `value` against the register's kind and range and returns the
    /// raw register content (for flags: 1 to set, 0 to clear).
    pub fn to_raw(&self, value: &Value) -> Result<u32, RegisterError> {
        match self.kind {
            ValueKind::Scaled { divisor } => {
                let v = value
                    .as_f64()
                    .filter(|_| !matches!(value, Value::Bool(_)))
                    .ok_or_else(|| self.invalid(value, "expected a number"))?;
                let scale = f64::from(divisor);
                let raw = (v * scale).round();
                if let Some(range) = self.range {
                    if raw < (range.min * scale).round() || raw > (range.max * scale).round() {
                        return Err(self.out_of_range(value, range));
                    }
                }
                let limit = signed_limit(self.width);
                if raw < -limit || raw > limit - 1.0 {
                    return Err(self.invalid(value, "does not fit the register"));
                }
                Ok((raw as i64 as u32) & width_mask(self.width))
            }
            ValueKind::Unsigned | ValueKind::Offset(_) => {
                let v = match value {
                    Value::Bool(_) => None,
                    other => other.as_i64(),
                }
                .ok_or_else(|| self.invalid(value, "expected an integer"))?;
                if let Some(range) = self.range {
                    if (v as f64) < range.min || (v as f64) > range.max {
                        return Err(self.out_of_range(value, range));
                    }
                }
                let raw = match self.kind {
                    ValueKind::Offset(base) => v - base,
                    _ => v,
                };
                if raw < 0 || raw as u64 > u64::from(width_mask(self.width)) {
                    return Err(self.invalid(value, "does not fit the register"));
                }
                Ok(raw as u32)
            }
            ValueKind::Bool | ValueKind::Flag { .. } => value
                .as_bool()
                .map(u32::from)
                .ok_or_else(|| self.invalid(value, "expected on/off")),
            ValueKind::Enum(options) => {
                let found = match value {
                    Value::Text(label) => options
                        .iter()
                        .find(|o| o.label.eq_ignore_ascii_case(label.trim())),
                    other => other
                        .as_i64()
                        .and_then(|code| options.iter().find(|o| i64::from(o.code) == code)),
                };
                found.map(|o| u32::from(o.code)).ok_or_else(|| {
                    let labels: Vec<String> = options
                        .iter()
                        .map(|o| format!("{}={}", o.code, o.label))
                        .collect();
                    self.rejected(value, format!("one of {}", labels.join(", ")))
                })
            }
            ValueKind::TimeProgram => match value {
                Value::Text(hours) => parse_hours(hours.trim())
                    .ok_or_else(|| self.invalid(value, "expected 24 characters of 0/1")),
                other => other
                    .as_i64()
                    .filter(|mask| (0..1 << TIME_PROGRAM_HOURS).contains(mask))
                    .map(|mask| mask as u32)
                    .ok_or_else(|| self.invalid(value, "expected a 24-bit hour mask")),
            },
        }
    }

    /// Parses operator input into a value of the register's kind.
    pub fn parse_value(&self, input: &str) -> Result<Value, RegisterError> {
        let input = input.trim();
        let value = match self.kind {
            ValueKind::Scaled { .. } => input.parse::<f64>().ok().map(Value::Float),
            ValueKind::Unsigned | ValueKind::Offset(_) => {
                input.parse::<i64>().ok().map(Value::Integer)
            }
            ValueKind::Bool | ValueKind::Flag { .. } => {
                Value::Text(input.to_string()).as_bool().map(Value::Bool)
            }
            ValueKind::Enum(_) => Some(match input.parse::<i64>() {
                Ok(code) => Value::Integer(code),
                Err(_) => Value::Text(input.to_string()),
            }),
            ValueKind::TimeProgram => {
                if input.len() == TIME_PROGRAM_HOURS {
                    Some(Value::Text(input.to_string()))
                } else {
                    input.parse::<i64>().ok().map(Value::Integer)
                }
            }
        };
        value.ok_or_else(|| self.invalid(&Value::Text(input.to_string()), "cannot parse"))
    }

    fn invalid(&self, value: &Value, reason: &str) -> RegisterError {
        RegisterError::InvalidValue {
            name: self.name.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }

    fn out_of_range(&self, value: &Value, range: Range) -> RegisterError {
        self.rejected(value, format!("{}..={}", range.min, range.max))
    }

    fn rejected(&self, value: &Value, expected: String) -> RegisterError {
        RegisterError::OutOfRange {
            name: self.name.to_string(),
            value: value.to_string(),
            expected,
        }
    }
}

fn read_be(bytes: &[u8]) -> u32 {
    bytes.iter().fold(0u32, |acc, &b| (acc << 8) | u32::from(b))
}

fn write_be(raw: u32, bytes: &mut [u8]) {
    let width = bytes.len();
    for (i, byte) in bytes.iter_mut().enumerate() {
        *byte = (raw >> (8 * (width - 1 - i))) as u8;
    }
}

fn width_mask(width: usize) -> u32 {
    if width >= 4 {
        u32::MAX
    } else {
        (1u32 << (8 * width)) - 1
    }
}

fn signed_limit(width: usize) -> f64 {
    (1u64 << (8 * width.min(4) - 1)) as f64
}

fn sign_extend(raw: u32, width: usize) -> i64 {
    let bits = 8 * width.min(4) as u32;
    let shift = 64 - bits;
    ((i64::from(raw)) << shift) >> shift
}

fn parse_hours(hours: &str) -> Option<u32> {
    if hours.len() != TIME_PROGRAM_HOURS {
        return None;
    }
    hours
        .chars()
        .enumerate()
        .try_fold(0u32, |mask, (hour, c)| match c {
            '1' => Some(mask | 1 << hour),
            '0' => Some(mask),
            _ => None,
        })
}
