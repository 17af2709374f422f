//! Binary frame format for GECO.
//!
//! Frame layout (8 bytes header + payload):
//!
//! ```text
//! +------+----------+----------+------+------+------+-------------+------+
//! | 0x69 | dst_hard | src_hard | 0x84 | 0x00 | 0x00 | payload_len | crc8 |
//! +------+----------+----------+------+------+------+-------------+------+
//! | dst_soft | 0x00 | src_soft | 0x00 | function | sub_function | 0x00   |
//! | register_count | start_lo | start_hi | data ... | crc16_hi | crc16_lo |
//! +--------------------------------------------------------------------+
//! ```
//!
//! `payload_len` counts every payload byte including the CRC-16. The CRC-8
//! covers the seven header bytes before it; the CRC-16 covers the payload up
//! to (not including) itself.

use crate::checksum::{header_crc, payload_crc};
use crate::error::ProtocolError;
use crate::MAX_PAYLOAD_SIZE;
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

/// Start-of-frame marker.
pub const START_BYTE: u8 = 0x69;

/// Fixed third header byte.
pub const HEADER_MARKER: u8 = 0x84;

/// Size of the frame header in bytes.
pub const HEADER_SIZE: usize = 8;

/// Size of the payload checksum in bytes.
pub const PAYLOAD_CRC_SIZE: usize = 2;

/// Offset of register data within the payload.
pub const DATA_OFFSET: usize = 10;

/// Smallest payload that still carries addressing, a function code and a CRC.
pub const MIN_PAYLOAD_SIZE: usize = 5 + PAYLOAD_CRC_SIZE;

/// Largest register data section that fits the one-byte length field.
pub const MAX_DATA_SIZE: usize = MAX_PAYLOAD_SIZE - DATA_OFFSET - PAYLOAD_CRC_SIZE;

/// Function codes.
pub mod function {
    /// Read status registers (request).
    pub const STATUS_REQUEST: u8 = 0x40;
    /// Status registers (response).
    pub const STATUS_RESPONSE: u8 = 0x50;
    /// Read or write config registers (request).
    pub const CONFIG_REQUEST: u8 = 0x60;
    /// Config registers (response).
    pub const CONFIG_RESPONSE: u8 = 0x70;

    /// Offset between a request code and its response code.
    pub const RESPONSE_OFFSET: u8 = 0x10;
}

/// Sub-function codes.
pub mod sub_function {
    /// Register read.
    pub const READ: u8 = 0x80;
    /// Full block write.
    pub const WRITE: u8 = 0xA0;
}

/// A bus endpoint: physical RS485 address plus logical address.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub hard: u8,
    pub soft: u8,
}

impl Endpoint {
    pub const fn new(hard: u8, soft: u8) -> Self {
        Self { hard, soft }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.hard, self.soft)
    }
}

/// A parsed GECO frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Addressed endpoint.
    pub destination: Endpoint,
    /// Sending endpoint.
    pub source: Endpoint,
    /// Function code.
    pub function: u8,
    /// Sub-function code.
    pub sub_function: u8,
    /// First register of the window.
    pub register_start: u16,
    /// Number of 16-bit registers in the window.
    pub register_count: u8,
    /// Register data (empty for read requests).
    pub data: Bytes,
}

impl Frame {
    /// Builds a register read request from `controller` to `device`.
    pub fn read_request(
        controller: Endpoint,
        device: Endpoint,
        function: u8,
        register_start: u16,
        register_count: u8,
    ) -> Self {
        Self {
            destination: device,
            source: controller,
            function,
            sub_function: sub_function::READ,
            register_start,
            register_count,
            data: Bytes::new(),
        }
    }

    /// Builds a config block write carrying every register of the window.
    pub fn write_request(
        controller: Endpoint,
        device: Endpoint,
        register_start: u16,
        data: Bytes,
    ) -> Self {
        Self {
            destination: device,
            source: controller,
            function: function::CONFIG_REQUEST,
            sub_function: sub_function::WRITE,
            register_start,
            register_count: (data.len() / 2) as u8,
            data,
        }
    }

    /// Builds the response a device would send for this request.
    pub fn response_to(&self, data: Bytes) -> Self {
        Self {
            destination: self.source,
            source: self.destination,
            function: self.function.wrapping_add(function::RESPONSE_OFFSET),
            sub_function: self.sub_function,
            register_start: self.register_start,
            register_count: self.register_count,
            data,
        }
    }

    /// Returns whether this frame is a response (0x50 or 0x70).
    pub fn is_response(&self) -> bool {
        matches!(
            self.function,
            function::STATUS_RESPONSE | function::CONFIG_RESPONSE
        )
    }

    /// Returns whether this frame is a block write request.
    pub fn is_block_write(&self) -> bool {
        self.function == function::CONFIG_REQUEST && self.sub_function == sub_function::WRITE
    }

    /// Function code a device answers this request with.
    pub fn expected_response_function(&self) -> u8 {
        self.function.wrapping_add(function::RESPONSE_OFFSET)
    }

    /// Returns whether the frame travels between `a` and `b`, in either direction.
    pub fn is_between(&self, a: Endpoint, b: Endpoint) -> bool {
        (self.source == a && self.destination == b) || (self.source == b && self.destination == a)
    }

    /// Encodes the frame into bytes.
    pub fn encode(&self) -> Result<BytesMut, ProtocolError> {
        if self.data.len() > MAX_DATA_SIZE {
            return Err(ProtocolError::DataTooLarge {
                size: self.data.len(),
                max: MAX_DATA_SIZE,
            });
        }

        let payload_len = DATA_OFFSET + self.data.len() + PAYLOAD_CRC_SIZE;
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload_len);

        // Header
        buf.put_u8(START_BYTE);
        buf.put_u8(self.destination.hard);
        buf.put_u8(self.source.hard);
        buf.put_u8(HEADER_MARKER);
        buf.put_u8(0x00);
        buf.put_u8(0x00);
        buf.put_u8(payload_len as u8);
        let crc = header_crc(&buf[..HEADER_SIZE - 1]);
        buf.put_u8(crc);

        // Payload
        buf.put_u8(self.destination.soft);
        buf.put_u8(0x00);
        buf.put_u8(self.source.soft);
        buf.put_u8(0x00);
        buf.put_u8(self.function);
        buf.put_u8(self.sub_function);
        buf.put_u8(0x00);
        buf.put_u8(self.register_count);
        buf.put_u16_le(self.register_start);
        buf.put_slice(&self.data);

        let crc = payload_crc(&buf[HEADER_SIZE..]);
        buf.put_u16(crc);

        Ok(buf)
    }

    /// Decodes a frame from the head of `buf`.
    ///
    /// Returns `Ok(Some(frame))` and consumes the frame when one is complete,
    /// `Ok(None)` if more data is needed, or `Err` without consuming anything.
    pub fn decode(buf: &mut BytesMut) -> Result<Option<Self>, ProtocolError> {
        let Some(&first) = buf.first() else {
            return Ok(None);
        };
        if first != START_BYTE {
            return Err(ProtocolError::InvalidStartByte(first));
        }
        if buf.len() < HEADER_SIZE {
            return Ok(None);
        }

        // The header is checked before waiting on the payload, so a corrupted
        // length byte cannot stall the decoder.
        let crc_expected = buf[HEADER_SIZE - 1];
        let crc_actual = header_crc(&buf[..HEADER_SIZE - 1]);
        if crc_actual != crc_expected {
            return Err(ProtocolError::HeaderCrcMismatch {
                expected: crc_expected,
                actual: crc_actual,
            });
        }

        let payload_len = buf[6] as usize;
        if payload_len < MIN_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooShort {
                len: payload_len,
                min: MIN_PAYLOAD_SIZE,
            });
        }

        let total_len = HEADER_SIZE + payload_len;
        if buf.len() < total_len {
            return Ok(None);
        }

        let body_end = total_len - PAYLOAD_CRC_SIZE;
        let crc_expected = u16::from_be_bytes([buf[body_end], buf[body_end + 1]]);
        let crc_actual = payload_crc(&buf[HEADER_SIZE..body_end]);
        if crc_actual != crc_expected {
            return Err(ProtocolError::PayloadCrcMismatch {
                expected: crc_expected,
                actual: crc_actual,
            });
        }

        let body = &buf[HEADER_SIZE..body_end];
        if body.len() < DATA_OFFSET {
            return Err(ProtocolError::NoRegisterHeader {
                function: body[4],
                len: total_len,
            });
        }

        let destination = Endpoint::new(buf[1], body[0]);
        let source = Endpoint::new(buf[2], body[2]);
        let function = body[4];
        let sub_function = body[5];
        let register_count = body[7];
        let register_start = u16::from_le_bytes([body[8], body[9]]);

        let frame_bytes = buf.split_to(total_len).freeze();
        let data = frame_bytes.slice(HEADER_SIZE + DATA_OFFSET..body_end);

        Ok(Some(Self {
            destination,
            source,
            function,
            sub_function,
            register_start,
            register_count,
            data,
        }))
    }
}
