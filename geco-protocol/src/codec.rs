//! Incremental frame decoder.
//!
//! Bytes arrive from the bus in arbitrary chunks. The decoder accumulates
//! them, scans for the start marker and only hands out frames whose header
//! and payload checksums both validate. A frame that fails validation costs
//! exactly one byte: the decoder steps past the bogus marker and rescans, so
//! a valid frame that follows a corrupted one is never lost.

use crate::error::ProtocolError;
use crate::frame::{Frame, START_BYTE};
use bytes::{Buf, BytesMut};

/// Counters kept by a [`FrameDecoder`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecoderStats {
    /// Frames successfully decoded.
    pub frames: u64,
    /// Candidate frames rejected by a checksum or framing check.
    pub corrupt: u64,
    /// Valid frames skipped because they carry no register header.
    pub skipped_frames: u64,
    /// Bytes discarded while searching for a start marker.
    pub discarded_bytes: u64,
}

/// Accumulates bus bytes and extracts validated frames.
pub struct FrameDecoder {
    buffer: BytesMut,
    stats: DecoderStats,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(1024),
            stats: DecoderStats::default(),
        }
    }

    /// Appends data to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Attempts to decode the next frame from the buffer.
    ///
    /// Returns `Ok(None)` when no complete frame is buffered yet. An `Err`
    /// reports a rejected candidate; the decoder has already resynchronized
    /// past it and the call can simply be repeated.
    pub fn decode_frame(&mut self) -> Result<Option<Frame>, ProtocolError> {
        self.skip_to_marker();

        match Frame::decode(&mut self.buffer) {
            Ok(Some(frame)) => {
                self.stats.frames += 1;
                Ok(Some(frame))
            }
            Ok(None) => Ok(None),
            Err(err @ ProtocolError::NoRegisterHeader { len, .. }) => {
                self.buffer.advance(len);
                self.stats.skipped_frames += 1;
                Err(err)
            }
            Err(err) => {
                self.buffer.advance(1);
                self.stats.corrupt += 1;
                Err(err)
            }
        }
    }

    /// Decodes every complete frame in the buffer, dropping rejected candidates.
    pub fn drain_frames(&mut self) -> Vec<Frame> {
        let mut frames = Vec::new();
        loop {
            match self.decode_frame() {
                Ok(Some(frame)) => frames.push(frame),
                Ok(None) => break,
                Err(_) => continue,
            }
        }
        frames
    }

    /// Drops leading bytes that cannot start a frame.
    fn skip_to_marker(&mut self) {
        let skip = self
            .buffer
            .iter()
            .position(|&b| b == START_BYTE)
            .unwrap_or(self.buffer.len());
        if skip > 0 {
            self.buffer.advance(skip);
            self.stats.discarded_bytes += skip as u64;
        }
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Returns the decoder counters.
    pub fn stats(&self) -> DecoderStats {
        self.stats
    }

    /// Clears the internal buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}
