//! Binary frames for chunked call replies and flow control.
//!
//! # Layout
//!
//! ```text
//! opcode 1 (final chunk)     [01][call_id u32 BE][total_len u32 BE][payload...]
//! opcode 2 (non-final chunk) [02][call_id u32 BE][total_len u32 BE][payload...]
//! opcode 3 (ack)             [03][bytes u32 BE]
//! ```
//!
//! A reply longer than [`MAX_CHUNK_SIZE`] is sent as a run of opcode-2
//! chunks closed by one opcode-1 chunk. Every chunk repeats the total
//! length, receivers only read it from the first one.

// ============================================================================
// Imports
// ============================================================================

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::identifiers::CallId;

// ============================================================================
// Constants
// ============================================================================

/// Largest payload carried by a single chunk.
pub const MAX_CHUNK_SIZE: usize = 16_000;

/// Bytes in a chunk header: opcode, call id, total length.
pub const CHUNK_HEADER_LEN: usize = 9;

/// Bytes in an ack frame: opcode, byte count.
pub const ACK_LEN: usize = 5;

const OP_FINAL: u8 = 1;
const OP_PARTIAL: u8 = 2;
const OP_ACK: u8 = 3;

// ============================================================================
// Frame
// ============================================================================

/// A decoded binary frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// One segment of a binary call reply.
    Chunk {
        /// Call the segment belongs to.
        call_id: CallId,
        /// `true` for the final segment (opcode 1).
        last: bool,
        /// Length of the whole reply.
        total_len: u32,
        /// Segment bytes.
        payload: Bytes,
    },

    /// Flow-control acknowledgment.
    Ack {
        /// Bytes the far end has consumed.
        bytes: u32,
    },
}

impl Frame {
    /// Decodes a frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProtocolViolation`] for truncated frames and
    /// unknown opcodes.
    pub fn decode(mut data: Bytes) -> Result<Self> {
        if data.is_empty() {
            return Err(Error::protocol("empty binary frame"));
        }

        let opcode = data.get_u8();
        match opcode {
            OP_FINAL | OP_PARTIAL => {
                if data.len() < CHUNK_HEADER_LEN - 1 {
                    return Err(Error::protocol(format!(
                        "truncated chunk header: {} bytes",
                        data.len() + 1
                    )));
                }
                let call_id = CallId::new(data.get_u32());
                let total_len = data.get_u32();
                Ok(Self::Chunk {
                    call_id,
                    last: opcode == OP_FINAL,
                    total_len,
                    payload: data,
                })
            }
            OP_ACK => {
                if data.len() < ACK_LEN - 1 {
                    return Err(Error::protocol("truncated ack frame"));
                }
                Ok(Self::Ack {
                    bytes: data.get_u32(),
                })
            }
            other => Err(Error::protocol(format!("unknown opcode {other}"))),
        }
    }

    /// Encodes the frame.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        match self {
            Self::Chunk {
                call_id,
                last,
                total_len,
                payload,
            } => {
                let mut out = BytesMut::with_capacity(CHUNK_HEADER_LEN + payload.len());
                out.put_u8(if *last { OP_FINAL } else { OP_PARTIAL });
                out.put_u32(call_id.as_u32());
                out.put_u32(*total_len);
                out.put_slice(payload);
                out.freeze()
            }
            Self::Ack { bytes } => {
                let mut out = BytesMut::with_capacity(ACK_LEN);
                out.put_u8(OP_ACK);
                out.put_u32(*bytes);
                out.freeze()
            }
        }
    }
}

// ============================================================================
// Chunking
// ============================================================================

/// Splits a binary reply into encoded chunk frames.
///
/// An empty payload still yields one final chunk so the caller resolves.
///
/// # Errors
///
/// Returns [`Error::ProtocolViolation`] if the payload does not fit the
/// 32-bit length field.
pub fn chunk_reply(call_id: CallId, payload: &Bytes) -> Result<Vec<Bytes>> {
    let total_len = u32::try_from(payload.len())
        .map_err(|_| Error::protocol(format!("reply too large: {} bytes", payload.len())))?;

    if payload.is_empty() {
        let frame = Frame::Chunk {
            call_id,
            last: true,
            total_len: 0,
            payload: Bytes::new(),
        };
        return Ok(vec![frame.encode()]);
    }

    let mut frames = Vec::with_capacity(payload.len().div_ceil(MAX_CHUNK_SIZE));
    let mut offset = 0;
    while offset < payload.len() {
        let end = (offset + MAX_CHUNK_SIZE).min(payload.len());
        let frame = Frame::Chunk {
            call_id,
            last: end == payload.len(),
            total_len,
            payload: payload.slice(offset..end),
        };
        frames.push(frame.encode());
        offset = end;
    }
    Ok(frames)
}

// ============================================================================
// Reassembly
// ============================================================================

/// Receive-side buffer for one chunked reply.
///
/// The buffer grows with the chunks actually received, so a bogus
/// declared length costs nothing until data arrives to back it.
#[derive(Debug)]
pub struct Reassembly {
    /// Bytes received so far.
    buf: BytesMut,
    /// Length declared by the first chunk.
    expected: usize,
}

impl Reassembly {
    /// Starts a reply of `total_len` bytes.
    #[must_use]
    pub fn new(total_len: u32) -> Self {
        let expected = total_len as usize;
        Self {
            buf: BytesMut::with_capacity(expected.min(MAX_CHUNK_SIZE)),
            expected,
        }
    }

    /// Appends `payload` at the running offset.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProtocolViolation`] if the chunk overruns the
    /// declared length.
    pub fn push(&mut self, payload: &[u8]) -> Result<()> {
        let end = self.buf.len() + payload.len();
        if end > self.expected {
            return Err(Error::protocol(format!(
                "chunk overruns declared length: {end} > {}",
                self.expected
            )));
        }
        self.buf.extend_from_slice(payload);
        Ok(())
    }

    /// Bytes received so far.
    #[inline]
    #[must_use]
    pub fn received(&self) -> usize {
        self.buf.len()
    }

    /// Declared total length.
    #[inline]
    #[must_use]
    pub fn expected(&self) -> usize {
        self.expected
    }

    /// Returns the assembled reply.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProtocolViolation`] if fewer bytes arrived than
    /// the first chunk declared.
    pub fn finish(self) -> Result<Bytes> {
        if self.buf.len() != self.expected {
            return Err(Error::protocol(format!(
                "reply ended short of declared length: {} < {}",
                self.buf.len(),
                self.expected
            )));
        }
        Ok(self.buf.freeze())
    }
}

// ============================================================================
// Tests
// ============================================================================
