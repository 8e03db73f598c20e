//! AESP wire frame: header layout, encode/decode, and the stream framer.
//!
//! Frame layout (all multi-byte integers big-endian):
//! ```text
//! +--------+--------+--------+--------+--------+--------+--------+--------+
//! | magic (2)       | version| type   | length (4)                       |
//! +--------+--------+--------+--------+--------+--------+--------+--------+
//! | payload (length bytes)                                               |
//! +------------------------------------------------------------------------+
//! ```
//!
//! Header size is fixed at 8 bytes. Payload content is interpreted per
//! message type (see `super::message`).

use super::message::MessageType;
use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

/// Magic bytes, big-endian: `0xAE50`.
pub const MAGIC: u16 = 0xAE50;

/// Only accepted protocol version.
pub const VERSION: u8 = 0x01;

/// Fixed header size in bytes.
pub const HEADER_SIZE: usize = 8;

/// Maximum payload size: 16 MiB.
pub const MAX_PAYLOAD_BYTES: u32 = 16 * 1024 * 1024;

/// Errors produced while decoding a frame from a byte buffer.
///
/// Note: running out of bytes is not an error here — see
/// [`Frame::decode`], which returns `Ok(None)` in that case so callers
/// retry with more data rather than discarding the buffer (spec.md §7).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("invalid magic: expected {:04X}, got {received:04X}", MAGIC)]
    InvalidMagic { received: u16 },

    #[error("unsupported protocol version: {received:#04x}")]
    UnsupportedVersion { received: u8 },

    #[error("unknown message type: {raw:#04x}")]
    UnknownMessageType { raw: u8 },

    #[error("payload too large: {size} bytes (max {MAX_PAYLOAD_BYTES})")]
    PayloadTooLarge { size: u32 },
}

impl FrameError {
    /// Whether this error can be isolated to a single frame: the
    /// connection survives and the next frame is attempted. `InvalidMagic`
    /// and `PayloadTooLarge` cannot be isolated (see spec.md §4.2/§7).
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            FrameError::InvalidMagic { .. } | FrameError::PayloadTooLarge { .. }
        )
    }
}

/// A single decoded AESP message: a type tag plus an opaque payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub msg_type: MessageType,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(msg_type: MessageType, payload: Vec<u8>) -> Self {
        Self { msg_type, payload }
    }

    pub fn empty(msg_type: MessageType) -> Self {
        Self::new(msg_type, Vec::new())
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Encode this frame to bytes. Total: always succeeds, always
    /// produces `HEADER_SIZE + payload.len()` bytes.
    pub fn encode_to(&self, dst: &mut BytesMut) {
        dst.reserve(HEADER_SIZE + self.payload.len());
        dst.put_u16(MAGIC);
        dst.put_u8(VERSION);
        dst.put_u8(self.msg_type.to_u8());
        dst.put_u32(self.payload.len() as u32);
        dst.extend_from_slice(&self.payload);
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + self.payload.len());
        self.encode_to(&mut buf);
        buf.to_vec()
    }

    /// Decode exactly one frame from the front of `buf`, per spec.md §4.1.
    ///
    /// Returns:
    /// - `Ok(Some((frame, consumed)))` on success. `consumed` is always
    ///   `HEADER_SIZE + length`.
    /// - `Ok(None)` when fewer than `HEADER_SIZE + length` bytes are
    ///   available yet. This is not an error: the caller must retry once
    ///   more bytes arrive, not discard the buffer.
    /// - `Err(InvalidMagic)` / `Err(PayloadTooLarge)`: unrecoverable for
    ///   this connection.
    /// - `Err(UnsupportedVersion)` / `Err(UnknownMessageType)`: this
    ///   frame's bytes are isolated and discardable; the connection
    ///   survives.
    pub fn decode(buf: &[u8]) -> Result<Option<(Frame, usize)>, FrameError> {
        if buf.len() < HEADER_SIZE {
            return Ok(None);
        }

        let magic = u16::from_be_bytes([buf[0], buf[1]]);
        if magic != MAGIC {
            return Err(FrameError::InvalidMagic { received: magic });
        }

        let version = buf[2];
        if version != VERSION {
            return Err(FrameError::UnsupportedVersion { received: version });
        }

        let type_byte = buf[3];

        let length = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
        if length > MAX_PAYLOAD_BYTES {
            return Err(FrameError::PayloadTooLarge { size: length });
        }

        let total = HEADER_SIZE + length as usize;
        if buf.len() < total {
            return Ok(None);
        }

        let msg_type = MessageType::from_u8(type_byte)
            .ok_or(FrameError::UnknownMessageType { raw: type_byte })?;

        let payload = buf[HEADER_SIZE..total].to_vec();
        Ok(Some((Frame::new(msg_type, payload), total)))
    }
}

/// Tokio codec wrapping the stream framer (C2) for use with `Framed`.
///
/// Recoverable decode errors (`UnsupportedVersion`, `UnknownMessageType`)
/// are swallowed here: the offending frame's bytes are dropped and the
/// next call to `decode` resumes at the next frame. Fatal errors
/// propagate so the caller can close the connection.
#[derive(Debug, Default)]
pub struct FrameCodec;

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match Frame::decode(src) {
                Ok(Some((frame, consumed))) => {
                    src.advance(consumed);
                    return Ok(Some(frame));
                }
                Ok(None) => return Ok(None),
                Err(e @ FrameError::InvalidMagic { .. }) => return Err(e),
                Err(e @ FrameError::PayloadTooLarge { .. }) => return Err(e),
                Err(FrameError::UnsupportedVersion { .. })
                | Err(FrameError::UnknownMessageType { .. }) => {
                    // The frame's own bytes are well-formed enough to know
                    // its length; discard exactly that many bytes and
                    // retry with whatever follows. If the payload hasn't
                    // fully arrived yet, wait for the rest instead of
                    // discarding only the buffered prefix -- otherwise the
                    // remaining payload bytes would land on the front of
                    // the buffer and get misread as a fresh header.
                    let length = u32::from_be_bytes([src[4], src[5], src[6], src[7]]) as usize;
                    let total = HEADER_SIZE + length;
                    if src.len() < total {
                        return Ok(None);
                    }
                    src.advance(total);
                    continue;
                }
            }
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        item.encode_to(dst);
        Ok(())
    }
}

/// Find the offset of the next `MAGIC` occurrence in `buf`, if any.
///
/// Exposed for documentation/testing purposes only: spec.md §4.2
/// explicitly forbids resynchronising on `InvalidMagic`/`PayloadTooLarge`
/// by scanning for the next magic, since that risks misinterpreting
/// payload bytes as a new header. The stream framer never calls this;
/// it is kept so tests can assert the framer does *not* resync.
pub fn find_magic(buf: &[u8]) -> Option<usize> {
    let magic_bytes = MAGIC.to_be_bytes();
    buf.windows(2).position(|w| w == magic_bytes)
}

const _ASSERT_HEADER_SIZE: () = assert!(HEADER_SIZE == 8);
const _ASSERT_MAGIC: () = assert!(MAGIC == 0xAE50);
const _ASSERT_MAX_PAYLOAD: () = assert!(MAX_PAYLOAD_BYTES == 16 * 1024 * 1024);
