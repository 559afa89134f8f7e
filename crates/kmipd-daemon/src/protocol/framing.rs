//! Length-prefixed frame codec for the KMIP TCP transport.
//!
//! Each KMIP message on a stream is preceded by an 8-byte header:
//!
//! ```text
//! +----------------+----------------+--------------------------+---------+
//! | Version (2, BE)| Reserved (2)   | Total length (4, BE)     | Payload |
//! +----------------+----------------+--------------------------+---------+
//! ```
//!
//! The total length covers the header itself, so the smallest valid frame is
//! 8 bytes. The version bytes are a transport-layer constant: this server
//! always writes `0x0200` regardless of the `ProtocolVersion` carried inside
//! the message, and ignores the value on the read path.
//!
//! The frame length is validated before any allocation; frames above
//! [`MAX_FRAME_SIZE`] are rejected.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Length of the frame header.
pub const HEADER_LEN: usize = 8;

/// Maximum accepted frame size (header + payload): 16 MiB.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Version written into every outgoing frame header.
pub const FRAME_VERSION: u16 = 0x0200;

/// Errors from the framed transport.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The header announced a length below 8 or above [`MAX_FRAME_SIZE`].
    #[error("invalid KMIP message length: {0}")]
    InvalidLength(u32),

    /// The peer closed the connection in the middle of a frame.
    #[error("incomplete KMIP message on connection close")]
    Incomplete,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Frame codec implementing the KMIP length-prefixed framing, for use with
/// [`tokio_util::codec::Framed`].
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl FrameCodec {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_frame_size: MAX_FRAME_SIZE,
        }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, FrameError> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        // Bytes 0-3 are version + reserved; only the length is load-bearing.
        let total = u32::from_be_bytes([src[4], src[5], src[6], src[7]]);
        let total_len = total as usize;
        if total_len < HEADER_LEN || total_len > self.max_frame_size {
            return Err(FrameError::InvalidLength(total));
        }

        if src.len() < total_len {
            src.reserve(total_len - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        Ok(Some(src.split_to(total_len - HEADER_LEN).freeze()))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, FrameError> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => Err(FrameError::Incomplete),
        }
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), FrameError> {
        let total = HEADER_LEN + item.len();
        if total > self.max_frame_size {
            return Err(FrameError::InvalidLength(total as u32));
        }

        dst.reserve(total);
        dst.put_u16(FRAME_VERSION);
        dst.put_u16(0x0000);
        dst.put_u32(total as u32);
        dst.extend_from_slice(&item);
        Ok(())
    }
}
