//! The frame envelope.
//!
//! Each direction of a link carries a stream of length-prefixed frames:
//!
//! ```text
//! [length: u64 big-endian] [id: u8] [flags: u8] [token: ULEB128] [body]
//! ```
//!
//! The length covers everything after the prefix. `id` selects a message in
//! the sender's catalogue; `flags` distinguishes requests from replies and
//! marks error replies; the correlation token pairs a reply with its
//! request; the body is a COD document (or UTF-8 error text on an
//! error-flagged reply).

use bitflags::bitflags;
use bytes::{BufMut, Bytes};
use thiserror::Error;

use crate::cod::CodError;

bitflags! {
    /// The frame flag byte.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FrameFlags: u8 {
        /// The frame answers the request that used the same token.
        const RESPONSE = 1 << 0;
        /// The body is UTF-8 error text rather than a COD document.
        const ERROR = 1 << 1;
    }
}

/// Frame parsing and encoding failures. All of them are fatal to the link
/// that observes them.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// The payload ended inside the envelope.
    #[error("truncated frame: {len} byte payload")]
    Truncated {
        /// Payload length observed.
        len: usize,
    },

    /// The flag byte had bits outside the defined set.
    #[error("invalid frame flags {0:#04x}")]
    InvalidFlags(u8),

    /// The correlation token was not a valid ULEB128 value.
    #[error("invalid correlation token: {0}")]
    InvalidToken(CodError),
}

/// One protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Message id within the sender's catalogue.
    pub id: u8,
    /// Response/error flags.
    pub flags: FrameFlags,
    /// Correlation token pairing replies with requests.
    pub token: u64,
    /// COD document, or UTF-8 error text when `ERROR` is set.
    pub body: Bytes,
}

impl Frame {
    /// Width of the length prefix.
    pub const LENGTH_PREFIX: usize = 8;

    /// Inbound payload cap. Package file transfers dominate frame size, so
    /// the cap is generous; anything beyond it is a fatal framing error.
    pub const MAX_PAYLOAD_LEN: u64 = 1 << 28;

    /// A request frame (no flags set).
    pub fn request(id: u8, token: u64, body: Bytes) -> Self {
        Self { id, flags: FrameFlags::empty(), token, body }
    }

    /// A successful reply to the request that used `token`.
    pub fn response(id: u8, token: u64, body: Bytes) -> Self {
        Self { id, flags: FrameFlags::RESPONSE, token, body }
    }

    /// An error-flagged reply carrying the failure's text.
    pub fn error_response(id: u8, token: u64, message: &str) -> Self {
        Self {
            id,
            flags: FrameFlags::RESPONSE | FrameFlags::ERROR,
            token,
            body: Bytes::copy_from_slice(message.as_bytes()),
        }
    }

    /// Payload length (everything after the length prefix).
    pub fn payload_len(&self) -> usize {
        let mut token_len = 1;
        let mut token = self.token >> 7;
        while token != 0 {
            token_len += 1;
            token >>= 7;
        }
        2 + token_len + self.body.len()
    }

    /// Write the full wire form: length prefix, envelope, body.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u64(self.payload_len() as u64);
        dst.put_u8(self.id);
        dst.put_u8(self.flags.bits());
        let mut token = self.token;
        loop {
            let byte = (token & 0x7f) as u8;
            token >>= 7;
            if token == 0 {
                dst.put_u8(byte);
                break;
            }
            dst.put_u8(byte | 0x80);
        }
        dst.put_slice(&self.body);
    }

    /// Wire form as an owned buffer.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::LENGTH_PREFIX + self.payload_len());
        self.encode(&mut buf);
        buf
    }

    /// Parse a frame from its payload (the length prefix already consumed
    /// by the transport).
    pub fn parse_payload(payload: &[u8]) -> Result<Self, FrameError> {
        let err = || FrameError::Truncated { len: payload.len() };
        let (&id, rest) = payload.split_first().ok_or_else(err)?;
        let (&flag_byte, rest) = rest.split_first().ok_or_else(err)?;
        let flags = FrameFlags::from_bits(flag_byte).ok_or(FrameError::InvalidFlags(flag_byte))?;

        let mut token = 0u64;
        let mut shift = 0u32;
        let mut index = 0usize;
        loop {
            let byte = *rest.get(index).ok_or_else(err)?;
            index += 1;
            let low = u64::from(byte & 0x7f);
            if shift >= 64 {
                if low != 0 {
                    return Err(FrameError::InvalidToken(CodError::IntegerOverflow));
                }
            } else {
                if shift != 0 && (low << shift) >> shift != low {
                    return Err(FrameError::InvalidToken(CodError::IntegerOverflow));
                }
                token |= low << shift;
            }
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
        }

        Ok(Self { id, flags, token, body: Bytes::copy_from_slice(&rest[index..]) })
    }
}
