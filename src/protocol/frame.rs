//! Frame definitions
//!
//! A frame is a fixed 24-byte header followed by `length` payload bytes.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Result, WireError};

/// Header size in bytes (fixed, exactly 24)
pub const HEADER_SIZE: usize = 24;

/// Sentinel at offset 8 of every header
pub const MAGIC: u32 = 0x7714_30CB;

/// Default maximum payload size (16 MB)
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

/// Flag bits carried in the header's 64-bit `flags` field
pub mod flags {
    /// Payload is a UTF-8 error message instead of a response body
    pub const ERROR: u64 = 0b0001;

    /// Bits that must be zero on the wire
    pub const RESERVED_MASK: u64 = !ERROR;
}

/// Decoded frame header
///
/// ```text
/// offset  size  field
/// 0       8     sequence  (u64 BE)
/// 8       4     magic     (u32 BE)
/// 12      8     flags     (u64 BE)
/// 20      4     length    (u32 BE)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Correlation id, chosen by the requester and echoed by the responder
    pub sequence: u64,
    pub magic: u32,
    pub flags: u64,
    /// Payload byte count
    pub length: u32,
}

impl Header {
    /// Parse header fields without validating them
    pub fn parse(bytes: &[u8; HEADER_SIZE]) -> Self {
        let mut buf = &bytes[..];
        Self {
            sequence: buf.get_u64(),
            magic: buf.get_u32(),
            flags: buf.get_u64(),
            length: buf.get_u32(),
        }
    }

    /// Append the 24 header bytes to `buf`
    pub fn put(&self, buf: &mut BytesMut) {
        buf.put_u64(self.sequence);
        buf.put_u32(self.magic);
        buf.put_u64(self.flags);
        buf.put_u32(self.length);
    }

    /// Check magic, flags and the length bound
    ///
    /// Order matters: a desynchronized stream is reported as `WrongMagic`
    /// even when the garbage also looks oversized.
    pub fn validate(&self, max_frame_size: u32) -> Result<()> {
        if self.magic != MAGIC {
            return Err(WireError::WrongMagic { found: self.magic });
        }
        if self.flags & flags::RESERVED_MASK != 0 {
            return Err(WireError::UnknownType { flags: self.flags });
        }
        if self.length > max_frame_size {
            return Err(WireError::Oversize {
                length: self.length as u64,
                max: max_frame_size,
            });
        }
        Ok(())
    }

    pub fn is_error(&self) -> bool {
        self.flags & flags::ERROR != 0
    }
}

/// Role of a frame in a request/response exchange
///
/// Requests and responses share a wire encoding; which one a data frame is
/// follows from the direction it travels (client to server, or back).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Request,
    Response,
    Error,
}

/// One protocol message: header plus payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: Header,
    pub payload: Bytes,
}

impl Frame {
    fn with_flags(sequence: u64, flags: u64, payload: Bytes) -> Self {
        Self {
            header: Header {
                sequence,
                magic: MAGIC,
                flags,
                length: payload.len() as u32,
            },
            payload,
        }
    }

    /// Build a REQUEST frame
    pub fn request(sequence: u64, payload: impl Into<Bytes>) -> Self {
        Self::with_flags(sequence, 0, payload.into())
    }

    /// Build a RESPONSE frame
    pub fn response(sequence: u64, payload: impl Into<Bytes>) -> Self {
        Self::with_flags(sequence, 0, payload.into())
    }

    /// Build an ERROR frame whose payload is the UTF-8 message
    pub fn error(sequence: u64, message: &str) -> Self {
        Self::with_flags(
            sequence,
            flags::ERROR,
            Bytes::copy_from_slice(message.as_bytes()),
        )
    }

    pub fn sequence(&self) -> u64 {
        self.header.sequence
    }

    pub fn is_error(&self) -> bool {
        self.header.is_error()
    }

    /// Classify a received frame; `received_by_server` gives the direction
    ///
    /// A server receives requests, a client receives responses; an ERROR
    /// flag always wins.
    pub fn frame_type(&self, received_by_server: bool) -> FrameType {
        if self.is_error() {
            FrameType::Error
        } else if received_by_server {
            FrameType::Request
        } else {
            FrameType::Response
        }
    }

    /// Error message carried by an ERROR frame (lossy UTF-8)
    pub fn error_message(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}
