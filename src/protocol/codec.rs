//! Frame codec
//!
//! Reads and writes whole frames on blocking byte streams.
//!
//! ## Single-write discipline
//! `encode` serializes header and payload into one scratch buffer and hands
//! it to the writer in a single `write_all`. Callers sharing a writer across
//! threads must still serialize calls themselves (the client does so with its
//! write mutex; the server only writes from the connection's own thread).

use std::io::{self, Read, Write};

use bytes::{Bytes, BytesMut};

use super::frame::{flags, Frame, Header, DEFAULT_MAX_FRAME_SIZE, HEADER_SIZE, MAGIC};
use crate::error::{Result, WireError};

/// Encoder/decoder bound to a maximum payload size
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_frame_size: u32,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl FrameCodec {
    pub fn new(max_frame_size: u32) -> Self {
        Self { max_frame_size }
    }

    pub fn max_frame_size(&self) -> u32 {
        self.max_frame_size
    }

    /// Read exactly one frame
    ///
    /// The header is validated before any payload byte is read, so a bad
    /// magic or an oversized length never consumes the payload.
    ///
    /// A stream that ends before the first header byte yields
    /// `Io(UnexpectedEof)`; one that ends anywhere later yields `ShortRead`.
    pub fn decode<R: Read>(&self, reader: &mut R) -> Result<Frame> {
        let mut raw = [0u8; HEADER_SIZE];
        match read_full(reader, &mut raw)? {
            0 => return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into()),
            n if n < HEADER_SIZE => return Err(WireError::ShortRead),
            _ => {}
        }

        let header = Header::parse(&raw);
        header.validate(self.max_frame_size)?;

        if header.length == 0 {
            return Ok(Frame {
                header,
                payload: Bytes::new(),
            });
        }

        let mut payload = BytesMut::zeroed(header.length as usize);
        if read_full(reader, &mut payload)? < payload.len() {
            return Err(WireError::ShortRead);
        }

        Ok(Frame {
            header,
            payload: payload.freeze(),
        })
    }

    /// Write exactly one frame with a single write call
    pub fn encode<W: Write>(&self, writer: &mut W, frame: &Frame) -> Result<()> {
        let header = &frame.header;
        if header.magic != MAGIC {
            return Err(WireError::WrongMagic {
                found: header.magic,
            });
        }
        if header.flags & flags::RESERVED_MASK != 0 {
            return Err(WireError::UnknownType {
                flags: header.flags,
            });
        }
        if frame.payload.len() as u64 > self.max_frame_size as u64 {
            return Err(WireError::Oversize {
                length: frame.payload.len() as u64,
                max: self.max_frame_size,
            });
        }
        if header.length as usize != frame.payload.len() {
            return Err(WireError::InvalidLength {
                length: header.length,
                actual: frame.payload.len(),
            });
        }

        let mut buf = BytesMut::with_capacity(HEADER_SIZE + frame.payload.len());
        header.put(&mut buf);
        buf.extend_from_slice(&frame.payload);

        writer
            .write_all(&buf)
            .and_then(|_| writer.flush())
            .map_err(|e| WireError::from_io(e, "write"))
    }
}

/// Fill `buf` from `reader`, stopping early only at end of stream
///
/// Returns the number of bytes read.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(WireError::from_io(e, "read")),
        }
    }
    Ok(filled)
}

// =============================================================================
// Stream-based I/O helpers
// =============================================================================

/// Read a frame using the default size bound
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Frame> {
    FrameCodec::default().decode(reader)
}

/// Write a frame using the default size bound
pub fn write_frame<W: Write>(writer: &mut W, frame: &Frame) -> Result<()> {
    FrameCodec::default().encode(writer, frame)
}
