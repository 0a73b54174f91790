//! Error types for muxwire
//!
//! Provides a unified error type for every public operation. Nothing in the
//! crate panics across the API boundary; failures come back as `WireError`.

use std::io;

use thiserror::Error;

/// Result type alias using WireError
pub type Result<T> = std::result::Result<T, WireError>;

/// Unified error type for muxwire operations
#[derive(Debug, Error)]
pub enum WireError {
    // -------------------------------------------------------------------------
    // Transport Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Timed out: {0}")]
    Timeout(&'static str),

    #[error("Operation canceled")]
    Canceled,

    // -------------------------------------------------------------------------
    // Lifecycle Errors
    // -------------------------------------------------------------------------
    #[error("Client closed")]
    ClientClosed,

    #[error("Pool closed")]
    PoolClosed,

    #[error("Server closed")]
    ServerClosed,

    #[error("Pool full")]
    PoolFull,

    #[error("Close timed out with {remaining} handler(s) still running")]
    CloseTimeout { remaining: usize },

    // -------------------------------------------------------------------------
    // Frame Validation Errors
    // -------------------------------------------------------------------------
    #[error("Wrong magic: 0x{found:08x}")]
    WrongMagic { found: u32 },

    #[error("Unknown frame type: flags 0x{flags:016x}")]
    UnknownType { flags: u64 },

    #[error("Frame too large: {length} bytes (max {max})")]
    Oversize { length: u64, max: u32 },

    #[error("Short read: stream ended mid-frame")]
    ShortRead,

    #[error("Invalid length: header says {length}, payload has {actual}")]
    InvalidLength { length: u32, actual: usize },

    // -------------------------------------------------------------------------
    // Exchange Errors
    // -------------------------------------------------------------------------
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Remote error: {0}")]
    Remote(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Copyable classification of a [`WireError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Io,
    Timeout,
    Canceled,
    ClientClosed,
    PoolClosed,
    ServerClosed,
    PoolFull,
    CloseTimeout,
    WrongMagic,
    UnknownType,
    Oversize,
    ShortRead,
    InvalidLength,
    Protocol,
    Remote,
    Config,
}

impl WireError {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            WireError::Io(_) => ErrorKind::Io,
            WireError::Timeout(_) => ErrorKind::Timeout,
            WireError::Canceled => ErrorKind::Canceled,
            WireError::ClientClosed => ErrorKind::ClientClosed,
            WireError::PoolClosed => ErrorKind::PoolClosed,
            WireError::ServerClosed => ErrorKind::ServerClosed,
            WireError::PoolFull => ErrorKind::PoolFull,
            WireError::CloseTimeout { .. } => ErrorKind::CloseTimeout,
            WireError::WrongMagic { .. } => ErrorKind::WrongMagic,
            WireError::UnknownType { .. } => ErrorKind::UnknownType,
            WireError::Oversize { .. } => ErrorKind::Oversize,
            WireError::ShortRead => ErrorKind::ShortRead,
            WireError::InvalidLength { .. } => ErrorKind::InvalidLength,
            WireError::Protocol(_) => ErrorKind::Protocol,
            WireError::Remote(_) => ErrorKind::Remote,
            WireError::Config(_) => ErrorKind::Config,
        }
    }

    /// True when the peer went away: clean EOF, reset, abort or broken pipe
    pub fn is_disconnect(&self) -> bool {
        match self {
            WireError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::NotConnected
            ),
            _ => false,
        }
    }

    /// True for a clean end of stream at a frame boundary
    pub fn is_eof(&self) -> bool {
        matches!(self, WireError::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof)
    }

    /// True for a deadline expiry, including raw socket timeouts
    pub fn is_timeout(&self) -> bool {
        match self {
            WireError::Timeout(_) => true,
            WireError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
            ),
            _ => false,
        }
    }

    /// Convert an I/O error, mapping socket timeouts to [`WireError::Timeout`]
    ///
    /// Read timeouts surface as `WouldBlock` on unix and `TimedOut` on Windows.
    pub(crate) fn from_io(err: io::Error, what: &'static str) -> Self {
        match err.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => WireError::Timeout(what),
            _ => WireError::Io(err),
        }
    }
}
