//! # muxwire
//!
//! Framed request/response networking over TCP:
//! - Length-prefixed binary frames with a fixed 24-byte header
//! - A client that multiplexes concurrent callers over one connection
//! - A server with bounded admission and graceful, deadline-bound drain
//! - A bounded client pool with FIFO waiters
//!
//! ## Architecture Overview
//!
//! ```text
//!   callers ──► Pool ──► Client ─────── TCP ───────► Server
//!               (limit,   (seq counter,              (accept loop,
//!                waiters)  inflight map,              admission tokens)
//!                          reader thread)                  │
//!                             ▲                            ▼
//!                             │                     Connection thread
//!                             │                      decode ─► Handler
//!                             └──── RESPONSE/ERROR ◄── encode
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use bytes::Bytes;
//! use muxwire::{Client, ClientConfig, ConnContext, Context, HandlerResult, Server, ServerConfig};
//!
//! let server = Server::new(
//!     "127.0.0.1:0",
//!     |_ctx: &ConnContext, payload: Bytes| -> HandlerResult { Ok(payload) },
//!     ServerConfig::default(),
//! );
//! let running = server.spawn()?;
//! let addr = server.local_addr().expect("bound").to_string();
//!
//! let client = Client::open(&addr, &ClientConfig::default())?;
//! let reply = client.send(&Context::background(), "hello")?;
//! assert_eq!(&reply[..], b"hello");
//!
//! client.close()?;
//! server.close()?;
//! running.join()?;
//! # Ok::<(), muxwire::WireError>(())
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod context;
pub mod error;
pub mod logging;

pub mod client;
pub mod network;
pub mod pool;
pub mod protocol;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use client::Client;
pub use config::{ClientConfig, Hooks, PoolConfig, ServerConfig};
pub use context::{CancelHandle, Context, Signal};
pub use error::{ErrorKind, Result, WireError};
pub use network::{ConnContext, Handler, HandlerError, HandlerResult, ServeHandle, Server, ServerStatus};
pub use pool::{Pool, PoolStatus, Poolable, PooledClient};
pub use protocol::{Frame, FrameCodec};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of muxwire
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
