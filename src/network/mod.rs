//! Network Module
//!
//! TCP server side of the protocol.
//!
//! ## Architecture
//! - Single accept thread gated by admission tokens
//! - One thread per connection, one request at a time per connection
//! - Requests dispatched to an application [`Handler`]

mod connection;
mod handler;
mod server;
pub(crate) mod socket;

pub use handler::{ConnContext, Handler, HandlerError, HandlerResult};
pub use server::{ServeHandle, Server, ServerStatus};
