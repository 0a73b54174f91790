//! Client Module
//!
//! Multiplexed request/response client over one TCP connection.
//!
//! ## Correlation
//! - Sequence numbers start at 0 and grow by one per request
//! - A sequence has at most one mailbox installed at a time
//! - Responses may arrive in any order; each caller gets its own

mod inflight;
mod mux;

pub use mux::Client;
