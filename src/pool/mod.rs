//! Pool Module
//!
//! Bounded reuse of clients for fan-out callers.
//!
//! ## Policy
//! - At most `limit` live clients (idle + checked out)
//! - Idle clients reused last-in-first-out
//! - Waiters served first-in-first-out; a returning client goes to the
//!   oldest waiter before the idle list
//! - Broken clients are discarded, never pooled

#[allow(clippy::module_inception)]
mod pool;
mod pooled;

pub use pool::{DialFn, Pool, PoolStatus, Poolable};
pub use pooled::PooledClient;
