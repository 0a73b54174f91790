//! Checked-out client façade
//!
//! Holds the pool and one client. Closing (or dropping) the façade returns
//! the client to the pool; only the pool destroys clients.

use std::fmt;
use std::ops::Deref;

use super::pool::{Pool, Poolable};
use crate::client::Client;
use crate::error::Result;

/// A client on loan from a [`Pool`]
pub struct PooledClient<T: Poolable = Client> {
    pool: Pool<T>,
    /// `None` only after the client went back to the pool
    client: Option<T>,
}

impl<T: Poolable> PooledClient<T> {
    pub(crate) fn new(pool: Pool<T>, client: T) -> Self {
        Self {
            pool,
            client: Some(client),
        }
    }

    /// Return the client to the pool
    pub fn close(mut self) -> Result<()> {
        self.release()
    }

    /// Destroy the client instead of returning it, freeing its slot
    pub fn discard(mut self) -> Result<()> {
        match self.client.take() {
            Some(client) => self.pool.discard(client),
            None => Ok(()),
        }
    }

    /// Detach the client; the caller must later `put` or `discard` it
    pub fn into_inner(mut self) -> T {
        // Only consuming methods and `Drop` ever take the client out.
        match self.client.take() {
            Some(client) => client,
            None => unreachable!("pooled client already released"),
        }
    }

    fn release(&mut self) -> Result<()> {
        match self.client.take() {
            Some(client) => self.pool.put(client),
            None => Ok(()),
        }
    }
}

impl<T: Poolable> Deref for PooledClient<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Still `Some`: a released façade has been consumed.
        match &self.client {
            Some(client) => client,
            None => unreachable!("pooled client already released"),
        }
    }
}

impl<T: Poolable> Drop for PooledClient<T> {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            tracing::debug!(error = %e, "Failed to return client to pool");
        }
    }
}

impl<T: Poolable + fmt::Debug> fmt::Debug for PooledClient<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledClient")
            .field("client", &self.client)
            .finish()
    }
}
