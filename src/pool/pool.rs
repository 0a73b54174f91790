//! Bounded client pool
//!
//! ## Accounting
//! `in_use` counts clients checked out plus slots reserved for a dial in
//! progress, so `in_use + idle <= limit` always holds.
//!
//! ## Hand-off
//! A `put` wakes the oldest waiter and gives it the client directly instead
//! of touching the idle list. When capacity frees up without a client (a
//! failed dial, a discarded broken client) the oldest waiter receives the
//! capacity and dials for itself. Either way `in_use` is unchanged by the
//! hand-off, which keeps `waiters > 0 => in_use == limit`.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use crossbeam::select;
use parking_lot::Mutex;

use super::pooled::PooledClient;
use crate::client::Client;
use crate::config::{ClientConfig, PoolConfig};
use crate::context::{Context, Signal};
use crate::error::{Result, WireError};

/// A resource the pool can manage
pub trait Poolable: Send + 'static {
    /// Destroy the resource
    fn close(&self) -> Result<()>;

    /// True once the resource can no longer be used and must be discarded
    fn is_broken(&self) -> bool;
}

impl Poolable for Client {
    fn close(&self) -> Result<()> {
        Client::close(self)
    }

    fn is_broken(&self) -> bool {
        self.is_closed()
    }
}

/// Factory that opens one new client
pub type DialFn<T> = Box<dyn Fn() -> Result<T> + Send + Sync>;

/// Snapshot of pool occupancy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    pub limit: usize,
    pub in_use: usize,
    pub idle: usize,
    pub waiters: usize,
    pub closed: bool,
}

/// What a parked waiter is handed
enum Grant<T> {
    Client(T),
    /// A reserved slot; the waiter dials its own client
    Capacity,
}

struct Waiter<T> {
    id: u64,
    tx: Sender<Grant<T>>,
}

struct State<T> {
    /// Reused last-in-first-out
    idle: Vec<T>,
    in_use: usize,
    /// Served first-in-first-out
    waiters: VecDeque<Waiter<T>>,
    next_waiter_id: u64,
    closed: bool,
}

impl<T> State<T> {
    /// Give `grant` to the oldest live waiter; hands it back if none took it
    fn hand_off(&mut self, mut grant: Grant<T>) -> Option<Grant<T>> {
        while let Some(waiter) = self.waiters.pop_front() {
            match waiter.tx.try_send(grant) {
                Ok(()) => return None,
                Err(TrySendError::Full(g)) | Err(TrySendError::Disconnected(g)) => grant = g,
            }
        }
        Some(grant)
    }
}

struct PoolInner<T> {
    config: PoolConfig,
    dial: DialFn<T>,
    state: Mutex<State<T>>,
    closed: Signal,
}

/// Why a parked `take` woke up
enum Wake<T> {
    Granted(Grant<T>),
    Closed,
    Canceled,
    Expired,
}

/// Pool of at most `limit` live clients
///
/// Cloning yields another handle to the same pool.
pub struct Pool<T: Poolable = Client> {
    inner: Arc<PoolInner<T>>,
}

impl<T: Poolable> Clone for Pool<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Pool<Client> {
    /// Pool whose clients are dialed with [`Client::open`]
    pub fn dial_addr(
        addr: impl Into<String>,
        client_config: ClientConfig,
        config: PoolConfig,
    ) -> Result<Self> {
        let addr = addr.into();
        Self::new(config, move || Client::open(&addr, &client_config))
    }
}

impl<T: Poolable> Pool<T> {
    pub fn new(config: PoolConfig, dial: impl Fn() -> Result<T> + Send + Sync + 'static) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(PoolInner {
                config,
                dial: Box::new(dial),
                state: Mutex::new(State {
                    idle: Vec::new(),
                    in_use: 0,
                    waiters: VecDeque::new(),
                    next_waiter_id: 0,
                    closed: false,
                }),
                closed: Signal::new(),
            }),
        })
    }

    /// Check out a client
    ///
    /// Reuses an idle client, dials a new one while under the limit, and
    /// otherwise waits for a `put` (or fails with `PoolFull` in fast-fail
    /// mode). The returned façade goes back to the pool when closed or
    /// dropped.
    pub fn take(&self, ctx: &Context) -> Result<PooledClient<T>> {
        let client = self.take_raw(ctx)?;
        Ok(PooledClient::new(self.clone(), client))
    }

    /// Return a client taken from this pool
    ///
    /// Broken clients are closed and their capacity freed; on a closed pool
    /// the client is closed synchronously.
    pub fn put(&self, client: T) -> Result<()> {
        if client.is_broken() {
            tracing::debug!("Discarding broken client");
            return self.discard(client);
        }

        let mut state = self.inner.state.lock();
        if state.closed {
            state.in_use = state.in_use.saturating_sub(1);
            drop(state);
            return client.close();
        }

        if let Some(Grant::Client(client)) = state.hand_off(Grant::Client(client)) {
            state.in_use = state.in_use.saturating_sub(1);
            state.idle.push(client);
        }
        Ok(())
    }

    /// Close a checked-out client and free its slot
    pub fn discard(&self, client: T) -> Result<()> {
        let result = client.close();
        self.release_capacity();
        result
    }

    pub fn status(&self) -> PoolStatus {
        let state = self.inner.state.lock();
        PoolStatus {
            limit: self.inner.config.limit,
            in_use: state.in_use,
            idle: state.idle.len(),
            waiters: state.waiters.len(),
            closed: state.closed,
        }
    }

    /// Close the pool (idempotent)
    ///
    /// Wakes every waiter with `PoolClosed` and closes every idle client,
    /// returning the first close error. Checked-out clients are closed as
    /// they come back.
    pub fn close(&self) -> Result<()> {
        let (idle, waiters) = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return Ok(());
            }
            state.closed = true;
            (
                std::mem::take(&mut state.idle),
                std::mem::take(&mut state.waiters),
            )
        };

        self.inner.closed.fire();
        let woken = waiters.len();
        drop(waiters);

        let mut first_err = None;
        let closed = idle.len();
        for client in idle {
            if let Err(e) = client.close() {
                tracing::warn!(error = %e, "Failed to close idle client");
                first_err.get_or_insert(e);
            }
        }

        tracing::info!(closed, woken, "Pool closed");
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_fired()
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn take_raw(&self, ctx: &Context) -> Result<T> {
        if let Some(err) = ctx.err() {
            return Err(err);
        }

        let (waiter_id, rx) = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return Err(WireError::PoolClosed);
            }
            if let Some(client) = state.idle.pop() {
                state.in_use += 1;
                return Ok(client);
            }
            if state.in_use < self.inner.config.limit {
                state.in_use += 1;
                drop(state);
                return self.dial_reserved();
            }
            if self.inner.config.fast_failed {
                return Err(WireError::PoolFull);
            }

            let id = state.next_waiter_id;
            state.next_waiter_id += 1;
            let (tx, rx) = channel::bounded(1);
            state.waiters.push_back(Waiter { id, tx });
            tracing::trace!(waiter = id, queued = state.waiters.len(), "Waiting for a client");
            (id, rx)
        };

        let closed = self.inner.closed.receiver();
        let canceled = ctx.done_channel();
        let expired = ctx.deadline_channel();
        let wake = select! {
            recv(rx) -> grant => match grant {
                Ok(grant) => Wake::Granted(grant),
                Err(_) => Wake::Closed,
            },
            recv(closed) -> _ => Wake::Closed,
            recv(canceled) -> _ => Wake::Canceled,
            recv(expired) -> _ => Wake::Expired,
        };

        match wake {
            Wake::Granted(Grant::Client(client)) => Ok(client),
            Wake::Granted(Grant::Capacity) => self.dial_reserved(),
            Wake::Closed => {
                // A grant may have landed just before the pool closed.
                if let Ok(grant) = rx.try_recv() {
                    self.return_grant(grant);
                }
                Err(WireError::PoolClosed)
            }
            Wake::Canceled => Err(self.abandon(waiter_id, &rx, WireError::Canceled)),
            Wake::Expired => Err(self.abandon(
                waiter_id,
                &rx,
                WireError::Timeout("pool take deadline"),
            )),
        }
    }

    /// Withdraw a waiter that stopped waiting; returns `err` for convenience
    fn abandon(&self, waiter_id: u64, rx: &Receiver<Grant<T>>, err: WireError) -> WireError {
        let still_queued = {
            let mut state = self.inner.state.lock();
            let before = state.waiters.len();
            state.waiters.retain(|w| w.id != waiter_id);
            state.waiters.len() != before
        };
        // Already served: pass what we were given along.
        if !still_queued {
            if let Ok(grant) = rx.try_recv() {
                self.return_grant(grant);
            }
        }
        tracing::trace!(waiter = waiter_id, "Waiter gave up: {}", err);
        err
    }

    /// Dial into a slot already counted in `in_use`
    fn dial_reserved(&self) -> Result<T> {
        match (self.inner.dial)() {
            Ok(client) => {
                if self.is_closed() {
                    let _ = client.close();
                    self.release_capacity();
                    return Err(WireError::PoolClosed);
                }
                Ok(client)
            }
            Err(e) => {
                tracing::debug!(error = %e, "Dial failed");
                self.release_capacity();
                Err(e)
            }
        }
    }

    /// Free one `in_use` slot, or hand it to the oldest waiter
    fn release_capacity(&self) {
        let mut state = self.inner.state.lock();
        if state.closed || state.hand_off(Grant::Capacity).is_some() {
            state.in_use = state.in_use.saturating_sub(1);
        }
    }

    fn return_grant(&self, grant: Grant<T>) {
        match grant {
            Grant::Client(client) => {
                let _ = self.put(client);
            }
            Grant::Capacity => self.release_capacity(),
        }
    }
}

impl<T: Poolable> fmt::Debug for Pool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool").field("status", &self.status()).finish()
    }
}
