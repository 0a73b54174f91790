//! Cancellation and deadlines
//!
//! A [`Context`] is passed explicitly into every blocking call that a caller
//! may want to abandon (`Client::send`, `Pool::take`). It carries an optional
//! cancellation signal and an optional deadline; blocking calls wait on both
//! with `crossbeam::select!` next to whatever they are really waiting for.
//!
//! [`Signal`] is the broadcast primitive underneath: a channel whose only
//! sender is dropped when the signal fires, so every receiver (and every
//! future receiver) observes the disconnection at once.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, Sender, TryRecvError};
use parking_lot::Mutex;

use crate::error::WireError;

// =============================================================================
// Signal
// =============================================================================

/// One-shot broadcast signal
pub struct Signal {
    tx: Mutex<Option<Sender<()>>>,
    rx: Receiver<()>,
}

impl Signal {
    pub fn new() -> Self {
        let (tx, rx) = channel::bounded(0);
        Self {
            tx: Mutex::new(Some(tx)),
            rx,
        }
    }

    /// Raise the signal. Returns true only for the call that raised it.
    pub fn fire(&self) -> bool {
        self.tx.lock().take().is_some()
    }

    pub fn is_fired(&self) -> bool {
        matches!(self.rx.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// A receiver that becomes ready (disconnected) once the signal fires
    pub fn receiver(&self) -> Receiver<()> {
        self.rx.clone()
    }

    /// Block until fired or `timeout` elapses; returns whether it fired
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        matches!(
            self.rx.recv_timeout(timeout),
            Err(channel::RecvTimeoutError::Disconnected)
        )
    }
}

impl Default for Signal {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("fired", &self.is_fired())
            .finish()
    }
}

// =============================================================================
// Context
// =============================================================================

/// Per-call cancellation and deadline
#[derive(Clone, Default)]
pub struct Context {
    done: Option<Receiver<()>>,
    deadline: Option<Instant>,
    /// Owns the cancel signal's sender, so dropping every `CancelHandle`
    /// does not disconnect `done`
    _signal: Option<Arc<Signal>>,
}

/// Cancels the [`Context`] it was created with
///
/// Dropping the handle does not cancel.
#[derive(Clone, Debug)]
pub struct CancelHandle {
    signal: Arc<Signal>,
}

impl CancelHandle {
    /// Cancel the context. Idempotent.
    pub fn cancel(&self) {
        self.signal.fire();
    }
}

impl Context {
    /// A context that never cancels and has no deadline
    pub fn background() -> Self {
        Self::default()
    }

    /// A cancelable context and the handle that cancels it
    pub fn with_cancel() -> (Self, CancelHandle) {
        let signal = Arc::new(Signal::new());
        let ctx = Self {
            done: Some(signal.receiver()),
            deadline: None,
            _signal: Some(Arc::clone(&signal)),
        };
        (ctx, CancelHandle { signal })
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::background().and_timeout(timeout)
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self::background().and_deadline(deadline)
    }

    /// Context that cancels when `signal` fires
    pub fn bound_to(signal: &Signal) -> Self {
        Self {
            done: Some(signal.receiver()),
            deadline: None,
            _signal: None,
        }
    }

    /// Add a deadline; the earlier of the existing and new deadline wins
    pub fn and_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        self
    }

    pub fn and_timeout(self, timeout: Duration) -> Self {
        self.and_deadline(Instant::now() + timeout)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, if one is set
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn is_canceled(&self) -> bool {
        self.done
            .as_ref()
            .map(|rx| matches!(rx.try_recv(), Err(TryRecvError::Disconnected)))
            .unwrap_or(false)
    }

    pub fn is_expired(&self) -> bool {
        self.deadline.map(|d| Instant::now() >= d).unwrap_or(false)
    }

    /// `Canceled` or `Timeout` once the context is done, `None` before
    pub fn err(&self) -> Option<WireError> {
        if self.is_canceled() {
            Some(WireError::Canceled)
        } else if self.is_expired() {
            Some(WireError::Timeout("context deadline"))
        } else {
            None
        }
    }

    /// Ready (disconnected) once canceled; never ready otherwise
    pub(crate) fn done_channel(&self) -> Receiver<()> {
        self.done.clone().unwrap_or_else(channel::never)
    }

    /// Ready at the deadline; never ready without one
    pub(crate) fn deadline_channel(&self) -> Receiver<Instant> {
        match self.deadline {
            Some(deadline) => channel::at(deadline),
            None => channel::never(),
        }
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("cancelable", &self.done.is_some())
            .field("canceled", &self.is_canceled())
            .field("deadline", &self.deadline)
            .finish()
    }
}
