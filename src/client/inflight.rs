//! Inflight table
//!
//! Maps correlation ids to single-slot mailboxes. The lock is held only for
//! point operations (install, remove, deliver, close).

use std::collections::HashMap;

use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use parking_lot::Mutex;

use crate::error::{Result, WireError};
use crate::protocol::Frame;

#[derive(Default)]
struct Slots {
    mailboxes: HashMap<u64, Sender<Frame>>,
    closed: bool,
}

/// Outcome of handing a frame to its mailbox
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    Delivered,
    /// Nobody waits for this sequence (caller gave up)
    Unclaimed,
    /// Mailbox already holds a frame; the duplicate is dropped
    Duplicate,
}

#[derive(Default)]
pub(crate) struct InflightTable {
    slots: Mutex<Slots>,
}

impl InflightTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a mailbox for `seq`
    pub fn install(&self, seq: u64) -> Result<Receiver<Frame>> {
        let mut slots = self.slots.lock();
        if slots.closed {
            return Err(WireError::ClientClosed);
        }
        if slots.mailboxes.contains_key(&seq) {
            return Err(WireError::Protocol(format!(
                "sequence {} already in flight",
                seq
            )));
        }
        let (tx, rx) = channel::bounded(1);
        slots.mailboxes.insert(seq, tx);
        Ok(rx)
    }

    pub fn remove(&self, seq: u64) {
        self.slots.lock().mailboxes.remove(&seq);
    }

    /// Deliver without blocking
    pub fn deliver(&self, frame: Frame) -> Delivery {
        let slots = self.slots.lock();
        match slots.mailboxes.get(&frame.sequence()) {
            None => Delivery::Unclaimed,
            Some(tx) => match tx.try_send(frame) {
                Ok(()) => Delivery::Delivered,
                Err(TrySendError::Full(_)) => Delivery::Duplicate,
                Err(TrySendError::Disconnected(_)) => Delivery::Unclaimed,
            },
        }
    }

    /// Refuse new mailboxes and release every pending one
    ///
    /// Dropping a mailbox's sender wakes its waiter with a disconnect.
    /// Returns how many were released.
    pub fn close(&self) -> usize {
        let mut slots = self.slots.lock();
        slots.closed = true;
        let released = slots.mailboxes.len();
        slots.mailboxes.clear();
        released
    }

    pub fn len(&self) -> usize {
        self.slots.lock().mailboxes.len()
    }
}

/// Removes a mailbox when the waiting `send` returns, on every path
pub(crate) struct InflightGuard<'a> {
    pub table: &'a InflightTable,
    pub seq: u64,
}

impl Drop for InflightGuard<'_> {
    fn drop(&mut self) {
        self.table.remove(self.seq);
    }
}
