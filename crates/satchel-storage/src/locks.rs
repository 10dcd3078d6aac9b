//! Per-wallet write locks
//!
//! Each wallet id owns a ticket lock: callers take a ticket on entry and
//! are admitted strictly in ticket order, so queued mutations run FIFO.
//! The guard releases on drop, including on error paths and panics.

use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Default)]
struct Tickets {
    next: u64,
    serving: u64,
}

#[derive(Debug, Default)]
struct TicketLock {
    tickets: Mutex<Tickets>,
    turn: Condvar,
}

impl TicketLock {
    fn acquire(&self) {
        let mut tickets = self.tickets.lock();
        let ticket = tickets.next;
        tickets.next += 1;
        while tickets.serving != ticket {
            self.turn.wait(&mut tickets);
        }
    }

    fn release(&self) {
        let mut tickets = self.tickets.lock();
        tickets.serving += 1;
        drop(tickets);
        self.turn.notify_all();
    }

    fn is_idle(&self) -> bool {
        let tickets = self.tickets.lock();
        tickets.next == tickets.serving
    }
}

/// Map from wallet id to its write lock
#[derive(Debug, Default)]
pub struct WalletLocks {
    locks: Mutex<HashMap<String, Arc<TicketLock>>>,
}

impl WalletLocks {
    /// Create an empty lock table
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until the caller holds the lock for `wallet_id`
    pub fn acquire(&self, wallet_id: &str) -> WalletLockGuard {
        let lock = self
            .locks
            .lock()
            .entry(wallet_id.to_string())
            .or_default()
            .clone();
        lock.acquire();
        WalletLockGuard { lock }
    }

    /// Drop table entries nobody holds or waits on
    pub fn prune(&self) {
        self.locks
            .lock()
            .retain(|_, lock| Arc::strong_count(lock) > 1 || !lock.is_idle());
    }

    /// Number of tracked wallet ids
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    /// Whether no wallet ids are tracked
    pub fn is_empty(&self) -> bool {
        self.locks.lock().is_empty()
    }
}

/// Held write lock; released on drop
#[derive(Debug)]
pub struct WalletLockGuard {
    lock: Arc<TicketLock>,
}

impl Drop for WalletLockGuard {
    fn drop(&mut self) {
        self.lock.release();
    }
}
