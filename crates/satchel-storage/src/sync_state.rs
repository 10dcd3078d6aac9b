//! Sync status state machine with retry backoff
//!
//! `idle → syncing → {synced, error}`; `synced`/`error`/`stale` go back to
//! `syncing` on the next attempt, and any state may be flagged `stale`.
//! None of these transitions touch the LKG snapshot.

use crate::models::{SyncState, SyncStatus};

/// Backoff base in milliseconds
pub const BASE_RETRY_BACKOFF_MS: i64 = 30_000;

/// Backoff cap in milliseconds
pub const MAX_RETRY_BACKOFF_MS: i64 = 300_000;

/// Growth per consecutive failure
pub const RETRY_BACKOFF_MULTIPLIER: f64 = 1.5;

/// Retry delay after `failure_count` consecutive failures:
/// `min(300s, 30s * 1.5^failure_count)`
pub fn retry_backoff_ms(failure_count: u32) -> i64 {
    let exponent = failure_count.min(64) as i32;
    let delay = BASE_RETRY_BACKOFF_MS as f64 * RETRY_BACKOFF_MULTIPLIER.powi(exponent);
    if delay >= MAX_RETRY_BACKOFF_MS as f64 {
        MAX_RETRY_BACKOFF_MS
    } else {
        delay.round() as i64
    }
}

impl SyncStatus {
    /// Whether `self → next` is a defined transition
    pub fn can_transition_to(&self, next: SyncStatus) -> bool {
        use SyncStatus::*;
        match (self, next) {
            (_, Stale) => true,
            (Idle | Synced | Error | Stale | Syncing, Syncing) => true,
            (Syncing, Synced | Error) => true,
            _ => false,
        }
    }
}

impl SyncState {
    fn transition(&mut self, next: SyncStatus) {
        if !self.status.can_transition_to(next) {
            // Terminal writes may land out of order when syncs overlap; last one wins.
            tracing::debug!("Sync status {} -> {} outside the normal cycle", self.status, next);
        }
        self.status = next;
    }

    /// Enter `syncing`
    pub fn begin_attempt(&mut self, now: i64) {
        self.transition(SyncStatus::Syncing);
        self.last_attempt_at = Some(now);
    }

    /// Enter `synced`: reset failures and clear error fields
    pub fn record_success(&mut self, now: i64, tip_height: Option<u32>, server: Option<String>) {
        self.transition(SyncStatus::Synced);
        self.last_successful_sync_at = Some(now);
        if tip_height.is_some() {
            self.last_known_tip_height = tip_height;
        }
        if server.is_some() {
            self.last_server_used = server;
        }
        self.failure_count = 0;
        self.next_retry_at = None;
        self.last_error = None;
        self.last_error_at = None;
        self.is_stale = false;
    }

    /// Enter `error` and schedule the next retry
    pub fn record_failure(&mut self, now: i64, message: impl Into<String>) {
        self.transition(SyncStatus::Error);
        self.failure_count = self.failure_count.saturating_add(1);
        self.next_retry_at = Some(now + retry_backoff_ms(self.failure_count));
        self.last_error = Some(message.into());
        self.last_error_at = Some(now);
    }

    /// Flag stale. A sync in flight keeps its `syncing` status so its
    /// staging snapshot stays valid.
    pub fn mark_stale(&mut self) {
        self.is_stale = true;
        if self.status != SyncStatus::Syncing {
            self.status = SyncStatus::Stale;
        }
    }

    /// Whether a new attempt is advisable at `now`
    pub fn retry_allowed(&self, now: i64) -> bool {
        self.next_retry_at.map_or(true, |at| now >= at)
    }

    /// Whether the last success is older than `threshold_ms` (or never happened)
    pub fn is_overdue(&self, now: i64, threshold_ms: i64) -> bool {
        self.last_successful_sync_at
            .map_or(true, |at| now.saturating_sub(at) > threshold_ms)
    }
}
