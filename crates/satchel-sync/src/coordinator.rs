//! Sync coordinator
//!
//! Drives the staging → commit / error lifecycle against the record store.
//! Store calls block on file I/O and run on the blocking pool.

use crate::provider::{BalanceSummary, ChainDataProvider};
use crate::{Error, Result};
use satchel_storage::{now_ms, RecordStore, WalletRecord};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Coordinator configuration
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Concurrent wallet syncs in `sync_all`
    pub max_concurrent: usize,
    /// Hard ceiling on `max_concurrent`
    pub max_concurrent_cap: usize,
    /// Skip wallets whose `nextRetryAt` is still in the future
    pub respect_retry_window: bool,
    /// No successful sync for this long flags a wallet stale
    pub stale_after: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            max_concurrent_cap: 8,
            respect_retry_window: true,
            stale_after: Duration::from_secs(60 * 60),
        }
    }
}

impl SyncConfig {
    /// Set concurrent wallet syncs
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    /// Set the concurrency ceiling
    pub fn with_max_concurrent_cap(mut self, cap: usize) -> Self {
        self.max_concurrent_cap = cap;
        self
    }

    /// Enable or disable retry gating
    pub fn with_respect_retry_window(mut self, respect: bool) -> Self {
        self.respect_retry_window = respect;
        self
    }

    /// Set the stale threshold
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    /// Worker count for `wallets` syncs: `min(wallets, max_concurrent, cap)`, at least 1
    pub fn pool_size(&self, wallets: usize) -> usize {
        wallets
            .min(self.max_concurrent)
            .min(self.max_concurrent_cap)
            .max(1)
    }
}

/// What happened to one wallet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SyncOutcome {
    /// New LKG committed
    #[serde(rename_all = "camelCase")]
    Committed {
        /// Committed balance
        balance: BalanceSummary,
        /// Chain tip of the snapshot
        tip_height: Option<u32>,
    },
    /// Provider failed; error recorded, LKG untouched
    Failed {
        /// Error message
        error: String,
    },
    /// Inside the retry window
    #[serde(rename_all = "camelCase")]
    Skipped {
        /// Earliest advisable retry (ms)
        next_retry_at: i64,
    },
    /// No such wallet
    NotFound,
}

/// Outcome for one wallet of a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletSyncReport {
    /// Wallet id
    pub wallet_id: String,
    /// Outcome
    pub outcome: SyncOutcome,
}

/// Runs wallet syncs against a [`ChainDataProvider`]
#[derive(Clone)]
pub struct SyncCoordinator {
    store: Arc<RecordStore>,
    provider: Arc<dyn ChainDataProvider>,
    config: SyncConfig,
}

impl SyncCoordinator {
    /// Create a coordinator
    pub fn new(
        store: Arc<RecordStore>,
        provider: Arc<dyn ChainDataProvider>,
        config: SyncConfig,
    ) -> Self {
        Self {
            store,
            provider,
            config,
        }
    }

    /// Configuration
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Sync one wallet.
    ///
    /// Provider failures are recorded on the wallet and reported as
    /// [`SyncOutcome::Failed`]; only storage failures are returned as errors.
    pub async fn sync_wallet(&self, wallet_id: &str, force: bool) -> Result<SyncOutcome> {
        let Some(mut record) = self.read(wallet_id).await? else {
            return Ok(SyncOutcome::NotFound);
        };

        let now = now_ms();
        if !force && self.config.respect_retry_window && !record.sync_state.retry_allowed(now) {
            let next_retry_at = record.sync_state.next_retry_at.unwrap_or(now);
            tracing::debug!(
                "Skipping sync for wallet {}: retry not before {}",
                wallet_id,
                next_retry_at
            );
            return Ok(SyncOutcome::Skipped { next_retry_at });
        }

        let staging = record.lkg.clone();
        let id = wallet_id.to_string();
        let seeded = staging.clone();
        if !self
            .blocking(move |store| store.save_staging(&id, seeded))
            .await?
        {
            return Ok(SyncOutcome::NotFound);
        }
        record.staging = Some(staging);

        tracing::debug!("Syncing wallet {} ({} addresses)", wallet_id, record.inventory.len());
        match self.provider.fetch_snapshot(&record).await {
            Ok(mut snapshot) => {
                snapshot.recompute_balances();
                let balance = BalanceSummary::from(&snapshot);
                let tip_height = snapshot.tip_height;
                let id = wallet_id.to_string();
                let server = self.provider.server_label();
                if !self
                    .blocking(move |store| store.commit_lkg_from(&id, snapshot, server))
                    .await?
                {
                    return Ok(SyncOutcome::NotFound);
                }
                tracing::info!(
                    "Wallet {} synced: {} sat confirmed, {} sat unconfirmed, tip {:?}",
                    wallet_id,
                    balance.confirmed,
                    balance.unconfirmed,
                    tip_height
                );
                Ok(SyncOutcome::Committed {
                    balance,
                    tip_height,
                })
            }
            Err(e) => {
                let message = e.to_string();
                let id = wallet_id.to_string();
                let recorded = message.clone();
                self.blocking(move |store| store.record_sync_error(&id, &recorded))
                    .await?;
                Ok(SyncOutcome::Failed { error: message })
            }
        }
    }

    /// Sync `wallet_ids` concurrently. One report per id, in input order.
    pub async fn sync_all(&self, wallet_ids: &[String], force: bool) -> Vec<WalletSyncReport> {
        let workers = self.config.pool_size(wallet_ids.len());
        let semaphore = Arc::new(Semaphore::new(workers));
        tracing::info!("Syncing {} wallets with {} workers", wallet_ids.len(), workers);

        let mut tasks = Vec::with_capacity(wallet_ids.len());
        for wallet_id in wallet_ids {
            let coordinator = self.clone();
            let sem = Arc::clone(&semaphore);
            let wallet_id = wallet_id.clone();
            tasks.push(tokio::spawn(async move {
                let _permit = sem.acquire_owned().await.ok();
                coordinator.sync_wallet(&wallet_id, force).await
            }));
        }

        let mut reports = Vec::with_capacity(tasks.len());
        for (wallet_id, task) in wallet_ids.iter().zip(tasks) {
            let outcome = match task.await {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(e)) => {
                    tracing::error!("Sync of wallet {} failed: {}", wallet_id, e);
                    SyncOutcome::Failed {
                        error: e.to_string(),
                    }
                }
                Err(e) => {
                    tracing::warn!("Sync task for wallet {} failed: {}", wallet_id, e);
                    SyncOutcome::Failed {
                        error: e.to_string(),
                    }
                }
            };
            reports.push(WalletSyncReport {
                wallet_id: wallet_id.clone(),
                outcome,
            });
        }
        reports
    }

    /// Flag wallets with no successful sync within `threshold` (default:
    /// the configured `stale_after`). Returns the ids newly flagged.
    pub async fn flag_stale(
        &self,
        wallet_ids: &[String],
        threshold: Option<Duration>,
    ) -> Result<Vec<String>> {
        let threshold_ms =
            i64::try_from(threshold.unwrap_or(self.config.stale_after).as_millis())
                .unwrap_or(i64::MAX);
        let ids = wallet_ids.to_vec();

        let flagged = self
            .blocking(move |store| {
                let now = now_ms();
                let mut flagged = Vec::new();
                for id in ids {
                    let Some(record) = store.read(&id)? else {
                        continue;
                    };
                    let state = &record.sync_state;
                    if state.is_stale || !state.is_overdue(now, threshold_ms) {
                        continue;
                    }
                    if store.mark_stale(&id)? {
                        flagged.push(id);
                    }
                }
                Ok(flagged)
            })
            .await?;

        if !flagged.is_empty() {
            tracing::info!("Flagged {} wallets stale", flagged.len());
        }
        Ok(flagged)
    }

    /// Live balance of a wallet's inventory addresses from the provider
    pub async fn balance_for(&self, wallet_id: &str) -> Result<BalanceSummary> {
        let record = self
            .read(wallet_id)
            .await?
            .ok_or_else(|| Error::WalletNotFound(wallet_id.to_string()))?;
        let addresses = record.inventory.address_strings();
        self.provider.fetch_balance(&addresses).await
    }

    async fn read(&self, wallet_id: &str) -> Result<Option<WalletRecord>> {
        let id = wallet_id.to_string();
        self.blocking(move |store| store.read(&id)).await
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&RecordStore) -> satchel_storage::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(&self.store);
        Ok(tokio::task::spawn_blocking(move || f(&store)).await??)
    }
}
