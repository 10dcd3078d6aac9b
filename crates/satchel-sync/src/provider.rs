//! Chain-data provider boundary
//!
//! The coordinator never speaks a wire protocol. A provider answers balance
//! queries for an address list and produces a full snapshot for a sync cycle.

use crate::Result;
use async_trait::async_trait;
use satchel_storage::{LkgSnapshot, WalletRecord};
use serde::{Deserialize, Serialize};

/// Confirmed and unconfirmed totals, in satoshis
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceSummary {
    /// Mined
    pub confirmed: u64,
    /// In the mempool
    pub unconfirmed: u64,
}

impl BalanceSummary {
    /// Confirmed plus unconfirmed
    pub fn total(&self) -> u64 {
        self.confirmed.saturating_add(self.unconfirmed)
    }
}

impl From<&LkgSnapshot> for BalanceSummary {
    fn from(snapshot: &LkgSnapshot) -> Self {
        Self {
            confirmed: snapshot.confirmed_balance,
            unconfirmed: snapshot.unconfirmed_balance,
        }
    }
}

/// Source of chain data for watch-only wallets
#[async_trait]
pub trait ChainDataProvider: Send + Sync {
    /// Balance across `addresses`
    async fn fetch_balance(&self, addresses: &[String]) -> Result<BalanceSummary>;

    /// Fresh snapshot for `record`, with `tip_height` set.
    ///
    /// `record.staging` holds the in-flight snapshot seeded from the
    /// current LKG, which a provider may use as its starting point.
    async fn fetch_snapshot(&self, record: &WalletRecord) -> Result<LkgSnapshot>;

    /// Server identity recorded with each commit
    fn server_label(&self) -> Option<String> {
        None
    }
}
