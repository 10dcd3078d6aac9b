//! One-time copy of per-wallet files into the relational store
//!
//! A global entry in `migration_log` guards the first full pass. Every
//! wallet also gets a marker in `wallet_migrations`; once the guard is
//! present only wallets marked `failed` are retried.

use crate::database::{Database, WalletMigrationStatus};
use crate::models::WalletRecord;
use crate::store::RecordStore;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Migration log version of the file → relational pass
pub const BULK_MIGRATION_VERSION: i64 = 1;

/// Result of [`migrate_if_needed`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationOutcome {
    /// Whether a pass ran
    pub migrated: bool,
    /// Wallets written to the relational store by this pass
    pub wallets_count: usize,
}

/// Copy wallet files into `db` unless already done. Safe on every startup.
pub fn migrate_if_needed(store: &RecordStore, db: &mut Database) -> Result<MigrationOutcome> {
    let candidates = if db.migration_applied(BULK_MIGRATION_VERSION)? {
        let failed = db.failed_wallet_ids()?;
        if failed.is_empty() {
            tracing::debug!("Bulk migration v{} already applied", BULK_MIGRATION_VERSION);
            return Ok(MigrationOutcome::default());
        }
        tracing::info!("Retrying {} wallets whose migration failed", failed.len());
        failed
    } else {
        store.list_wallet_ids()?
    };

    let mut wallets_count = 0;
    for wallet_id in &candidates {
        match migrate_wallet(store, db, wallet_id) {
            Ok(true) => wallets_count += 1,
            Ok(false) => {}
            Err(e) => {
                tracing::warn!("Skipping wallet {} during migration: {}", wallet_id, e);
                if let Err(mark_err) = db.mark_wallet_failed(wallet_id, &e.to_string()) {
                    tracing::error!(
                        "Could not record migration failure for wallet {}: {}",
                        wallet_id,
                        mark_err
                    );
                }
            }
        }
    }

    db.record_migration(BULK_MIGRATION_VERSION, wallets_count)?;
    tracing::info!(
        "Bulk migration v{} migrated {} of {} wallets",
        BULK_MIGRATION_VERSION,
        wallets_count,
        candidates.len()
    );

    Ok(MigrationOutcome {
        migrated: true,
        wallets_count,
    })
}

/// Migrate one wallet. `Ok(false)` when its rows were already present.
fn migrate_wallet(store: &RecordStore, db: &mut Database, wallet_id: &str) -> Result<bool> {
    if db.wallet_exists(wallet_id)? {
        tracing::debug!("Wallet {} already in the relational store", wallet_id);
        if db.wallet_migration_status(wallet_id)? != Some(WalletMigrationStatus::Migrated) {
            db.mark_wallet_migrated(wallet_id)?;
        }
        return Ok(false);
    }

    let record = store
        .read(wallet_id)?
        .ok_or_else(|| Error::NotFound(format!("wallet file {}", wallet_id)))?;

    db.insert_wallet(&record)?;

    for discrepancy in verify_wallet(db, &record)? {
        tracing::warn!("Wallet {} migrated with discrepancy: {}", wallet_id, discrepancy);
    }
    tracing::debug!("Migrated wallet {}", wallet_id);
    Ok(true)
}

/// Compare relational rows against the source record. Empty when they agree.
pub fn verify_wallet(db: &Database, record: &WalletRecord) -> Result<Vec<String>> {
    let wallet_id = record.wallet_id.as_str();
    let mut discrepancies = Vec::new();

    let expected_addresses = record
        .inventory
        .addresses
        .iter()
        .map(|info| info.address.as_str())
        .collect::<BTreeSet<_>>()
        .len();
    let expected_utxos = record
        .lkg
        .utxos
        .iter()
        .map(|utxo| (utxo.txid.as_str(), utxo.vout))
        .collect::<BTreeSet<_>>()
        .len();
    let expected_balance = record
        .lkg
        .utxos
        .iter()
        .map(|utxo| ((utxo.txid.as_str(), utxo.vout), utxo.value))
        .collect::<std::collections::BTreeMap<_, _>>()
        .values()
        .fold(0u64, |acc, v| acc.saturating_add(*v));
    let expected_txs = record
        .lkg
        .transactions
        .iter()
        .map(|tx| tx.txid.as_str())
        .collect::<BTreeSet<_>>()
        .len();

    let checks = [
        ("address count", expected_addresses as u64, db.address_count(wallet_id)? as u64),
        ("utxo count", expected_utxos as u64, db.utxo_count(wallet_id)? as u64),
        ("balance", expected_balance, db.utxo_balance(wallet_id)?),
        (
            "transaction count",
            expected_txs as u64,
            db.transaction_count(wallet_id)? as u64,
        ),
    ];
    for (what, expected, actual) in checks {
        if expected != actual {
            discrepancies.push(format!("{}: expected {}, found {}", what, expected, actual));
        }
    }

    Ok(discrepancies)
}
