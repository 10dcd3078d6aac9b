//! Relational store: connection, busy retry and normalized wallet rows

use crate::models::{now_ms, WalletRecord};
use crate::{migrations, Error, Result};
use rusqlite::{params, Connection, ErrorCode, OpenFlags, OptionalExtension, Transaction};
use std::path::Path;
use std::thread;
use std::time::Duration;

/// Maximum retries for SQLITE_BUSY errors
pub const MAX_BUSY_RETRIES: u32 = 5;

/// Base backoff duration in milliseconds
pub const BASE_BACKOFF_MS: u64 = 50;

/// Maximum backoff duration in milliseconds
pub const MAX_BACKOFF_MS: u64 = 1000;

/// Outcome marker for one wallet of the bulk migration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalletMigrationStatus {
    /// Rows written and committed
    Migrated,
    /// Insert failed; eligible for retry
    Failed,
}

impl WalletMigrationStatus {
    /// Stored name
    pub fn as_str(&self) -> &'static str {
        match self {
            WalletMigrationStatus::Migrated => "migrated",
            WalletMigrationStatus::Failed => "failed",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "migrated" => Some(WalletMigrationStatus::Migrated),
            "failed" => Some(WalletMigrationStatus::Failed),
            _ => None,
        }
    }
}

/// Database connection wrapper
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open (or create) the database and bring its schema up to date
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path.as_ref(),
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        migrations::run_migrations(&conn)?;
        tracing::debug!("Opened database {}", path.as_ref().display());

        Ok(Self { conn })
    }

    /// Get connection
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Begin transaction
    pub fn transaction(&mut self) -> Result<Transaction<'_>> {
        Ok(self.conn.transaction()?)
    }

    /// Run `f`, retrying SQLITE_BUSY with capped exponential backoff
    pub fn execute_with_retry<T, F>(&mut self, mut f: F) -> Result<T>
    where
        F: FnMut(&mut Connection) -> Result<T>,
    {
        let mut attempts = 0;

        loop {
            match f(&mut self.conn) {
                Ok(result) => return Ok(result),
                Err(Error::Database(ref e)) if is_busy_error(e) && attempts < MAX_BUSY_RETRIES => {
                    attempts += 1;
                    let backoff = calculate_backoff(attempts);
                    tracing::debug!(
                        "SQLITE_BUSY (attempt {}/{}), retrying in {}ms",
                        attempts,
                        MAX_BUSY_RETRIES,
                        backoff
                    );
                    thread::sleep(Duration::from_millis(backoff));
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Whether a wallet row exists
    pub fn wallet_exists(&self, wallet_id: &str) -> Result<bool> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM wallets WHERE wallet_id = ?1",
                [wallet_id],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Ids of all wallet rows, sorted
    pub fn wallet_ids(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT wallet_id FROM wallets ORDER BY wallet_id")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    /// Address rows for a wallet
    pub fn address_count(&self, wallet_id: &str) -> Result<usize> {
        self.count("SELECT COUNT(*) FROM addresses WHERE wallet_id = ?1", wallet_id)
    }

    /// UTXO rows for a wallet
    pub fn utxo_count(&self, wallet_id: &str) -> Result<usize> {
        self.count("SELECT COUNT(*) FROM utxos WHERE wallet_id = ?1", wallet_id)
    }

    /// Transaction rows for a wallet
    pub fn transaction_count(&self, wallet_id: &str) -> Result<usize> {
        self.count(
            "SELECT COUNT(*) FROM transactions WHERE wallet_id = ?1",
            wallet_id,
        )
    }

    /// Scripthash subscription rows for a wallet
    pub fn scripthash_status_count(&self, wallet_id: &str) -> Result<usize> {
        self.count(
            "SELECT COUNT(*) FROM scripthash_status WHERE wallet_id = ?1",
            wallet_id,
        )
    }

    /// Σ utxo value for a wallet, in satoshis
    pub fn utxo_balance(&self, wallet_id: &str) -> Result<u64> {
        let total: i64 = self.conn.query_row(
            "SELECT COALESCE(SUM(value), 0) FROM utxos WHERE wallet_id = ?1",
            [wallet_id],
            |row| row.get(0),
        )?;
        Ok(total.max(0) as u64)
    }

    /// Sync status column for a wallet
    pub fn sync_status(&self, wallet_id: &str) -> Result<Option<String>> {
        Ok(self
            .conn
            .query_row(
                "SELECT status FROM sync_states WHERE wallet_id = ?1",
                [wallet_id],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// Whether the migration log holds `version`
    pub fn migration_applied(&self, version: i64) -> Result<bool> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM migration_log WHERE version = ?1",
                [version],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Record (or refresh) a migration log entry
    pub fn record_migration(&mut self, version: i64, wallets_count: usize) -> Result<()> {
        let applied_at = now_ms();
        self.execute_with_retry(|conn| {
            conn.execute(
                "INSERT INTO migration_log (version, applied_at, wallets_count)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(version) DO UPDATE SET
                    applied_at = excluded.applied_at,
                    wallets_count = wallets_count + excluded.wallets_count",
                params![version, applied_at, wallets_count as i64],
            )?;
            Ok(())
        })
    }

    /// Per-wallet migration marker
    pub fn wallet_migration_status(
        &self,
        wallet_id: &str,
    ) -> Result<Option<WalletMigrationStatus>> {
        let status: Option<String> = self
            .conn
            .query_row(
                "SELECT status FROM wallet_migrations WHERE wallet_id = ?1",
                [wallet_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(status.as_deref().and_then(WalletMigrationStatus::parse))
    }

    /// Last recorded error for a failed wallet
    pub fn wallet_migration_error(&self, wallet_id: &str) -> Result<Option<String>> {
        let error: Option<Option<String>> = self
            .conn
            .query_row(
                "SELECT error FROM wallet_migrations WHERE wallet_id = ?1",
                [wallet_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(error.flatten())
    }

    /// Mark a wallet as failed outside any insert transaction
    pub fn mark_wallet_failed(&mut self, wallet_id: &str, error: &str) -> Result<()> {
        self.execute_with_retry(|conn| {
            set_wallet_marker(conn, wallet_id, WalletMigrationStatus::Failed, Some(error))
        })
    }

    /// Mark a wallet as migrated without inserting rows (already present)
    pub fn mark_wallet_migrated(&mut self, wallet_id: &str) -> Result<()> {
        self.execute_with_retry(|conn| {
            set_wallet_marker(conn, wallet_id, WalletMigrationStatus::Migrated, None)
        })
    }

    /// Wallet ids whose marker is `failed`, sorted
    pub fn failed_wallet_ids(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT wallet_id FROM wallet_migrations WHERE status = 'failed' ORDER BY wallet_id",
        )?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    /// Insert every row for `record` and its `migrated` marker in one transaction
    pub fn insert_wallet(&mut self, record: &WalletRecord) -> Result<()> {
        self.execute_with_retry(|conn| {
            let tx = conn.transaction()?;
            insert_wallet_tx(&tx, record)?;
            set_wallet_marker(&tx, &record.wallet_id, WalletMigrationStatus::Migrated, None)?;
            tx.commit()?;
            Ok(())
        })
    }

    fn count(&self, sql: &str, wallet_id: &str) -> Result<usize> {
        let n: i64 = self.conn.query_row(sql, [wallet_id], |row| row.get(0))?;
        Ok(n.max(0) as usize)
    }
}

/// Write the normalized rows of one wallet inside `tx`
pub fn insert_wallet_tx(tx: &Transaction<'_>, record: &WalletRecord) -> Result<()> {
    let wallet_id = record.wallet_id.as_str();
    let script_types = serde_json::to_string(&record.key_ref.script_types)?;

    tx.execute(
        "INSERT INTO wallets (
            wallet_id, name, wallet_type, import_source, network, created_at,
            last_modified, secret_id, master_fingerprint, descriptor, script_types,
            gap_limit, confirmed_balance, unconfirmed_balance, snapshot_hash,
            source_schema_version
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
        params![
            wallet_id,
            record.name,
            record.wallet_type.as_str(),
            enum_name(&record.import_source)?,
            record.network.as_str(),
            record.created_at,
            record.last_modified,
            record.key_ref.secret_id,
            record.key_ref.master_fingerprint,
            record.key_ref.descriptor,
            script_types,
            record.inventory.gap_limit,
            record.lkg.confirmed_balance as i64,
            record.lkg.unconfirmed_balance as i64,
            record.integrity.snapshot_hash,
            record.schema_version,
        ],
    )?;

    for info in &record.inventory.addresses {
        let scripthash = match satchel_core::scripthash(&info.address, record.network) {
            Ok(hash) => Some(hash),
            Err(e) => {
                tracing::debug!(
                    "No scripthash for {} in wallet {}: {}",
                    info.address,
                    wallet_id,
                    e
                );
                None
            }
        };
        tx.execute(
            "INSERT OR IGNORE INTO addresses (
                wallet_id, address, path, address_index, is_change, script_type,
                scripthash, is_used, label
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                wallet_id,
                info.address,
                info.path,
                info.index,
                info.is_change,
                info.script_type.as_str(),
                scripthash,
                record.inventory.used.contains(&info.address),
                record.address_labels.get(&info.address),
            ],
        )?;
        tx.execute(
            "INSERT OR IGNORE INTO scripthash_status (wallet_id, address, scripthash, status, updated_at)
             VALUES (?1, ?2, ?3, NULL, NULL)",
            params![wallet_id, info.address, scripthash],
        )?;
    }

    for utxo in &record.lkg.utxos {
        let frozen = record
            .utxo_metadata
            .get(&utxo.outpoint())
            .map(|m| m.frozen)
            .unwrap_or(false);
        tx.execute(
            "INSERT OR REPLACE INTO utxos (
                wallet_id, txid, vout, value, height, address, script_pubkey,
                script_type, scripthash, confirmations, frozen
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                wallet_id,
                utxo.txid,
                utxo.vout,
                utxo.value as i64,
                utxo.height,
                utxo.address,
                utxo.script_pubkey,
                utxo.script_type.as_str(),
                utxo.scripthash,
                utxo.confirmations,
                frozen,
            ],
        )?;
    }

    for entry in &record.lkg.transactions {
        let note = record
            .tx_metadata
            .get(&entry.txid)
            .and_then(|m| m.note.clone());
        tx.execute(
            "INSERT OR REPLACE INTO transactions (
                wallet_id, txid, first_seen_at, block_height, confirmations, direction,
                net_value, fee, fee_rate_sat_per_kvb, is_rbf, status, size, vsize, note
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                wallet_id,
                entry.txid,
                entry.first_seen_at,
                entry.block_height,
                entry.confirmations,
                enum_name(&entry.direction)?,
                entry.net_value,
                entry.fee.map(|f| f as i64),
                entry.fee_rate_sat_per_kvb.map(|f| f as i64),
                entry.is_rbf,
                enum_name(&entry.status)?,
                entry.size,
                entry.vsize,
                note,
            ],
        )?;
    }

    for (txid, detail) in &record.lkg.tx_details {
        tx.execute(
            "INSERT OR REPLACE INTO tx_details (wallet_id, txid, raw_hex, inputs_json, outputs_json)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                wallet_id,
                txid,
                detail.raw_hex,
                serde_json::to_string(&detail.inputs)?,
                serde_json::to_string(&detail.outputs)?,
            ],
        )?;
    }

    let state = &record.sync_state;
    tx.execute(
        "INSERT OR REPLACE INTO sync_states (
            wallet_id, status, last_successful_sync_at, last_attempt_at,
            last_known_tip_height, last_server_used, failure_count, next_retry_at,
            last_error, last_error_at, is_stale
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            wallet_id,
            state.status.as_str(),
            state.last_successful_sync_at,
            state.last_attempt_at,
            state.last_known_tip_height,
            state.last_server_used,
            state.failure_count,
            state.next_retry_at,
            state.last_error,
            state.last_error_at,
            state.is_stale,
        ],
    )?;

    for xpub in &record.xpubs {
        tx.execute(
            "INSERT OR REPLACE INTO xpubs (wallet_id, xpub, script_type, fingerprint, path, label, added_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                wallet_id,
                xpub.xpub,
                xpub.script_type.as_str(),
                xpub.fingerprint,
                xpub.path,
                xpub.label,
                xpub.added_at,
            ],
        )?;
    }

    for desc in &record.descriptors {
        tx.execute(
            "INSERT OR REPLACE INTO descriptors (wallet_id, descriptor, change_descriptor, is_ranged, label, added_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                wallet_id,
                desc.descriptor,
                desc.change_descriptor,
                desc.is_ranged,
                desc.label,
                desc.added_at,
            ],
        )?;
    }

    Ok(())
}

fn set_wallet_marker(
    conn: &Connection,
    wallet_id: &str,
    status: WalletMigrationStatus,
    error: Option<&str>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO wallet_migrations (wallet_id, status, error, attempts, updated_at)
         VALUES (?1, ?2, ?3, 1, ?4)
         ON CONFLICT(wallet_id) DO UPDATE SET
            status = excluded.status,
            error = excluded.error,
            attempts = attempts + 1,
            updated_at = excluded.updated_at",
        params![wallet_id, status.as_str(), error, now_ms()],
    )?;
    Ok(())
}

/// Serde name of a unit enum variant
fn enum_name<T: serde::Serialize>(value: &T) -> Result<String> {
    match serde_json::to_value(value)? {
        serde_json::Value::String(s) => Ok(s),
        other => Err(Error::Validation(format!("not a unit variant: {}", other))),
    }
}

/// Check if error is SQLITE_BUSY
fn is_busy_error(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error {
                code: ErrorCode::DatabaseBusy,
                ..
            },
            _
        )
    )
}

/// Calculate exponential backoff with jitter
fn calculate_backoff(attempt: u32) -> u64 {
    let base = BASE_BACKOFF_MS * (1 << attempt.min(6));
    let jitter = rand::random::<u64>() % (base / 4 + 1);
    (base + jitter).min(MAX_BACKOFF_MS)
}
