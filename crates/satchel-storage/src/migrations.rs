//! Relational schema migrations

use crate::{Error, Result};
use rusqlite::Connection;

const SCHEMA_VERSION: i32 = 2;

/// Run all migrations
pub fn run_migrations(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;

    tracing::debug!(
        "Running migrations: current_version={}, target_version={}",
        current_version,
        SCHEMA_VERSION
    );

    if current_version < 1 {
        migrate_v1(conn)?;
        set_schema_version(conn, 1)?;
    }

    if current_version < 2 {
        migrate_v2(conn)?;
        set_schema_version(conn, 2)?;
    }

    Ok(())
}

/// Highest applied schema version (0 for a fresh database)
pub fn get_schema_version(conn: &Connection) -> Result<i32> {
    let result = conn.query_row(
        "SELECT version FROM schema_version ORDER BY version DESC LIMIT 1",
        [],
        |row| row.get(0),
    );

    match result {
        Ok(v) => Ok(v),
        Err(_) => Ok(0),
    }
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER PRIMARY KEY)",
        [],
    )?;

    let rows_affected = conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [version],
    )?;
    if rows_affected > 0 {
        tracing::debug!("Inserted schema version {}", version);
    } else {
        tracing::debug!("Schema version {} already exists, skipped insert", version);
    }
    Ok(())
}

fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE wallets (
            wallet_id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            wallet_type TEXT NOT NULL,
            import_source TEXT NOT NULL,
            network TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            last_modified INTEGER NOT NULL,
            secret_id TEXT,
            master_fingerprint TEXT,
            descriptor TEXT,
            script_types TEXT NOT NULL,
            gap_limit INTEGER NOT NULL,
            confirmed_balance INTEGER NOT NULL DEFAULT 0,
            unconfirmed_balance INTEGER NOT NULL DEFAULT 0,
            snapshot_hash TEXT NOT NULL,
            source_schema_version INTEGER NOT NULL
        );

        CREATE TABLE addresses (
            wallet_id TEXT NOT NULL,
            address TEXT NOT NULL,
            path TEXT NOT NULL,
            address_index INTEGER NOT NULL,
            is_change BOOLEAN NOT NULL DEFAULT 0,
            script_type TEXT NOT NULL,
            scripthash TEXT,
            is_used BOOLEAN NOT NULL DEFAULT 0,
            label TEXT,
            PRIMARY KEY (wallet_id, address),
            FOREIGN KEY (wallet_id) REFERENCES wallets(wallet_id) ON DELETE CASCADE
        );

        CREATE TABLE utxos (
            wallet_id TEXT NOT NULL,
            txid TEXT NOT NULL,
            vout INTEGER NOT NULL,
            value INTEGER NOT NULL,
            height INTEGER NOT NULL,
            address TEXT NOT NULL,
            script_pubkey TEXT NOT NULL,
            script_type TEXT NOT NULL,
            scripthash TEXT,
            confirmations INTEGER NOT NULL DEFAULT 0,
            frozen BOOLEAN NOT NULL DEFAULT 0,
            PRIMARY KEY (wallet_id, txid, vout),
            FOREIGN KEY (wallet_id) REFERENCES wallets(wallet_id) ON DELETE CASCADE
        );

        CREATE TABLE transactions (
            wallet_id TEXT NOT NULL,
            txid TEXT NOT NULL,
            first_seen_at INTEGER NOT NULL,
            block_height INTEGER,
            confirmations INTEGER NOT NULL DEFAULT 0,
            direction TEXT NOT NULL,
            net_value INTEGER NOT NULL,
            fee INTEGER,
            fee_rate_sat_per_kvb INTEGER,
            is_rbf BOOLEAN NOT NULL DEFAULT 0,
            status TEXT NOT NULL,
            size INTEGER,
            vsize INTEGER,
            note TEXT,
            PRIMARY KEY (wallet_id, txid),
            FOREIGN KEY (wallet_id) REFERENCES wallets(wallet_id) ON DELETE CASCADE
        );

        CREATE TABLE tx_details (
            wallet_id TEXT NOT NULL,
            txid TEXT NOT NULL,
            raw_hex TEXT,
            inputs_json TEXT NOT NULL,
            outputs_json TEXT NOT NULL,
            PRIMARY KEY (wallet_id, txid),
            FOREIGN KEY (wallet_id) REFERENCES wallets(wallet_id) ON DELETE CASCADE
        );

        CREATE TABLE sync_states (
            wallet_id TEXT PRIMARY KEY,
            status TEXT NOT NULL,
            last_successful_sync_at INTEGER,
            last_attempt_at INTEGER,
            last_known_tip_height INTEGER,
            last_server_used TEXT,
            failure_count INTEGER NOT NULL DEFAULT 0,
            next_retry_at INTEGER,
            last_error TEXT,
            last_error_at INTEGER,
            is_stale BOOLEAN NOT NULL DEFAULT 0,
            FOREIGN KEY (wallet_id) REFERENCES wallets(wallet_id) ON DELETE CASCADE
        );

        CREATE TABLE xpubs (
            wallet_id TEXT NOT NULL,
            xpub TEXT NOT NULL,
            script_type TEXT NOT NULL,
            fingerprint TEXT,
            path TEXT,
            label TEXT,
            added_at INTEGER NOT NULL,
            PRIMARY KEY (wallet_id, xpub),
            FOREIGN KEY (wallet_id) REFERENCES wallets(wallet_id) ON DELETE CASCADE
        );

        CREATE TABLE descriptors (
            wallet_id TEXT NOT NULL,
            descriptor TEXT NOT NULL,
            change_descriptor TEXT,
            is_ranged BOOLEAN NOT NULL DEFAULT 0,
            label TEXT,
            added_at INTEGER NOT NULL,
            PRIMARY KEY (wallet_id, descriptor),
            FOREIGN KEY (wallet_id) REFERENCES wallets(wallet_id) ON DELETE CASCADE
        );

        -- Chain-data subscriptions; status NULL until the first notification
        CREATE TABLE scripthash_status (
            wallet_id TEXT NOT NULL,
            address TEXT NOT NULL,
            scripthash TEXT,
            status TEXT,
            updated_at INTEGER,
            PRIMARY KEY (wallet_id, address),
            FOREIGN KEY (wallet_id) REFERENCES wallets(wallet_id) ON DELETE CASCADE
        );

        CREATE TABLE migration_log (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL,
            wallets_count INTEGER NOT NULL
        );

        CREATE INDEX idx_addresses_scripthash ON addresses(scripthash);
        CREATE INDEX idx_utxos_address ON utxos(wallet_id, address);
        CREATE INDEX idx_transactions_height ON transactions(wallet_id, block_height);
        CREATE INDEX idx_scripthash_status_hash ON scripthash_status(scripthash);
        "#,
    )
    .map_err(|e| Error::Migration(e.to_string()))?;

    Ok(())
}

fn migrate_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Per-wallet outcome of the bulk file migration
        CREATE TABLE wallet_migrations (
            wallet_id TEXT PRIMARY KEY,
            status TEXT NOT NULL CHECK (status IN ('migrated', 'failed')),
            error TEXT,
            attempts INTEGER NOT NULL DEFAULT 1,
            updated_at INTEGER NOT NULL
        );

        CREATE INDEX idx_wallet_migrations_status ON wallet_migrations(status);
        "#,
    )
    .map_err(|e| Error::Migration(e.to_string()))?;

    Ok(())
}
