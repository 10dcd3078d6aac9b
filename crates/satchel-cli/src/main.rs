//! Operator CLI for the Satchel wallet store
//!
//! - Import watch-only wallets and derive addresses
//! - Inspect and verify wallet records
//! - Run the file → SQLite migration
//! - Sweep orphan temp files

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use satchel_core::WatchOnlyWallet;
use satchel_params::NetworkType;
use satchel_storage::{migrate_if_needed, Database, RecordStore, StoreConfig, WalletRecord};
use serde_json::json;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "satchel")]
#[command(about = "Satchel wallet store maintenance", long_about = None)]
struct Cli {
    /// Data directory (defaults to $SATCHEL_DATA_DIR, then the platform data dir)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Copy wallet files into the SQLite store (no-op once done)
    Migrate {
        /// Database path (defaults to <data-dir>/satchel.db)
        #[arg(long)]
        db: Option<PathBuf>,
    },

    /// Check snapshot integrity of one wallet, or all of them
    Verify {
        /// Wallet id
        id: Option<String>,
    },

    /// Print a JSON summary of a wallet
    Inspect {
        /// Wallet id
        id: String,
    },

    /// Delete orphan temp files
    Sweep {
        /// Only delete temp files at least this old
        #[arg(long, default_value = "60")]
        grace_secs: u64,
    },

    /// Derive addresses from an extended public key or descriptor
    Derive {
        /// xpub/ypub/zpub/tpub/upub/vpub or output descriptor
        #[arg(short, long)]
        key: String,

        /// Number of addresses
        #[arg(short, long, default_value = "10")]
        count: u32,

        /// First index
        #[arg(short, long, default_value = "0")]
        start: u32,

        /// Derive from the change chain
        #[arg(long)]
        change: bool,

        /// Network override for test keys (testnet, signet, regtest)
        #[arg(short, long)]
        network: Option<NetworkType>,
    },

    /// Create a watch-only wallet record
    Import {
        /// Extended public key or output descriptor
        #[arg(short, long, conflicts_with = "addresses")]
        key: Option<String>,

        /// Comma-separated address list
        #[arg(short, long, value_delimiter = ',')]
        addresses: Vec<String>,

        /// Display name
        #[arg(long, default_value = "Watch-only")]
        name: String,

        /// Wallet id (random when omitted)
        #[arg(long)]
        id: Option<String>,

        /// Addresses derived per chain
        #[arg(long)]
        gap_limit: Option<u32>,

        /// Network override for test keys
        #[arg(short, long)]
        network: Option<NetworkType>,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = match cli.data_dir {
        Some(dir) => StoreConfig::from_env().with_data_dir(dir),
        None => StoreConfig::from_env(),
    };

    match cli.command {
        Commands::Migrate { db } => run_migrate(config, db),
        Commands::Verify { id } => run_verify(config, id),
        Commands::Inspect { id } => run_inspect(config, &id),
        Commands::Sweep { grace_secs } => run_sweep(config, grace_secs),
        Commands::Derive {
            key,
            count,
            start,
            change,
            network,
        } => run_derive(&key, start, count, change, network),
        Commands::Import {
            key,
            addresses,
            name,
            id,
            gap_limit,
            network,
        } => run_import(config, key, addresses, name, id, gap_limit, network),
    }
}

fn run_migrate(config: StoreConfig, db: Option<PathBuf>) -> anyhow::Result<()> {
    let db_path = db.unwrap_or_else(|| config.database_path());
    info!("Migrating {} into {}", config.wallet_dir().display(), db_path.display());

    let store = RecordStore::open(config)?;
    let mut database = Database::open(&db_path)
        .with_context(|| format!("opening database {}", db_path.display()))?;
    let outcome = migrate_if_needed(&store, &mut database)?;

    let failed = database.failed_wallet_ids()?;
    if !failed.is_empty() {
        warn!("{} wallets still failing migration: {}", failed.len(), failed.join(", "));
    }
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

fn run_verify(config: StoreConfig, id: Option<String>) -> anyhow::Result<()> {
    let store = RecordStore::open(config)?;
    let ids = match id {
        Some(id) => vec![id],
        None => store.list_wallet_ids()?,
    };

    let mut mismatches = 0;
    for id in &ids {
        if !store.exists(id) {
            println!("{}\tmissing", id);
            mismatches += 1;
            continue;
        }
        if store.verify_integrity(id)? {
            println!("{}\tok", id);
        } else {
            println!("{}\tMISMATCH", id);
            mismatches += 1;
        }
    }

    if mismatches > 0 {
        bail!("{} of {} wallets failed verification", mismatches, ids.len());
    }
    Ok(())
}

fn run_inspect(config: StoreConfig, id: &str) -> anyhow::Result<()> {
    let store = RecordStore::open(config)?;
    let record = store
        .read(id)?
        .with_context(|| format!("wallet {} not found", id))?;
    let integrity_ok = satchel_storage::integrity::verify(&record)?;
    println!("{}", serde_json::to_string_pretty(&summary(&record, integrity_ok))?);
    Ok(())
}

fn summary(record: &WalletRecord, integrity_ok: bool) -> serde_json::Value {
    let state = &record.sync_state;
    json!({
        "walletId": record.wallet_id,
        "name": record.name,
        "walletType": record.wallet_type,
        "importSource": record.import_source,
        "network": record.network,
        "schemaVersion": record.schema_version,
        "addresses": record.inventory.len(),
        "usedAddresses": record.inventory.used.len(),
        "sync": {
            "status": state.status,
            "isStale": state.is_stale,
            "failureCount": state.failure_count,
            "lastSuccessfulSyncAt": state.last_successful_sync_at,
            "nextRetryAt": state.next_retry_at,
            "lastError": state.last_error,
            "tipHeight": state.last_known_tip_height,
        },
        "balance": {
            "confirmed": record.lkg.confirmed_balance,
            "unconfirmed": record.lkg.unconfirmed_balance,
        },
        "utxos": record.lkg.utxos.len(),
        "transactions": record.lkg.transactions.len(),
        "integrityOk": integrity_ok,
        "atomicWriteId": record.integrity.atomic_write_id,
    })
}

fn run_sweep(config: StoreConfig, grace_secs: u64) -> anyhow::Result<()> {
    // Open without the startup sweep so the count below covers every removal
    let store = RecordStore::open(config.with_temp_grace(Duration::MAX))?;
    let removed = store.sweep_orphan_temps_older_than(Duration::from_secs(grace_secs))?;
    println!("removed {} orphan temp files", removed);
    Ok(())
}

fn watch_only_from_key(key: &str, network: Option<NetworkType>) -> anyhow::Result<WatchOnlyWallet> {
    let wallet = if key.contains('(') {
        WatchOnlyWallet::from_descriptor(key, network)?
    } else {
        WatchOnlyWallet::from_extended_key(key, network)?
    };
    Ok(wallet)
}

fn run_derive(
    key: &str,
    start: u32,
    count: u32,
    change: bool,
    network: Option<NetworkType>,
) -> anyhow::Result<()> {
    let wallet = watch_only_from_key(key, network)?;
    info!(
        "Deriving {} {} addresses ({}, {})",
        count,
        if change { "change" } else { "receive" },
        wallet.network(),
        wallet.script_type()
    );
    for info in wallet.derive_range(start, count, change)? {
        println!("{}\t{}", info.path, info.address);
    }
    Ok(())
}

fn run_import(
    config: StoreConfig,
    key: Option<String>,
    addresses: Vec<String>,
    name: String,
    id: Option<String>,
    gap_limit: Option<u32>,
    network: Option<NetworkType>,
) -> anyhow::Result<()> {
    let wallet = match key {
        Some(key) => watch_only_from_key(&key, network)?,
        None if !addresses.is_empty() => WatchOnlyWallet::from_addresses(addresses.as_slice())?,
        None => bail!("pass --key or --addresses"),
    };

    let gap_limit = gap_limit.unwrap_or(config.default_gap_limit);
    let id = id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let store = RecordStore::open(config)?;
    let record = store.create(WalletRecord::watch_only(id, name, &wallet, gap_limit)?)?;

    println!("{}", serde_json::to_string_pretty(&summary(&record, true))?);
    Ok(())
}
