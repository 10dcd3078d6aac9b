//! Persistence for the Satchel wallet engine
//!
//! Stores one JSON record per wallet with a crash-safe write protocol and
//! mirrors the records into a normalized SQLite database.
//!
//! ## Guarantees
//!
//! - **Atomic writes**: temp file, backup rotation, promote; a reader sees a
//!   complete old or new file and a corrupt primary falls back to the backup
//! - **Per-wallet ordering**: mutations of one wallet run FIFO under its lock
//! - **Last-known-good**: a failed sync never touches the committed snapshot
//! - **Integrity**: every write seals a SHA-256 over the snapshot
//! - **Schema upgrades**: v1 files are upgraded transparently on read
//! - **Bulk migration**: files are copied into SQLite once, with per-wallet
//!   markers so failed wallets are retried

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod bulk_migration;
pub mod config;
pub mod database;
pub mod error;
pub mod integrity;
pub mod locks;
pub mod migrations;
pub mod models;
pub mod store;
pub mod sync_state;
pub mod upgrade;

pub use bulk_migration::{migrate_if_needed, verify_wallet, MigrationOutcome, BULK_MIGRATION_VERSION};
pub use config::{StoreConfig, DATA_DIR_ENV};
pub use database::{
    Database, WalletMigrationStatus, BASE_BACKOFF_MS, MAX_BACKOFF_MS, MAX_BUSY_RETRIES,
};
pub use error::{Error, Result};
pub use integrity::Integrity;
pub use locks::{WalletLockGuard, WalletLocks};
pub use models::*;
pub use store::RecordStore;
pub use sync_state::{
    retry_backoff_ms, BASE_RETRY_BACKOFF_MS, MAX_RETRY_BACKOFF_MS, RETRY_BACKOFF_MULTIPLIER,
};
pub use upgrade::{VersionedRecord, WalletRecordV1, V1_PLACEHOLDER_HEIGHT};
