//! Per-wallet record store
//!
//! One JSON file per wallet, a single-slot backup, and uniquely named temp
//! files while a write is in flight:
//!
//! ```text
//! wallets/
//!   wallet_<id>.json                  primary
//!   wallet_<id>.json.bak              previous primary
//!   wallet_<id>.json.<ms>-<rand>.tmp  in-flight write
//! ```
//!
//! Every mutation runs read-modify-write under the wallet's lock. Reads
//! take no lock; the write protocol always leaves a complete old or new
//! file in place and a corrupt primary falls back to the backup.

use crate::config::StoreConfig;
use crate::integrity;
use crate::locks::WalletLocks;
use crate::models::{
    now_ms, BackupMeta, DescriptorEntry, LkgSnapshot, SyncStatus, TxUserMetadata,
    UtxoUserMetadata, WalletRecord, WalletRecordPatch, XpubEntry, CURRENT_SCHEMA_VERSION,
};
use crate::upgrade;
use crate::{Error, Result};
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

const FILE_PREFIX: &str = "wallet_";
const PRIMARY_SUFFIX: &str = ".json";
const BACKUP_SUFFIX: &str = ".json.bak";
const TEMP_SUFFIX: &str = ".tmp";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    Primary,
    Backup,
}

struct Loaded {
    record: WalletRecord,
    source: Source,
    upgraded: bool,
    raw: Vec<u8>,
}

impl Loaded {
    fn is_settled(&self) -> bool {
        self.source == Source::Primary && !self.upgraded
    }
}

/// File-backed wallet record store
#[derive(Debug)]
pub struct RecordStore {
    config: StoreConfig,
    dir: PathBuf,
    locks: WalletLocks,
}

impl RecordStore {
    /// Open the store, creating the wallet directory and sweeping orphan temp files
    pub fn open(config: StoreConfig) -> Result<Self> {
        let dir = config.wallet_dir();
        fs::create_dir_all(&dir)?;
        let store = Self {
            config,
            dir,
            locks: WalletLocks::new(),
        };

        match store.sweep_orphan_temps() {
            Ok(0) => {}
            Ok(n) => tracing::info!("Removed {} orphan temp files from {}", n, store.dir.display()),
            Err(e) => tracing::warn!("Orphan temp sweep failed: {}", e),
        }
        Ok(store)
    }

    /// Configuration
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Directory holding the wallet files
    pub fn wallet_dir(&self) -> &Path {
        &self.dir
    }

    /// Whether a primary or backup file exists for `wallet_id`
    pub fn exists(&self, wallet_id: &str) -> bool {
        self.primary_path(wallet_id).exists() || self.backup_path(wallet_id).exists()
    }

    /// Load a wallet.
    ///
    /// Older schemas are upgraded and written back; an unreadable primary
    /// falls back to the backup, which is re-established as primary. When
    /// neither file is readable the wallet is treated as absent.
    pub fn read(&self, wallet_id: &str) -> Result<Option<WalletRecord>> {
        let Some(loaded) = self.load(wallet_id)? else {
            return Ok(None);
        };
        if loaded.is_settled() {
            return Ok(Some(loaded.record));
        }

        let _guard = self.locks.acquire(wallet_id);
        let Some(loaded) = self.load(wallet_id)? else {
            return Ok(None);
        };
        let unsettled = loaded.record.clone();
        match self.settle(wallet_id, loaded) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                tracing::error!(
                    "Failed to write back recovered wallet {}: {}",
                    wallet_id,
                    e
                );
                Ok(Some(unsettled))
            }
        }
    }

    /// First write of a new wallet. Errors propagate.
    pub fn create(&self, mut record: WalletRecord) -> Result<WalletRecord> {
        validate_id(&record.wallet_id)?;
        let _guard = self.locks.acquire(&record.wallet_id);
        if self.exists(&record.wallet_id) {
            return Err(Error::WalletAlreadyExists(record.wallet_id));
        }
        self.persist(&mut record)?;
        tracing::info!(
            "Created wallet {} ({})",
            record.wallet_id,
            record.wallet_type.as_str()
        );
        Ok(record)
    }

    /// Write a full record. `createdAt` of an existing wallet is kept.
    pub fn write(&self, record: &WalletRecord) -> Result<bool> {
        validate_id(&record.wallet_id)?;
        let wallet_id = record.wallet_id.as_str();
        let _guard = self.locks.acquire(wallet_id);

        let mut record = record.clone();
        let result = (|| -> Result<()> {
            if let Some(existing) = self.load(wallet_id)? {
                record.created_at = existing.record.created_at;
                if existing.source == Source::Backup {
                    remove_if_exists(&self.primary_path(wallet_id))?;
                }
            }
            self.persist(&mut record)
        })();

        match result {
            Ok(()) => {
                tracing::debug!(
                    "Wrote wallet {} (write {})",
                    wallet_id,
                    record.integrity.atomic_write_id
                );
                Ok(true)
            }
            Err(e) => {
                tracing::error!("write failed for wallet {}: {}", wallet_id, e);
                Err(e)
            }
        }
    }

    /// Read-merge-write a partial record
    pub fn update(&self, wallet_id: &str, patch: WalletRecordPatch) -> Result<bool> {
        self.mutate(wallet_id, "update", |record| {
            patch.apply(record);
            Ok(())
        })
    }

    /// Enter `syncing` with an in-flight snapshot
    pub fn save_staging(&self, wallet_id: &str, mut staging: LkgSnapshot) -> Result<bool> {
        staging.recompute_balances();
        self.mutate(wallet_id, "save_staging", |record| {
            record.sync_state.begin_attempt(now_ms());
            record.staging = Some(staging);
            Ok(())
        })
    }

    /// Promote `snapshot` to LKG, clear staging and enter `synced`
    pub fn commit_lkg(&self, wallet_id: &str, snapshot: LkgSnapshot) -> Result<bool> {
        self.commit_lkg_from(wallet_id, snapshot, None)
    }

    /// [`commit_lkg`](Self::commit_lkg), recording which server produced the snapshot
    pub fn commit_lkg_from(
        &self,
        wallet_id: &str,
        mut snapshot: LkgSnapshot,
        server: Option<String>,
    ) -> Result<bool> {
        self.mutate(wallet_id, "commit_lkg", |record| {
            let now = now_ms();
            snapshot.recompute_balances();
            snapshot.committed_at = now;

            for utxo in &snapshot.utxos {
                record.inventory.mark_used(&utxo.address);
            }
            record.sync_state.record_success(now, snapshot.tip_height, server);
            record.lkg = snapshot;
            record.staging = None;
            Ok(())
        })
    }

    /// Enter `error`, schedule a retry and discard staging. LKG is untouched.
    pub fn record_sync_error(&self, wallet_id: &str, message: &str) -> Result<bool> {
        tracing::warn!("Sync failed for wallet {}: {}", wallet_id, message);
        self.mutate(wallet_id, "record_sync_error", |record| {
            record.staging = None;
            record.sync_state.record_failure(now_ms(), message);
            Ok(())
        })
    }

    /// Flag a wallet stale without touching LKG
    pub fn mark_stale(&self, wallet_id: &str) -> Result<bool> {
        self.mutate(wallet_id, "mark_stale", |record| {
            record.sync_state.mark_stale();
            Ok(())
        })
    }

    /// Recompute the LKG hash and compare with the stored one.
    ///
    /// Never writes: a recovered backup is checked in place, and a file
    /// still at an older schema reports false until a `read` upgrades it.
    pub fn verify_integrity(&self, wallet_id: &str) -> Result<bool> {
        match self.load(wallet_id)? {
            Some(loaded) if loaded.upgraded => Ok(false),
            Some(loaded) => integrity::verify(&loaded.record),
            None => Ok(false),
        }
    }

    /// Remove primary, backup and any temp files for `wallet_id`
    pub fn delete(&self, wallet_id: &str) -> Result<bool> {
        let removed = {
            let _guard = self.locks.acquire(wallet_id);
            let mut removed = remove_if_exists(&self.primary_path(wallet_id))?;
            removed |= remove_if_exists(&self.backup_path(wallet_id))?;
            for temp in self.temp_files_for(wallet_id)? {
                removed |= remove_if_exists(&temp)?;
            }
            removed
        };
        self.locks.prune();

        if removed {
            tracing::info!("Deleted wallet {}", wallet_id);
        }
        Ok(removed)
    }

    /// Set or clear (empty value) a transaction note/tags
    pub fn update_tx_user_metadata(
        &self,
        wallet_id: &str,
        txid: &str,
        metadata: TxUserMetadata,
    ) -> Result<bool> {
        self.mutate(wallet_id, "update_tx_user_metadata", |record| {
            if metadata == TxUserMetadata::default() {
                record.tx_metadata.remove(txid);
            } else {
                record.tx_metadata.insert(txid.to_string(), metadata);
            }
            Ok(())
        })
    }

    /// Set or clear (empty value) utxo flags, keyed by `txid:vout`
    pub fn update_utxo_user_metadata(
        &self,
        wallet_id: &str,
        outpoint: &str,
        metadata: UtxoUserMetadata,
    ) -> Result<bool> {
        self.mutate(wallet_id, "update_utxo_user_metadata", |record| {
            if metadata == UtxoUserMetadata::default() {
                record.utxo_metadata.remove(outpoint);
            } else {
                record.utxo_metadata.insert(outpoint.to_string(), metadata);
            }
            Ok(())
        })
    }

    /// Set an address label; `None` or an empty label removes it
    pub fn update_address_label(
        &self,
        wallet_id: &str,
        address: &str,
        label: Option<&str>,
    ) -> Result<bool> {
        self.mutate(wallet_id, "update_address_label", |record| {
            match label.map(str::trim).filter(|l| !l.is_empty()) {
                Some(label) => {
                    record
                        .address_labels
                        .insert(address.to_string(), label.to_string());
                }
                None => {
                    record.address_labels.remove(address);
                }
            }
            Ok(())
        })
    }

    /// Replace imported extended keys
    pub fn update_xpubs(&self, wallet_id: &str, xpubs: Vec<XpubEntry>) -> Result<bool> {
        self.mutate(wallet_id, "update_xpubs", |record| {
            record.xpubs = xpubs;
            Ok(())
        })
    }

    /// Replace imported descriptors
    pub fn update_descriptors(
        &self,
        wallet_id: &str,
        descriptors: Vec<DescriptorEntry>,
    ) -> Result<bool> {
        self.mutate(wallet_id, "update_descriptors", |record| {
            record.descriptors = descriptors;
            Ok(())
        })
    }

    /// Replace backup bookkeeping
    pub fn update_backup_meta(&self, wallet_id: &str, backup: BackupMeta) -> Result<bool> {
        self.mutate(wallet_id, "update_backup_meta", |record| {
            record.backup = backup;
            Ok(())
        })
    }

    /// Wallet ids with a primary or backup file, sorted
    pub fn list_wallet_ids(&self) -> Result<Vec<String>> {
        let mut ids = BTreeSet::new();
        for entry in fs::read_dir(&self.dir)? {
            let name = entry?.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(rest) = name.strip_prefix(FILE_PREFIX) else {
                continue;
            };
            let encoded = rest
                .strip_suffix(PRIMARY_SUFFIX)
                .or_else(|| rest.strip_suffix(BACKUP_SUFFIX));
            if let Some(id) = encoded.and_then(decode_id) {
                ids.insert(id);
            }
        }
        Ok(ids.into_iter().collect())
    }

    /// Delete temp files older than the grace window. Returns how many were removed.
    pub fn sweep_orphan_temps(&self) -> Result<usize> {
        self.sweep_orphan_temps_older_than(self.config.temp_grace)
    }

    /// Delete temp files at least `grace` old
    pub fn sweep_orphan_temps_older_than(&self, grace: Duration) -> Result<usize> {
        let mut removed = 0;
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !(name.starts_with(FILE_PREFIX) && name.ends_with(TEMP_SUFFIX)) {
                continue;
            }
            let age = entry
                .metadata()?
                .modified()?
                .elapsed()
                .unwrap_or_default();
            if age >= grace && remove_if_exists(&entry.path())? {
                tracing::debug!("Removed orphan temp file {}", name);
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn mutate<F>(&self, wallet_id: &str, op: &'static str, f: F) -> Result<bool>
    where
        F: FnOnce(&mut WalletRecord) -> Result<()>,
    {
        let _guard = self.locks.acquire(wallet_id);
        let result = (|| -> Result<Option<String>> {
            let Some(loaded) = self.load(wallet_id)? else {
                return Ok(None);
            };
            if loaded.source == Source::Backup {
                remove_if_exists(&self.primary_path(wallet_id))?;
            }
            let mut record = loaded.record;
            f(&mut record)?;
            self.persist(&mut record)?;
            Ok(Some(record.integrity.atomic_write_id))
        })();

        match result {
            Ok(Some(write_id)) => {
                tracing::debug!("{} committed for wallet {} (write {})", op, wallet_id, write_id);
                Ok(true)
            }
            Ok(None) => {
                tracing::debug!("{} skipped: wallet {} not found", op, wallet_id);
                Ok(false)
            }
            Err(e) => {
                tracing::error!("{} failed for wallet {}: {}", op, wallet_id, e);
                Err(e)
            }
        }
    }

    fn load(&self, wallet_id: &str) -> Result<Option<Loaded>> {
        match load_file(&self.primary_path(wallet_id), wallet_id) {
            Ok(Some((record, upgraded, raw))) => {
                return Ok(Some(Loaded {
                    record,
                    source: Source::Primary,
                    upgraded,
                    raw,
                }))
            }
            Ok(None) => {}
            Err(e @ Error::UnsupportedSchema(_)) => return Err(e),
            Err(e) => tracing::warn!("Primary file for wallet {} unreadable: {}", wallet_id, e),
        }

        match load_file(&self.backup_path(wallet_id), wallet_id) {
            Ok(Some((record, upgraded, raw))) => {
                tracing::warn!("Recovered wallet {} from backup", wallet_id);
                Ok(Some(Loaded {
                    record,
                    source: Source::Backup,
                    upgraded,
                    raw,
                }))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                tracing::warn!(
                    "Backup for wallet {} unreadable, treating as not found: {}",
                    wallet_id,
                    e
                );
                Ok(None)
            }
        }
    }

    /// Write back an upgraded or backup-recovered record. Caller holds the lock.
    fn settle(&self, wallet_id: &str, loaded: Loaded) -> Result<WalletRecord> {
        let Loaded {
            mut record,
            source,
            upgraded,
            raw,
        } = loaded;

        if source == Source::Backup {
            // Drop the corrupt primary so promotion does not overwrite the good backup
            remove_if_exists(&self.primary_path(wallet_id))?;
        }
        if upgraded {
            self.persist(&mut record)?;
            tracing::info!(
                "Persisted upgraded wallet {} at schema v{}",
                wallet_id,
                CURRENT_SCHEMA_VERSION
            );
        } else if source == Source::Backup {
            self.write_bytes_atomic(wallet_id, &raw)?;
            tracing::info!("Re-established backup as primary for wallet {}", wallet_id);
        }
        Ok(record)
    }

    /// Enforce record invariants, reseal and write
    fn persist(&self, record: &mut WalletRecord) -> Result<()> {
        record.schema_version = CURRENT_SCHEMA_VERSION;
        record.last_modified = now_ms();
        if record.sync_state.status != SyncStatus::Syncing && record.staging.take().is_some() {
            tracing::debug!(
                "Discarded staging for wallet {} outside syncing",
                record.wallet_id
            );
        }
        record.lkg.recompute_balances();
        if let Some(staging) = record.staging.as_mut() {
            staging.recompute_balances();
        }
        integrity::seal(record)?;

        let bytes = serde_json::to_vec_pretty(record)?;
        self.write_bytes_atomic(&record.wallet_id, &bytes)
    }

    /// temp write → primary to backup → promote temp
    fn write_bytes_atomic(&self, wallet_id: &str, bytes: &[u8]) -> Result<()> {
        let primary = self.primary_path(wallet_id);
        let backup = self.backup_path(wallet_id);
        let temp = self.temp_path(wallet_id);

        if let Err(e) = write_synced(&temp, bytes) {
            let _ = fs::remove_file(&temp);
            return Err(e.into());
        }

        if primary.exists() {
            remove_if_exists(&backup)?;
            if let Err(e) = fs::rename(&primary, &backup) {
                tracing::warn!(
                    "Could not move primary to backup for wallet {}: {}; removing primary",
                    wallet_id,
                    e
                );
                remove_if_exists(&primary)?;
            }
        }

        remove_if_exists(&primary)?;
        if let Err(e) = fs::rename(&temp, &primary) {
            let _ = fs::remove_file(&temp);
            return Err(e.into());
        }
        Ok(())
    }

    fn file_stem(&self, wallet_id: &str) -> String {
        format!("{}{}", FILE_PREFIX, encode_id(wallet_id))
    }

    fn primary_path(&self, wallet_id: &str) -> PathBuf {
        self.dir
            .join(format!("{}{}", self.file_stem(wallet_id), PRIMARY_SUFFIX))
    }

    fn backup_path(&self, wallet_id: &str) -> PathBuf {
        self.dir
            .join(format!("{}{}", self.file_stem(wallet_id), BACKUP_SUFFIX))
    }

    fn temp_path(&self, wallet_id: &str) -> PathBuf {
        self.dir.join(format!(
            "{}{}.{}-{:08x}{}",
            self.file_stem(wallet_id),
            PRIMARY_SUFFIX,
            now_ms(),
            rand::random::<u32>(),
            TEMP_SUFFIX
        ))
    }

    fn temp_files_for(&self, wallet_id: &str) -> Result<Vec<PathBuf>> {
        let prefix = format!("{}{}.", self.file_stem(wallet_id), PRIMARY_SUFFIX);
        let mut temps = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.starts_with(&prefix) && name.ends_with(TEMP_SUFFIX) {
                temps.push(entry.path());
            }
        }
        Ok(temps)
    }
}

fn load_file(path: &Path, wallet_id: &str) -> Result<Option<(WalletRecord, bool, Vec<u8>)>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let (record, upgraded) = upgrade::upgrade_to_current(upgrade::decode(&bytes)?)?;
    if record.wallet_id != wallet_id {
        return Err(Error::Validation(format!(
            "file holds wallet '{}', expected '{}'",
            record.wallet_id, wallet_id
        )));
    }
    Ok(Some((record, upgraded, bytes)))
}

fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

fn remove_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

fn validate_id(wallet_id: &str) -> Result<()> {
    if wallet_id.trim().is_empty() {
        return Err(Error::Validation("wallet id must not be empty".to_string()));
    }
    Ok(())
}

/// Filesystem-safe, reversible id transform: `[A-Za-z0-9_-]` kept, other bytes `%XX`
fn encode_id(wallet_id: &str) -> String {
    let mut out = String::with_capacity(wallet_id.len());
    for b in wallet_id.bytes() {
        if b.is_ascii_alphanumeric() || b == b'-' || b == b'_' {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{:02X}", b));
        }
    }
    out
}

fn decode_id(encoded: &str) -> Option<String> {
    let bytes = encoded.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = encoded.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}
