//! Wallet record data model
//!
//! One [`WalletRecord`] per wallet is the unit of persistence. Field names
//! serialize in camelCase; maps are ordered so the snapshot hash is stable.

use satchel_core::{build_inventory, Result as CoreResult, ScriptInventory, WatchOnlyWallet};
use satchel_params::{NetworkType, ScriptType};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::integrity::Integrity;

/// Schema generation written by this build
pub const CURRENT_SCHEMA_VERSION: u32 = 2;

/// Current time in milliseconds since the Unix epoch
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Wallet kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WalletType {
    /// HD wallet from a mnemonic
    HdMnemonic,
    /// HD wallet from an extended private key
    HdExtendedPrivateKey,
    /// HD wallet from a raw seed
    HdSeedHex,
    /// HD wallet from a private descriptor
    HdDescriptor,
    /// Single imported private key
    ImportedKey,
    /// Several imported private keys
    ImportedKeys,
    /// Watch-only extended public key
    WatchXpub,
    /// Watch-only descriptor
    WatchDescriptor,
    /// Watch-only address list
    WatchAddresses,
    /// Multisig
    Multisig,
}

impl WalletType {
    /// Canonical name
    pub fn as_str(&self) -> &'static str {
        match self {
            WalletType::HdMnemonic => "hd-mnemonic",
            WalletType::HdExtendedPrivateKey => "hd-extended-private-key",
            WalletType::HdSeedHex => "hd-seed-hex",
            WalletType::HdDescriptor => "hd-descriptor",
            WalletType::ImportedKey => "imported-key",
            WalletType::ImportedKeys => "imported-keys",
            WalletType::WatchXpub => "watch-xpub",
            WalletType::WatchDescriptor => "watch-descriptor",
            WalletType::WatchAddresses => "watch-addresses",
            WalletType::Multisig => "multisig",
        }
    }

    /// Whether the wallet holds no signing material
    pub fn is_watch_only(&self) -> bool {
        matches!(
            self,
            WalletType::WatchXpub | WalletType::WatchDescriptor | WalletType::WatchAddresses
        )
    }
}

/// How the wallet entered the app
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ImportSource {
    /// Created in-app
    Generated,
    /// Restored from a mnemonic
    Mnemonic,
    /// Imported extended key
    ExtendedKey,
    /// Imported descriptor
    Descriptor,
    /// Imported address list
    AddressList,
    /// Imported private key(s)
    PrivateKey,
    /// Restored from a backup file
    Backup,
    /// Upgraded from the v1 file format
    Legacy,
}

/// Pointer to key material held elsewhere. Never contains private data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyRef {
    /// Opaque handle into secret storage (none for watch-only)
    pub secret_id: Option<String>,
    /// Master fingerprint, hex
    pub master_fingerprint: Option<String>,
    /// Canonical receive descriptor
    pub descriptor: Option<String>,
    /// Script types in use
    #[serde(default)]
    pub script_types: BTreeSet<ScriptType>,
}

/// Sync status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Never synced
    #[default]
    Idle,
    /// Sync in flight; staging is set
    Syncing,
    /// Last sync committed
    Synced,
    /// Last sync failed
    Error,
    /// No recent successful sync
    Stale,
}

impl SyncStatus {
    /// Canonical name
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Idle => "idle",
            SyncStatus::Syncing => "syncing",
            SyncStatus::Synced => "synced",
            SyncStatus::Error => "error",
            SyncStatus::Stale => "stale",
        }
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-wallet sync bookkeeping
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    /// Status
    pub status: SyncStatus,
    /// Last commit (ms)
    pub last_successful_sync_at: Option<i64>,
    /// Last attempt start (ms)
    pub last_attempt_at: Option<i64>,
    /// Chain tip seen at last commit
    pub last_known_tip_height: Option<u32>,
    /// Server that produced the last snapshot
    pub last_server_used: Option<String>,
    /// Consecutive failures
    pub failure_count: u32,
    /// Earliest advisable retry (ms)
    pub next_retry_at: Option<i64>,
    /// Last error message
    pub last_error: Option<String>,
    /// When the last error was recorded (ms)
    pub last_error_at: Option<i64>,
    /// Flagged stale
    pub is_stale: bool,
}

/// Unspent output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Utxo {
    /// Funding transaction id
    pub txid: String,
    /// Output index
    pub vout: u32,
    /// Value in satoshis
    pub value: u64,
    /// Confirmation height; 0 means unconfirmed
    pub height: u32,
    /// Receiving address
    pub address: String,
    /// Output script, hex
    pub script_pubkey: String,
    /// Script type
    pub script_type: ScriptType,
    /// Electrum scripthash of the output script
    pub scripthash: Option<String>,
    /// Confirmations at snapshot time
    pub confirmations: u32,
}

impl Utxo {
    /// `txid:vout` outpoint key
    pub fn outpoint(&self) -> String {
        format!("{}:{}", self.txid, self.vout)
    }

    /// Whether the output is mined
    pub fn is_confirmed(&self) -> bool {
        self.height > 0
    }
}

/// Direction of a wallet transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxDirection {
    /// Funds arrived
    Incoming,
    /// Funds left
    Outgoing,
    /// Between own addresses
    #[serde(rename = "self")]
    SelfTransfer,
}

/// Transaction lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    /// In the mempool
    Pending,
    /// Mined
    Confirmed,
    /// Replaced by fee bump
    Replaced,
    /// Dropped from the mempool
    Dropped,
}

/// Wallet transaction history entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionEntry {
    /// Transaction id
    pub txid: String,
    /// First seen (ms)
    pub first_seen_at: i64,
    /// Block height, none while unconfirmed
    pub block_height: Option<u32>,
    /// Confirmations
    pub confirmations: u32,
    /// Direction
    pub direction: TxDirection,
    /// Net change to the wallet balance in satoshis
    pub net_value: i64,
    /// Fee in satoshis
    pub fee: Option<u64>,
    /// Fee rate in sat per 1000 vbytes
    pub fee_rate_sat_per_kvb: Option<u64>,
    /// Signals BIP-125 replaceability
    pub is_rbf: bool,
    /// Status
    pub status: TxStatus,
    /// Serialized size in bytes
    pub size: Option<u32>,
    /// Virtual size in vbytes
    pub vsize: Option<u32>,
}

/// Decoded input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxInput {
    /// Spent transaction id
    pub prev_txid: String,
    /// Spent output index
    pub prev_vout: u32,
    /// Spent address, when known
    pub address: Option<String>,
    /// Spent value, when known
    pub value: Option<u64>,
    /// Spends a wallet output
    pub is_mine: bool,
}

/// Decoded output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxOutput {
    /// Output index
    pub index: u32,
    /// Paid address, when standard
    pub address: Option<String>,
    /// Value in satoshis
    pub value: u64,
    /// Pays a wallet address
    pub is_mine: bool,
}

/// Raw bytes plus decoded inputs and outputs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxDetail {
    /// Raw transaction, hex
    pub raw_hex: Option<String>,
    /// Inputs
    #[serde(default)]
    pub inputs: Vec<TxInput>,
    /// Outputs
    #[serde(default)]
    pub outputs: Vec<TxOutput>,
}

/// Last-known-good chain state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LkgSnapshot {
    /// Unspent outputs
    #[serde(default)]
    pub utxos: Vec<Utxo>,
    /// History
    #[serde(default)]
    pub transactions: Vec<TransactionEntry>,
    /// Details by txid
    #[serde(default)]
    pub tx_details: BTreeMap<String, TxDetail>,
    /// Σ value of mined utxos
    pub confirmed_balance: u64,
    /// Σ value of unconfirmed utxos
    pub unconfirmed_balance: u64,
    /// Transactions tracked outside the provider's view (e.g. just broadcast)
    #[serde(default)]
    pub tracked_pending: BTreeSet<String>,
    /// Commit time (ms)
    pub committed_at: i64,
    /// Chain tip at commit
    pub tip_height: Option<u32>,
}

impl LkgSnapshot {
    /// Build a snapshot, deriving balances from the utxo set
    pub fn new(
        utxos: Vec<Utxo>,
        transactions: Vec<TransactionEntry>,
        tx_details: BTreeMap<String, TxDetail>,
        tip_height: Option<u32>,
    ) -> Self {
        let mut snapshot = Self {
            utxos,
            transactions,
            tx_details,
            tip_height,
            committed_at: now_ms(),
            ..Default::default()
        };
        snapshot.recompute_balances();
        snapshot
    }

    /// Recompute confirmed/unconfirmed balances from `utxos`
    pub fn recompute_balances(&mut self) {
        let (confirmed, unconfirmed) =
            self.utxos
                .iter()
                .fold((0u64, 0u64), |(confirmed, unconfirmed), utxo| {
                    if utxo.is_confirmed() {
                        (confirmed.saturating_add(utxo.value), unconfirmed)
                    } else {
                        (confirmed, unconfirmed.saturating_add(utxo.value))
                    }
                });
        self.confirmed_balance = confirmed;
        self.unconfirmed_balance = unconfirmed;
    }

    /// Whether stored balances match the utxo set
    pub fn balances_consistent(&self) -> bool {
        let mut check = self.clone();
        check.recompute_balances();
        check.confirmed_balance == self.confirmed_balance
            && check.unconfirmed_balance == self.unconfirmed_balance
    }

    /// Confirmed plus unconfirmed
    pub fn total_balance(&self) -> u64 {
        self.confirmed_balance.saturating_add(self.unconfirmed_balance)
    }
}

/// User note and tags on a transaction
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxUserMetadata {
    /// Free-form note
    pub note: Option<String>,
    /// Tags
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

/// User flags on a utxo
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UtxoUserMetadata {
    /// Free-form note
    pub note: Option<String>,
    /// Tags
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Excluded from coin selection by the user
    pub frozen: bool,
    /// Reserved by an in-progress spend
    pub locked: bool,
}

/// Imported extended key entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct XpubEntry {
    /// Key as supplied
    pub xpub: String,
    /// Script type
    pub script_type: ScriptType,
    /// Master fingerprint
    pub fingerprint: Option<String>,
    /// Account path
    pub path: Option<String>,
    /// Label
    pub label: Option<String>,
    /// Import time (ms)
    pub added_at: i64,
}

/// Imported descriptor entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescriptorEntry {
    /// Receive descriptor with checksum
    pub descriptor: String,
    /// Change descriptor with checksum
    pub change_descriptor: Option<String>,
    /// Whether it ends in `/*`
    pub is_ranged: bool,
    /// Label
    pub label: Option<String>,
    /// Import time (ms)
    pub added_at: i64,
}

/// Backup bookkeeping
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupMeta {
    /// Last backup (ms)
    pub last_backup_at: Option<i64>,
    /// Snapshot hash at the last backup
    pub last_backup_hash: Option<String>,
    /// Where the last backup went
    pub location: Option<String>,
    /// Automatic backups enabled
    pub auto_backup: bool,
}

/// A wallet record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletRecord {
    /// Schema generation
    pub schema_version: u32,
    /// Stable identifier
    pub wallet_id: String,
    /// Display name
    pub name: String,
    /// Wallet kind
    pub wallet_type: WalletType,
    /// How it entered the app
    pub import_source: ImportSource,
    /// Network
    pub network: NetworkType,
    /// Creation time (ms)
    pub created_at: i64,
    /// Last write (ms)
    pub last_modified: i64,
    /// Key reference
    pub key_ref: KeyRef,
    /// Derived address inventory
    pub inventory: ScriptInventory,
    /// Sync bookkeeping
    pub sync_state: SyncState,
    /// Last-known-good snapshot
    pub lkg: LkgSnapshot,
    /// In-flight snapshot (only while syncing)
    pub staging: Option<LkgSnapshot>,
    /// Integrity hashes
    pub integrity: Integrity,
    /// Notes and tags by txid
    #[serde(default)]
    pub tx_metadata: BTreeMap<String, TxUserMetadata>,
    /// Flags by `txid:vout`
    #[serde(default)]
    pub utxo_metadata: BTreeMap<String, UtxoUserMetadata>,
    /// Labels by address
    #[serde(default)]
    pub address_labels: BTreeMap<String, String>,
    /// Imported extended keys
    #[serde(default)]
    pub xpubs: Vec<XpubEntry>,
    /// Imported descriptors
    #[serde(default)]
    pub descriptors: Vec<DescriptorEntry>,
    /// Backup bookkeeping
    #[serde(default)]
    pub backup: BackupMeta,
}

impl WalletRecord {
    /// Create an empty record
    pub fn new(
        wallet_id: impl Into<String>,
        name: impl Into<String>,
        wallet_type: WalletType,
        import_source: ImportSource,
        network: NetworkType,
    ) -> Self {
        let now = now_ms();
        Self {
            schema_version: CURRENT_SCHEMA_VERSION,
            wallet_id: wallet_id.into(),
            name: name.into(),
            wallet_type,
            import_source,
            network,
            created_at: now,
            last_modified: now,
            key_ref: KeyRef::default(),
            inventory: ScriptInventory::default(),
            sync_state: SyncState::default(),
            lkg: LkgSnapshot::default(),
            staging: None,
            integrity: Integrity::default(),
            tx_metadata: BTreeMap::new(),
            utxo_metadata: BTreeMap::new(),
            address_labels: BTreeMap::new(),
            xpubs: Vec::new(),
            descriptors: Vec::new(),
            backup: BackupMeta::default(),
        }
    }

    /// Build a watch-only record with its initial inventory
    pub fn watch_only(
        wallet_id: impl Into<String>,
        name: impl Into<String>,
        wallet: &WatchOnlyWallet,
        gap_limit: u32,
    ) -> CoreResult<Self> {
        use satchel_core::WatchOnlySource;

        let (wallet_type, import_source) = match wallet.source() {
            WatchOnlySource::ExtendedKey(_) => (WalletType::WatchXpub, ImportSource::ExtendedKey),
            WatchOnlySource::Descriptor(_) => {
                (WalletType::WatchDescriptor, ImportSource::Descriptor)
            }
            WatchOnlySource::AddressList(_) => {
                (WalletType::WatchAddresses, ImportSource::AddressList)
            }
        };

        let mut record = Self::new(wallet_id, name, wallet_type, import_source, wallet.network());
        record.inventory = build_inventory(wallet, gap_limit)?;
        record.key_ref = KeyRef {
            secret_id: None,
            master_fingerprint: wallet.fingerprint(),
            descriptor: wallet.descriptor()?,
            script_types: record.inventory.counters.keys().copied().collect(),
        };

        match wallet.source() {
            WatchOnlySource::ExtendedKey(key) => record.xpubs.push(XpubEntry {
                xpub: key.standard(),
                script_type: key.script_type(),
                fingerprint: wallet.fingerprint(),
                path: None,
                label: None,
                added_at: record.created_at,
            }),
            WatchOnlySource::Descriptor(desc) => record.descriptors.push(DescriptorEntry {
                descriptor: desc.to_string_with_checksum()?,
                change_descriptor: wallet.change_descriptor().ok().flatten(),
                is_ranged: desc.is_ranged(),
                label: None,
                added_at: record.created_at,
            }),
            WatchOnlySource::AddressList(_) => {}
        }
        Ok(record)
    }

    /// Confirmed plus unconfirmed LKG balance
    pub fn total_balance(&self) -> u64 {
        self.lkg.total_balance()
    }
}

/// Typed partial record for `update`.
///
/// `None` leaves a field alone. Identity fields (`walletId`, `createdAt`,
/// `schemaVersion`) are not patchable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletRecordPatch {
    /// Display name
    pub name: Option<String>,
    /// Wallet kind
    pub wallet_type: Option<WalletType>,
    /// Import source
    pub import_source: Option<ImportSource>,
    /// Network
    pub network: Option<NetworkType>,
    /// Key reference
    pub key_ref: Option<KeyRef>,
    /// Address inventory
    pub inventory: Option<ScriptInventory>,
    /// Sync bookkeeping
    pub sync_state: Option<SyncState>,
    /// LKG snapshot
    pub lkg: Option<LkgSnapshot>,
    /// Address labels, merged key by key
    pub address_labels: Option<BTreeMap<String, String>>,
    /// Transaction metadata, merged key by key
    pub tx_metadata: Option<BTreeMap<String, TxUserMetadata>>,
    /// Utxo metadata, merged key by key
    pub utxo_metadata: Option<BTreeMap<String, UtxoUserMetadata>>,
    /// Imported extended keys (replaces)
    pub xpubs: Option<Vec<XpubEntry>>,
    /// Imported descriptors (replaces)
    pub descriptors: Option<Vec<DescriptorEntry>>,
    /// Backup bookkeeping
    pub backup: Option<BackupMeta>,
}

impl WalletRecordPatch {
    /// Patch setting only the name
    pub fn name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    /// Merge into `record`
    pub fn apply(self, record: &mut WalletRecord) {
        if let Some(name) = self.name {
            record.name = name;
        }
        if let Some(wallet_type) = self.wallet_type {
            record.wallet_type = wallet_type;
        }
        if let Some(import_source) = self.import_source {
            record.import_source = import_source;
        }
        if let Some(network) = self.network {
            record.network = network;
        }
        if let Some(key_ref) = self.key_ref {
            record.key_ref = key_ref;
        }
        if let Some(inventory) = self.inventory {
            record.inventory = inventory;
        }
        if let Some(sync_state) = self.sync_state {
            record.sync_state = sync_state;
        }
        if let Some(lkg) = self.lkg {
            record.lkg = lkg;
        }
        if let Some(labels) = self.address_labels {
            record.address_labels.extend(labels);
        }
        if let Some(meta) = self.tx_metadata {
            record.tx_metadata.extend(meta);
        }
        if let Some(meta) = self.utxo_metadata {
            record.utxo_metadata.extend(meta);
        }
        if let Some(xpubs) = self.xpubs {
            record.xpubs = xpubs;
        }
        if let Some(descriptors) = self.descriptors {
            record.descriptors = descriptors;
        }
        if let Some(backup) = self.backup {
            record.backup = backup;
        }
    }
}
