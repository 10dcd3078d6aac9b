//! Versioned record decoding and in-file schema upgrades
//!
//! Each stored generation has its own struct and a pure upgrade function
//! to the next one. Decoding picks the struct by `schemaVersion` (absent
//! means v1) and upgrades step by step until the current version.

use crate::integrity::Integrity;
use crate::models::{
    now_ms, ImportSource, KeyRef, LkgSnapshot, SyncState, SyncStatus, TransactionEntry,
    TxDetail, TxDirection, TxOutput, TxStatus, TxUserMetadata, Utxo, WalletRecord, WalletType,
    XpubEntry, DescriptorEntry, CURRENT_SCHEMA_VERSION,
};
use crate::{Error, Result};
use satchel_core::{
    classify_address, parse_address, scripthash, AddressInfo, ParsedDescriptor, ScriptInventory,
};
use satchel_params::{NetworkType, ScriptType};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Height given to confirmed v1 utxos, whose real height was never stored
pub const V1_PLACEHOLDER_HEIGHT: u32 = 1;

/// v1 flat wallet type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LegacyWalletType {
    /// Mnemonic
    #[serde(alias = "HD")]
    HdMnemonic,
    /// Extended private key
    #[serde(alias = "XPRV")]
    HdXprv,
    /// Raw seed
    HdSeed,
    /// Private descriptor
    HdDescriptor,
    /// Single WIF
    #[serde(alias = "WIF")]
    ImportedKey,
    /// Several WIFs
    ImportedKeys,
    /// Extended public key
    #[serde(alias = "XPUB", alias = "WATCH_ONLY")]
    WatchXpub,
    /// Descriptor
    WatchDescriptor,
    /// Address list
    #[serde(alias = "ADDRESSES")]
    WatchAddresses,
    /// Multisig
    Multisig,
}

impl LegacyWalletType {
    fn canonical(self) -> (WalletType, ImportSource) {
        match self {
            LegacyWalletType::HdMnemonic => (WalletType::HdMnemonic, ImportSource::Mnemonic),
            LegacyWalletType::HdXprv => (WalletType::HdExtendedPrivateKey, ImportSource::ExtendedKey),
            LegacyWalletType::HdSeed => (WalletType::HdSeedHex, ImportSource::Legacy),
            LegacyWalletType::HdDescriptor => (WalletType::HdDescriptor, ImportSource::Descriptor),
            LegacyWalletType::ImportedKey => (WalletType::ImportedKey, ImportSource::PrivateKey),
            LegacyWalletType::ImportedKeys => (WalletType::ImportedKeys, ImportSource::PrivateKey),
            LegacyWalletType::WatchXpub => (WalletType::WatchXpub, ImportSource::ExtendedKey),
            LegacyWalletType::WatchDescriptor => {
                (WalletType::WatchDescriptor, ImportSource::Descriptor)
            }
            LegacyWalletType::WatchAddresses => {
                (WalletType::WatchAddresses, ImportSource::AddressList)
            }
            LegacyWalletType::Multisig => (WalletType::Multisig, ImportSource::Legacy),
        }
    }
}

/// v1 address entry: bare string or object
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LegacyAddress {
    /// Address only
    Plain(String),
    /// Address with derivation info
    #[serde(rename_all = "camelCase")]
    Detailed {
        /// Address
        address: String,
        /// Path
        path: Option<String>,
        /// Index
        index: Option<u32>,
        /// Change flag
        #[serde(default)]
        is_change: bool,
    },
}

/// v1 stored balance (not trusted on upgrade)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LegacyBalance {
    /// Confirmed
    #[serde(default)]
    pub confirmed: u64,
    /// Unconfirmed
    #[serde(default)]
    pub unconfirmed: u64,
}

/// v1 utxo: confirmations only, no height
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyUtxo {
    /// Txid
    pub txid: String,
    /// Output index
    pub vout: u32,
    /// Value
    pub value: u64,
    /// Address
    pub address: String,
    /// Confirmations
    #[serde(default)]
    pub confirmations: u32,
}

/// v1 input/output summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegacyTxIo {
    /// Address
    pub address: Option<String>,
    /// Value
    #[serde(default)]
    pub value: u64,
}

/// v1 transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyTransaction {
    /// Txid
    pub txid: String,
    /// Seen time (ms)
    #[serde(default)]
    pub timestamp: i64,
    /// Confirmations
    #[serde(default)]
    pub confirmations: u32,
    /// Block height, if recorded
    pub height: Option<u32>,
    /// Signed amount
    #[serde(default)]
    pub amount: i64,
    /// Fee
    pub fee: Option<u64>,
    /// Raw hex
    pub raw_hex: Option<String>,
    /// Outputs
    #[serde(default)]
    pub outputs: Vec<LegacyTxIo>,
}

/// Flat v1 wallet file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletRecordV1 {
    /// Optional explicit tag (absent in the oldest files)
    pub schema_version: Option<u32>,
    /// Wallet id
    pub id: String,
    /// Name
    #[serde(default)]
    pub name: String,
    /// Flat type
    #[serde(rename = "type")]
    pub wallet_type: LegacyWalletType,
    /// Network
    #[serde(default = "default_network")]
    pub network: NetworkType,
    /// Creation (ms)
    #[serde(default)]
    pub created_at: i64,
    /// Keychain handle
    pub secret_id: Option<String>,
    /// Fingerprint
    pub fingerprint: Option<String>,
    /// Extended public key
    pub xpub: Option<String>,
    /// Descriptor
    pub descriptor: Option<String>,
    /// Addresses
    #[serde(default)]
    pub addresses: Vec<LegacyAddress>,
    /// Stored balance
    #[serde(default)]
    pub balance: LegacyBalance,
    /// Utxos
    #[serde(default)]
    pub utxos: Vec<LegacyUtxo>,
    /// Transactions
    #[serde(default)]
    pub transactions: Vec<LegacyTransaction>,
    /// Last sync (ms)
    pub last_sync: Option<i64>,
    /// Address labels
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Transaction notes
    #[serde(default)]
    pub notes: BTreeMap<String, String>,
}

fn default_network() -> NetworkType {
    NetworkType::Mainnet
}

/// A decoded file of any known generation
#[derive(Debug, Clone)]
pub enum VersionedRecord {
    /// Flat v1
    V1(Box<WalletRecordV1>),
    /// Structured v2
    V2(Box<WalletRecord>),
}

impl VersionedRecord {
    /// Schema version of this value
    pub fn version(&self) -> u32 {
        match self {
            VersionedRecord::V1(_) => 1,
            VersionedRecord::V2(_) => 2,
        }
    }
}

/// Decode stored bytes into the struct for their generation
pub fn decode(bytes: &[u8]) -> Result<VersionedRecord> {
    let value: serde_json::Value = serde_json::from_slice(bytes)?;
    let version = value
        .get("schemaVersion")
        .and_then(|v| v.as_u64())
        .unwrap_or(1) as u32;

    match version {
        1 => Ok(VersionedRecord::V1(Box::new(serde_json::from_value(value)?))),
        2 => Ok(VersionedRecord::V2(Box::new(serde_json::from_value(value)?))),
        other => Err(Error::UnsupportedSchema(other)),
    }
}

/// Apply upgrades in sequence. Returns the record and whether anything changed.
pub fn upgrade_to_current(mut versioned: VersionedRecord) -> Result<(WalletRecord, bool)> {
    let mut upgraded = false;
    loop {
        versioned = match versioned {
            VersionedRecord::V1(v1) => {
                upgraded = true;
                VersionedRecord::V2(Box::new(upgrade_v1_to_v2(*v1)?))
            }
            VersionedRecord::V2(record) => {
                debug_assert_eq!(record.schema_version, CURRENT_SCHEMA_VERSION);
                return Ok((*record, upgraded));
            }
        };
    }
}

/// Upgrade a flat v1 file.
///
/// Balances are recomputed from utxos, confirmed utxos get the placeholder
/// height, ownership flags default to false, and the record is flagged
/// stale so the next sync replaces the approximated snapshot.
pub fn upgrade_v1_to_v2(v1: WalletRecordV1) -> Result<WalletRecord> {
    if v1.id.is_empty() {
        return Err(Error::Migration("v1 record has no id".to_string()));
    }
    let network = v1.network;
    let (wallet_type, import_source) = v1.wallet_type.canonical();
    let fallback_type = primary_script_type(&v1);

    let utxos: Vec<Utxo> = v1
        .utxos
        .iter()
        .map(|u| upgrade_utxo(u, network, fallback_type))
        .collect();

    let mut tx_details = BTreeMap::new();
    let transactions: Vec<TransactionEntry> = v1
        .transactions
        .iter()
        .map(|tx| {
            tx_details.insert(
                tx.txid.clone(),
                TxDetail {
                    raw_hex: tx.raw_hex.clone(),
                    inputs: Vec::new(),
                    outputs: tx
                        .outputs
                        .iter()
                        .enumerate()
                        .map(|(i, o)| TxOutput {
                            index: i as u32,
                            address: o.address.clone(),
                            value: o.value,
                            is_mine: false,
                        })
                        .collect(),
                },
            );
            upgrade_transaction(tx)
        })
        .collect();

    let mut lkg = LkgSnapshot::new(utxos, transactions, tx_details, None);
    lkg.committed_at = v1.last_sync.unwrap_or(v1.created_at);
    if lkg.confirmed_balance != v1.balance.confirmed
        || lkg.unconfirmed_balance != v1.balance.unconfirmed
    {
        tracing::warn!(
            "v1 wallet {} stored balance {}/{} disagrees with utxos {}/{}; using utxos",
            v1.id,
            v1.balance.confirmed,
            v1.balance.unconfirmed,
            lkg.confirmed_balance,
            lkg.unconfirmed_balance
        );
    }

    let mut inventory = ScriptInventory::default();
    for (position, entry) in v1.addresses.iter().enumerate() {
        inventory.push(upgrade_address(entry, position as u32, fallback_type));
    }
    for utxo in &lkg.utxos {
        if inventory.contains(&utxo.address) {
            inventory.used.insert(utxo.address.clone());
        }
    }

    let mut script_types: BTreeSet<ScriptType> = inventory.counters.keys().copied().collect();
    script_types.extend(lkg.utxos.iter().map(|u| u.script_type));
    let descriptor = v1.descriptor.as_deref().and_then(|d| {
        ParsedDescriptor::parse(d)
            .and_then(|p| p.to_string_with_checksum())
            .map_err(|e| tracing::debug!("v1 descriptor for {} not canonicalized: {}", v1.id, e))
            .ok()
    });

    let created_at = if v1.created_at > 0 { v1.created_at } else { now_ms() };
    let mut record = WalletRecord::new(v1.id.clone(), v1.name.clone(), wallet_type, import_source, network);
    record.created_at = created_at;
    record.key_ref = KeyRef {
        secret_id: v1.secret_id.clone(),
        master_fingerprint: v1.fingerprint.clone(),
        descriptor: descriptor.clone(),
        script_types,
    };
    record.inventory = inventory;
    record.lkg = lkg;
    record.sync_state = SyncState {
        status: SyncStatus::Stale,
        last_successful_sync_at: v1.last_sync,
        is_stale: true,
        ..Default::default()
    };
    record.integrity = Integrity::default();
    record.address_labels = v1.labels.clone();
    record.tx_metadata = v1
        .notes
        .iter()
        .map(|(txid, note)| {
            (
                txid.clone(),
                TxUserMetadata {
                    note: Some(note.clone()),
                    tags: BTreeSet::new(),
                },
            )
        })
        .collect();
    if let Some(xpub) = &v1.xpub {
        record.xpubs.push(XpubEntry {
            xpub: xpub.clone(),
            script_type: fallback_type,
            fingerprint: v1.fingerprint.clone(),
            path: None,
            label: None,
            added_at: created_at,
        });
    }
    if let Some(descriptor) = descriptor {
        record.descriptors.push(DescriptorEntry {
            is_ranged: descriptor.contains("/*"),
            descriptor,
            change_descriptor: None,
            label: None,
            added_at: created_at,
        });
    }

    tracing::info!(
        "Upgraded wallet {} from v1: {} addresses, {} utxos, {} transactions",
        record.wallet_id,
        record.inventory.len(),
        record.lkg.utxos.len(),
        record.lkg.transactions.len()
    );
    Ok(record)
}

fn primary_script_type(v1: &WalletRecordV1) -> ScriptType {
    if let Some(xpub) = &v1.xpub {
        if let Ok(prefix) = satchel_core::detect_prefix(xpub) {
            return prefix.script_type;
        }
    }
    if let Some(descriptor) = &v1.descriptor {
        if let Ok(parsed) = ParsedDescriptor::parse(descriptor) {
            return parsed.script_type();
        }
    }
    v1.addresses
        .first()
        .and_then(|a| classify_address(legacy_address_str(a)).ok())
        .map(|(_, ty)| ty)
        .unwrap_or(ScriptType::NativeSegwit)
}

fn legacy_address_str(entry: &LegacyAddress) -> &str {
    match entry {
        LegacyAddress::Plain(address) => address,
        LegacyAddress::Detailed { address, .. } => address,
    }
}

fn upgrade_utxo(utxo: &LegacyUtxo, network: NetworkType, fallback: ScriptType) -> Utxo {
    let script_type = classify_address(&utxo.address)
        .map(|(_, ty)| ty)
        .unwrap_or(fallback);
    let script_pubkey = parse_address(&utxo.address, network)
        .map(|a| hex::encode(a.script_pubkey().as_bytes()))
        .unwrap_or_default();
    Utxo {
        txid: utxo.txid.clone(),
        vout: utxo.vout,
        value: utxo.value,
        height: if utxo.confirmations > 0 { V1_PLACEHOLDER_HEIGHT } else { 0 },
        address: utxo.address.clone(),
        script_pubkey,
        script_type,
        scripthash: scripthash(&utxo.address, network).ok(),
        confirmations: utxo.confirmations,
    }
}

fn upgrade_transaction(tx: &LegacyTransaction) -> TransactionEntry {
    let direction = match tx.amount {
        a if a > 0 => TxDirection::Incoming,
        a if a < 0 => TxDirection::Outgoing,
        _ => TxDirection::SelfTransfer,
    };
    let confirmed = tx.confirmations > 0;
    TransactionEntry {
        txid: tx.txid.clone(),
        first_seen_at: tx.timestamp,
        block_height: if confirmed {
            Some(tx.height.unwrap_or(V1_PLACEHOLDER_HEIGHT))
        } else {
            None
        },
        confirmations: tx.confirmations,
        direction,
        net_value: tx.amount,
        fee: tx.fee,
        fee_rate_sat_per_kvb: None,
        is_rbf: false,
        status: if confirmed { TxStatus::Confirmed } else { TxStatus::Pending },
        size: None,
        vsize: None,
    }
}

fn upgrade_address(entry: &LegacyAddress, position: u32, fallback: ScriptType) -> AddressInfo {
    let (address, path, index, is_change) = match entry {
        LegacyAddress::Plain(address) => (address.clone(), None, position, false),
        LegacyAddress::Detailed {
            address,
            path,
            index,
            is_change,
        } => (address.clone(), path.clone(), index.unwrap_or(position), *is_change),
    };
    let script_type = classify_address(&address).map(|(_, ty)| ty).unwrap_or(fallback);
    AddressInfo {
        path: path.unwrap_or_else(|| format!("imported/{index}")),
        address,
        index,
        is_change,
        script_type,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn v1_json() -> serde_json::Value {
        json!({
            "id": "legacy-1",
            "name": "Old wallet",
            "type": "WATCH_ADDRESSES",
            "network": "mainnet",
            "createdAt": 1_600_000_000_000i64,
            "addresses": [
                "bc1qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdq",
                {"address": "1BvBMSEYstWetqTFn5Au4m4GFg7xJaNVN2", "index": 7}
            ],
            "balance": {"confirmed": 999, "unconfirmed": 0},
            "utxos": [
                {"txid": "aa", "vout": 0, "value": 1000, "address": "bc1qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdq", "confirmations": 3},
                {"txid": "bb", "vout": 1, "value": 500, "address": "1BvBMSEYstWetqTFn5Au4m4GFg7xJaNVN2", "confirmations": 0}
            ],
            "transactions": [
                {"txid": "aa", "timestamp": 1_600_000_100_000i64, "confirmations": 3, "amount": 1000,
                 "outputs": [{"address": "bc1qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdq", "value": 1000}]},
                {"txid": "cc", "timestamp": 1_600_000_200_000i64, "confirmations": 0, "amount": -200, "fee": 10}
            ],
            "lastSync": 1_600_000_300_000i64,
            "labels": {"bc1qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdq": "donations"},
            "notes": {"aa": "first deposit"}
        })
    }

    fn upgrade(value: serde_json::Value) -> WalletRecord {
        let bytes = serde_json::to_vec(&value).unwrap();
        let versioned = decode(&bytes).unwrap();
        assert_eq!(versioned.version(), 1);
        let (record, upgraded) = upgrade_to_current(versioned).unwrap();
        assert!(upgraded);
        record
    }

    #[test]
    fn test_v1_upgrade_maps_identity() {
        let record = upgrade(v1_json());
        assert_eq!(record.schema_version, CURRENT_SCHEMA_VERSION);
        assert_eq!(record.wallet_id, "legacy-1");
        assert_eq!(record.wallet_type, WalletType::WatchAddresses);
        assert_eq!(record.import_source, ImportSource::AddressList);
        assert_eq!(record.created_at, 1_600_000_000_000);
        assert_eq!(record.address_labels["bc1qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdq"], "donations");
        assert_eq!(record.tx_metadata["aa"].note.as_deref(), Some("first deposit"));
    }

    #[test]
    fn test_v1_upgrade_recomputes_balances() {
        let record = upgrade(v1_json());
        assert_eq!(record.lkg.confirmed_balance, 1000);
        assert_eq!(record.lkg.unconfirmed_balance, 500);
        assert!(record.lkg.balances_consistent());
    }

    #[test]
    fn test_v1_utxo_heights_and_script_types() {
        let record = upgrade(v1_json());
        let confirmed = &record.lkg.utxos[0];
        assert_eq!(confirmed.height, V1_PLACEHOLDER_HEIGHT);
        assert_eq!(confirmed.script_type, ScriptType::NativeSegwit);
        assert!(confirmed.scripthash.is_some());
        assert!(confirmed.script_pubkey.starts_with("0014"));

        let pending = &record.lkg.utxos[1];
        assert_eq!(pending.height, 0);
        assert_eq!(pending.script_type, ScriptType::Legacy);
    }

    #[test]
    fn test_v1_transactions_and_details() {
        let record = upgrade(v1_json());
        let aa = &record.lkg.transactions[0];
        assert_eq!(aa.direction, TxDirection::Incoming);
        assert_eq!(aa.status, TxStatus::Confirmed);
        assert_eq!(aa.block_height, Some(V1_PLACEHOLDER_HEIGHT));

        let cc = &record.lkg.transactions[1];
        assert_eq!(cc.direction, TxDirection::Outgoing);
        assert_eq!(cc.status, TxStatus::Pending);
        assert!(cc.block_height.is_none());

        let detail = &record.lkg.tx_details["aa"];
        assert_eq!(detail.outputs.len(), 1);
        assert!(detail.outputs.iter().all(|o| !o.is_mine));
        assert!(detail.inputs.is_empty());
    }

    #[test]
    fn test_v1_upgrade_flags_stale_and_builds_inventory() {
        let record = upgrade(v1_json());
        assert_eq!(record.sync_state.status, SyncStatus::Stale);
        assert!(record.sync_state.is_stale);
        assert_eq!(record.sync_state.last_successful_sync_at, Some(1_600_000_300_000));
        assert!(record.staging.is_none());

        assert_eq!(record.inventory.len(), 2);
        assert_eq!(record.inventory.addresses[1].index, 7);
        assert!(record.inventory.used.contains("bc1qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdq"));
        assert!(record.key_ref.script_types.contains(&ScriptType::Legacy));
        assert!(record.key_ref.secret_id.is_none());
    }

    #[test]
    fn test_legacy_type_aliases() {
        let mut value = v1_json();
        value["type"] = json!("XPUB");
        let record = upgrade(value);
        assert_eq!(record.wallet_type, WalletType::WatchXpub);

        let mut value = v1_json();
        value["type"] = json!("HD_XPRV");
        value["schemaVersion"] = json!(1);
        let record = upgrade(value);
        assert_eq!(record.wallet_type, WalletType::HdExtendedPrivateKey);
    }

    #[test]
    fn test_decode_current_is_not_upgraded() {
        let record = WalletRecord::new(
            "w",
            "n",
            WalletType::WatchXpub,
            ImportSource::ExtendedKey,
            NetworkType::Mainnet,
        );
        let bytes = serde_json::to_vec(&record).unwrap();
        let (decoded, upgraded) = upgrade_to_current(decode(&bytes).unwrap()).unwrap();
        assert!(!upgraded);
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_future_schema_rejected() {
        let bytes = br#"{"schemaVersion": 9, "walletId": "w"}"#;
        assert!(matches!(decode(bytes), Err(Error::UnsupportedSchema(9))));
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(decode(b"{not json").is_err());
        assert!(decode(br#"{"id": "x"}"#).is_err());
    }
}
