//! Record store integration tests
//!
//! Exercises the write protocol, recovery paths, sync lifecycle and
//! per-wallet locking against a scratch directory.

use proptest::prelude::*;
use satchel_params::{NetworkType, ScriptType};
use satchel_storage::{
    Error, ImportSource, LkgSnapshot, RecordStore, StoreConfig, SyncStatus, TxUserMetadata, Utxo,
    UtxoUserMetadata, WalletRecord, WalletRecordPatch, WalletType,
};
use std::collections::BTreeMap;
use std::fs;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

const ADDR_A: &str = "bc1qcr8te4kr609gcawutmrza0j4xv80jy8z306fyu";
const ADDR_B: &str = "bc1q8c6fshw2dlwun7ekn9qwf37cu2rn755upcp6el";

fn open_store() -> (TempDir, RecordStore) {
    let dir = TempDir::new().unwrap();
    let store = RecordStore::open(StoreConfig::default().with_data_dir(dir.path())).unwrap();
    (dir, store)
}

fn utxo(txid: &str, vout: u32, value: u64, height: u32) -> Utxo {
    Utxo {
        txid: txid.to_string(),
        vout,
        value,
        height,
        address: ADDR_A.to_string(),
        script_pubkey: String::new(),
        script_type: ScriptType::NativeSegwit,
        scripthash: None,
        confirmations: if height > 0 { 6 } else { 0 },
    }
}

fn sample_record(id: &str) -> WalletRecord {
    let mut record = WalletRecord::new(
        id,
        "Savings",
        WalletType::WatchAddresses,
        ImportSource::AddressList,
        NetworkType::Mainnet,
    );
    record.lkg = LkgSnapshot::new(
        vec![
            utxo(&"ab".repeat(32), 0, 50_000, 800_000),
            utxo(&"cd".repeat(32), 1, 1_500, 0),
        ],
        Vec::new(),
        BTreeMap::new(),
        Some(800_010),
    );
    record
}

fn primary_file(store: &RecordStore, id: &str) -> std::path::PathBuf {
    store.wallet_dir().join(format!("wallet_{}.json", id))
}

fn backup_file(store: &RecordStore, id: &str) -> std::path::PathBuf {
    store.wallet_dir().join(format!("wallet_{}.json.bak", id))
}

// ============================================================================
// Write / read
// ============================================================================

#[test]
fn test_write_then_read_round_trip() {
    let (_dir, store) = open_store();
    let record = sample_record("w1");
    assert!(store.write(&record).unwrap());

    let mut loaded = store.read("w1").unwrap().unwrap();
    assert!(store.verify_integrity("w1").unwrap());
    assert!(!loaded.integrity.atomic_write_id.is_empty());
    assert_eq!(
        loaded.integrity.last_good_snapshot_hash.as_deref(),
        Some(loaded.integrity.snapshot_hash.as_str())
    );

    loaded.integrity = record.integrity.clone();
    loaded.last_modified = record.last_modified;
    assert_eq!(loaded, record);
}

#[test]
fn test_write_preserves_created_at() {
    let (_dir, store) = open_store();
    let record = sample_record("w1");
    store.write(&record).unwrap();

    let mut rewritten = record.clone();
    rewritten.created_at = 42;
    rewritten.name = "Renamed".to_string();
    store.write(&rewritten).unwrap();

    let loaded = store.read("w1").unwrap().unwrap();
    assert_eq!(loaded.created_at, record.created_at);
    assert_eq!(loaded.name, "Renamed");
}

#[test]
fn test_create_rejects_duplicates() {
    let (_dir, store) = open_store();
    store.create(sample_record("w1")).unwrap();
    assert!(store.exists("w1"));
    match store.create(sample_record("w1")) {
        Err(Error::WalletAlreadyExists(id)) => assert_eq!(id, "w1"),
        other => panic!("expected WalletAlreadyExists, got {:?}", other),
    }
}

#[test]
fn test_write_rejects_empty_id() {
    let (_dir, store) = open_store();
    assert!(matches!(
        store.write(&sample_record("  ")),
        Err(Error::Validation(_))
    ));
}

#[test]
fn test_missing_wallet_is_none_and_mutations_return_false() {
    let (_dir, store) = open_store();
    assert!(store.read("nope").unwrap().is_none());
    assert!(!store.exists("nope"));
    assert!(!store.update("nope", WalletRecordPatch::name("x")).unwrap());
    assert!(!store.record_sync_error("nope", "timeout").unwrap());
    assert!(!store.commit_lkg("nope", LkgSnapshot::default()).unwrap());
    assert!(!store.mark_stale("nope").unwrap());
    assert!(!store.verify_integrity("nope").unwrap());
    assert!(!store.delete("nope").unwrap());
}

#[test]
fn test_ids_with_unsafe_characters() {
    let (_dir, store) = open_store();
    let id = "team/alice wallet#1";
    store.write(&sample_record(id)).unwrap();
    assert_eq!(store.read(id).unwrap().unwrap().wallet_id, id);
    assert_eq!(store.list_wallet_ids().unwrap(), vec![id.to_string()]);
}

#[test]
fn test_list_wallet_ids_sorted() {
    let (_dir, store) = open_store();
    for id in ["c", "a", "b"] {
        store.write(&sample_record(id)).unwrap();
    }
    assert_eq!(store.list_wallet_ids().unwrap(), vec!["a", "b", "c"]);
}

#[test]
fn test_balances_recomputed_on_write() {
    let (_dir, store) = open_store();
    let mut record = sample_record("w1");
    record.lkg.confirmed_balance = 1;
    record.lkg.unconfirmed_balance = 999_999;
    store.write(&record).unwrap();

    let loaded = store.read("w1").unwrap().unwrap();
    assert_eq!(loaded.lkg.confirmed_balance, 50_000);
    assert_eq!(loaded.lkg.unconfirmed_balance, 1_500);
}

// ============================================================================
// Integrity
// ============================================================================

#[test]
fn test_verify_integrity_detects_out_of_band_edit() {
    let (_dir, store) = open_store();
    store.write(&sample_record("w1")).unwrap();
    assert!(store.verify_integrity("w1").unwrap());

    let path = primary_file(&store, "w1");
    let text = fs::read_to_string(&path).unwrap();
    let original = "ab".repeat(32);
    let tampered = format!("bb{}", &original[2..]);
    fs::write(&path, text.replacen(&original, &tampered, 1)).unwrap();

    assert!(!store.verify_integrity("w1").unwrap());
    // Reported only, never repaired
    assert!(!store.verify_integrity("w1").unwrap());
}

// ============================================================================
// Recovery
// ============================================================================

#[test]
fn test_corrupt_primary_recovers_from_backup() {
    let (_dir, store) = open_store();
    store.write(&sample_record("w1")).unwrap();
    store.update("w1", WalletRecordPatch::name("Second")).unwrap();
    assert!(backup_file(&store, "w1").exists());

    fs::write(primary_file(&store, "w1"), b"{ not json").unwrap();

    let recovered = store.read("w1").unwrap().unwrap();
    assert_eq!(recovered.name, "Savings");

    // Backup was re-established as a parseable primary
    let bytes = fs::read(primary_file(&store, "w1")).unwrap();
    let reparsed: WalletRecord = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(reparsed.name, "Savings");
    assert!(store.verify_integrity("w1").unwrap());
}

#[test]
fn test_corrupt_primary_with_v1_backup_is_upgraded() {
    let (_dir, store) = open_store();
    let v1 = serde_json::json!({
        "id": "legacy",
        "name": "Old",
        "type": "WATCH_ADDRESSES",
        "network": "mainnet",
        "addresses": [ADDR_A],
        "utxos": [
            {"txid": "33".repeat(32), "vout": 0, "value": 8000, "address": ADDR_A, "confirmations": 2}
        ]
    });
    fs::write(backup_file(&store, "legacy"), serde_json::to_vec(&v1).unwrap()).unwrap();
    fs::write(primary_file(&store, "legacy"), b"{ torn write").unwrap();

    let record = store.read("legacy").unwrap().unwrap();
    assert_eq!(record.schema_version, 2);
    assert_eq!(record.name, "Old");
    assert_eq!(record.lkg.confirmed_balance, 8000);

    // Upgraded record now lives in the primary slot
    let raw: serde_json::Value =
        serde_json::from_slice(&fs::read(primary_file(&store, "legacy")).unwrap()).unwrap();
    assert_eq!(raw["schemaVersion"], serde_json::json!(2));
    assert_eq!(raw["walletId"], serde_json::json!("legacy"));
    assert!(store.verify_integrity("legacy").unwrap());
}

#[test]
fn test_verify_integrity_never_writes() {
    let (_dir, store) = open_store();
    store.write(&sample_record("w1")).unwrap();
    store.update("w1", WalletRecordPatch::name("Second")).unwrap();
    fs::write(primary_file(&store, "w1"), b"{ not json").unwrap();

    // Checked against the backup, corrupt primary left alone
    assert!(store.verify_integrity("w1").unwrap());
    assert_eq!(fs::read(primary_file(&store, "w1")).unwrap(), b"{ not json");

    let v1 = serde_json::json!({"id": "legacy", "type": "WATCH_ADDRESSES", "addresses": [ADDR_A]});
    let v1_bytes = serde_json::to_vec(&v1).unwrap();
    fs::write(primary_file(&store, "legacy"), &v1_bytes).unwrap();

    assert!(!store.verify_integrity("legacy").unwrap());
    assert_eq!(fs::read(primary_file(&store, "legacy")).unwrap(), v1_bytes);
    assert!(!backup_file(&store, "legacy").exists());
}

#[test]
fn test_mutation_after_corrupt_primary_uses_backup() {
    let (_dir, store) = open_store();
    store.write(&sample_record("w1")).unwrap();
    store.update("w1", WalletRecordPatch::name("Second")).unwrap();
    fs::write(primary_file(&store, "w1"), b"garbage").unwrap();

    assert!(store.update("w1", WalletRecordPatch::name("Third")).unwrap());
    assert_eq!(store.read("w1").unwrap().unwrap().name, "Third");
}

#[test]
fn test_both_files_corrupt_is_not_found() {
    let (_dir, store) = open_store();
    store.write(&sample_record("w1")).unwrap();
    store.update("w1", WalletRecordPatch::name("Second")).unwrap();
    fs::write(primary_file(&store, "w1"), b"xx").unwrap();
    fs::write(backup_file(&store, "w1"), b"yy").unwrap();

    assert!(store.read("w1").unwrap().is_none());
    assert!(!store.update("w1", WalletRecordPatch::name("x")).unwrap());
}

#[test]
fn test_future_schema_is_an_error() {
    let (_dir, store) = open_store();
    store.write(&sample_record("w1")).unwrap();
    let path = primary_file(&store, "w1");
    let mut value: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
    value["schemaVersion"] = serde_json::json!(3);
    fs::write(&path, serde_json::to_vec(&value).unwrap()).unwrap();

    assert!(matches!(store.read("w1"), Err(Error::UnsupportedSchema(3))));
}

#[test]
fn test_v1_file_upgraded_on_read() {
    let (_dir, store) = open_store();
    let funding = "11".repeat(32);
    let pending = "22".repeat(32);
    let v1 = serde_json::json!({
        "id": "legacy",
        "name": "Old",
        "type": "WATCH_ADDRESSES",
        "network": "mainnet",
        "createdAt": 1_600_000_000_000i64,
        "addresses": [ADDR_A, {"address": ADDR_B, "index": 0, "isChange": true}],
        "balance": {"confirmed": 999, "unconfirmed": 0},
        "utxos": [
            {"txid": funding, "vout": 0, "value": 5000, "address": ADDR_A, "confirmations": 3},
            {"txid": pending, "vout": 1, "value": 700, "address": ADDR_A, "confirmations": 0}
        ],
        "transactions": [
            {"txid": funding, "timestamp": 1_600_000_001_000i64, "confirmations": 3, "amount": 5000,
             "outputs": [{"address": ADDR_A, "value": 5000}]}
        ],
        "lastSync": 1_600_000_002_000i64,
        "labels": {ADDR_A: "Donations"},
        "notes": {funding.clone(): "first"}
    });
    fs::write(
        primary_file(&store, "legacy"),
        serde_json::to_vec_pretty(&v1).unwrap(),
    )
    .unwrap();

    let record = store.read("legacy").unwrap().unwrap();
    assert_eq!(record.schema_version, 2);
    assert_eq!(record.wallet_type, WalletType::WatchAddresses);
    assert_eq!(record.created_at, 1_600_000_000_000);
    assert_eq!(record.lkg.confirmed_balance, 5000);
    assert_eq!(record.lkg.unconfirmed_balance, 700);
    assert_eq!(record.lkg.utxos[0].height, 1);
    assert_eq!(record.lkg.utxos[1].height, 0);
    assert_eq!(record.sync_state.status, SyncStatus::Stale);
    assert!(record.sync_state.is_stale);
    assert_eq!(record.inventory.len(), 2);
    assert!(record.inventory.used.contains(ADDR_A));
    assert_eq!(record.address_labels.get(ADDR_A).map(String::as_str), Some("Donations"));
    assert_eq!(
        record.tx_metadata.get(&funding).and_then(|m| m.note.as_deref()),
        Some("first")
    );
    assert!(record.lkg.tx_details[&funding]
        .outputs
        .iter()
        .all(|o| !o.is_mine));

    // Written back at the current schema
    let raw: serde_json::Value =
        serde_json::from_slice(&fs::read(primary_file(&store, "legacy")).unwrap()).unwrap();
    assert_eq!(raw["schemaVersion"], serde_json::json!(2));
    assert!(store.verify_integrity("legacy").unwrap());
}

// ============================================================================
// Sync lifecycle
// ============================================================================

#[test]
fn test_record_sync_error_keeps_lkg() {
    let (_dir, store) = open_store();
    store.write(&sample_record("w1")).unwrap();
    let before = store.read("w1").unwrap().unwrap();

    let started = chrono::Utc::now().timestamp_millis();
    assert!(store.record_sync_error("w1", "timeout").unwrap());
    let after = store.read("w1").unwrap().unwrap();

    assert_eq!(after.lkg, before.lkg);
    assert_eq!(after.sync_state.status, SyncStatus::Error);
    assert_eq!(after.sync_state.failure_count, before.sync_state.failure_count + 1);
    assert_eq!(after.sync_state.last_error.as_deref(), Some("timeout"));
    assert!(after.sync_state.next_retry_at.unwrap() > started);
    assert!(after.staging.is_none());
}

#[test]
fn test_staging_then_commit() {
    let (_dir, store) = open_store();
    store.write(&sample_record("w1")).unwrap();
    store.record_sync_error("w1", "refused").unwrap();

    let staged = LkgSnapshot::new(
        vec![utxo(&"ef".repeat(32), 0, 9_000, 800_100)],
        Vec::new(),
        BTreeMap::new(),
        Some(800_100),
    );
    assert!(store.save_staging("w1", staged.clone()).unwrap());
    let syncing = store.read("w1").unwrap().unwrap();
    assert_eq!(syncing.sync_state.status, SyncStatus::Syncing);
    assert_eq!(syncing.staging.as_ref().map(|s| s.utxos.len()), Some(1));
    assert_eq!(syncing.lkg.utxos.len(), 2);

    assert!(store
        .commit_lkg_from("w1", staged, Some("ssl://example:50002".to_string()))
        .unwrap());
    let synced = store.read("w1").unwrap().unwrap();
    assert!(synced.staging.is_none());
    assert_eq!(synced.sync_state.status, SyncStatus::Synced);
    assert_eq!(synced.sync_state.failure_count, 0);
    assert!(synced.sync_state.last_error.is_none());
    assert_eq!(synced.sync_state.last_known_tip_height, Some(800_100));
    assert_eq!(
        synced.sync_state.last_server_used.as_deref(),
        Some("ssl://example:50002")
    );
    assert_eq!(synced.lkg.confirmed_balance, 9_000);
    assert!(store.verify_integrity("w1").unwrap());
}

#[test]
fn test_staging_dropped_outside_syncing() {
    let (_dir, store) = open_store();
    let mut record = sample_record("w1");
    record.staging = Some(LkgSnapshot::default());
    store.write(&record).unwrap();
    assert!(store.read("w1").unwrap().unwrap().staging.is_none());
}

#[test]
fn test_mark_stale_keeps_lkg() {
    let (_dir, store) = open_store();
    store.write(&sample_record("w1")).unwrap();
    let before = store.read("w1").unwrap().unwrap();
    assert!(store.mark_stale("w1").unwrap());
    let after = store.read("w1").unwrap().unwrap();
    assert_eq!(after.sync_state.status, SyncStatus::Stale);
    assert!(after.sync_state.is_stale);
    assert_eq!(after.lkg, before.lkg);
}

// ============================================================================
// User metadata
// ============================================================================

#[test]
fn test_user_metadata_setters() {
    let (_dir, store) = open_store();
    store.write(&sample_record("w1")).unwrap();
    let txid = "ab".repeat(32);

    let meta = TxUserMetadata {
        note: Some("rent".to_string()),
        tags: ["bills".to_string()].into_iter().collect(),
    };
    assert!(store.update_tx_user_metadata("w1", &txid, meta.clone()).unwrap());
    assert!(store
        .update_utxo_user_metadata(
            "w1",
            &format!("{}:0", txid),
            UtxoUserMetadata {
                frozen: true,
                ..Default::default()
            },
        )
        .unwrap());
    assert!(store.update_address_label("w1", ADDR_A, Some("Main")).unwrap());

    let record = store.read("w1").unwrap().unwrap();
    assert_eq!(record.tx_metadata.get(&txid), Some(&meta));
    assert!(record.utxo_metadata[&format!("{}:0", txid)].frozen);
    assert_eq!(record.address_labels[ADDR_A], "Main");

    store
        .update_tx_user_metadata("w1", &txid, TxUserMetadata::default())
        .unwrap();
    store.update_address_label("w1", ADDR_A, Some("  ")).unwrap();
    let record = store.read("w1").unwrap().unwrap();
    assert!(record.tx_metadata.is_empty());
    assert!(record.address_labels.is_empty());
}

// ============================================================================
// Concurrency
// ============================================================================

#[test]
fn test_back_to_back_updates_last_wins() {
    let (_dir, store) = open_store();
    store.write(&sample_record("w1")).unwrap();
    store.update("w1", WalletRecordPatch::name("a")).unwrap();
    store.update("w1", WalletRecordPatch::name("b")).unwrap();
    assert_eq!(store.read("w1").unwrap().unwrap().name, "b");
}

#[test]
fn test_concurrent_updates_lose_nothing() {
    let (_dir, store) = open_store();
    let store = Arc::new(store);
    store.write(&sample_record("w1")).unwrap();

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let store = store.clone();
            thread::spawn(move || {
                let address = format!("addr-{}", i);
                assert!(store
                    .update_address_label("w1", &address, Some(&format!("label {}", i)))
                    .unwrap());
            })
        })
        .collect();
    // Readers run lock-free alongside the writers
    for _ in 0..20 {
        assert!(store.read("w1").unwrap().is_some());
    }
    for handle in handles {
        handle.join().unwrap();
    }

    let record = store.read("w1").unwrap().unwrap();
    assert_eq!(record.address_labels.len(), 8);
    assert!(store.verify_integrity("w1").unwrap());
}

// ============================================================================
// Temp files and deletion
// ============================================================================

#[test]
fn test_sweep_respects_grace_window() {
    let dir = TempDir::new().unwrap();
    let config = StoreConfig::default()
        .with_data_dir(dir.path())
        .with_temp_grace(Duration::from_secs(3600));
    let store = RecordStore::open(config).unwrap();
    let orphan = store.wallet_dir().join("wallet_w1.json.1700000000000-0badf00d.tmp");
    fs::write(&orphan, b"partial").unwrap();
    let unrelated = store.wallet_dir().join("notes.tmp");
    fs::write(&unrelated, b"keep").unwrap();

    assert_eq!(store.sweep_orphan_temps().unwrap(), 0);
    assert!(orphan.exists());

    let eager = RecordStore::open(
        StoreConfig::default()
            .with_data_dir(dir.path())
            .with_temp_grace(Duration::ZERO),
    )
    .unwrap();
    assert!(!orphan.exists());
    assert!(unrelated.exists());
    assert_eq!(eager.sweep_orphan_temps().unwrap(), 0);
}

#[test]
fn test_delete_removes_every_file() {
    let (_dir, store) = open_store();
    store.write(&sample_record("w1")).unwrap();
    store.update("w1", WalletRecordPatch::name("x")).unwrap();
    let temp = store.wallet_dir().join("wallet_w1.json.1-00000001.tmp");
    fs::write(&temp, b"partial").unwrap();

    assert!(store.delete("w1").unwrap());
    assert!(!primary_file(&store, "w1").exists());
    assert!(!backup_file(&store, "w1").exists());
    assert!(!temp.exists());
    assert!(store.read("w1").unwrap().is_none());
    assert!(!store.delete("w1").unwrap());
}

// ============================================================================
// Property tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// Property: stored balances always equal the utxo sums split by height
    #[test]
    fn prop_stored_balances_match_utxos(
        entries in prop::collection::vec((1u64..10_000_000, 0u32..3), 0..12)
    ) {
        let (_dir, store) = open_store();
        let mut record = sample_record("p");
        record.lkg.utxos = entries
            .iter()
            .enumerate()
            .map(|(i, (value, height))| utxo(&format!("{:064x}", i), 0, *value, *height))
            .collect();
        store.write(&record).unwrap();

        let loaded = store.read("p").unwrap().unwrap();
        let confirmed: u64 = entries.iter().filter(|(_, h)| *h > 0).map(|(v, _)| v).sum();
        let unconfirmed: u64 = entries.iter().filter(|(_, h)| *h == 0).map(|(v, _)| v).sum();
        prop_assert_eq!(loaded.lkg.confirmed_balance, confirmed);
        prop_assert_eq!(loaded.lkg.unconfirmed_balance, unconfirmed);
        prop_assert!(store.verify_integrity("p").unwrap());
    }
}
