//! Snapshot hashing and verification
//!
//! The hash covers the canonical JSON serialization of the LKG snapshot.
//! Struct fields serialize in declaration order and every map is a
//! `BTreeMap`/`BTreeSet`, so the byte stream is stable across writes.

use crate::models::{now_ms, LkgSnapshot, WalletRecord};
use crate::Result;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Integrity hashes stored with each record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Integrity {
    /// Hash of the current LKG snapshot
    pub snapshot_hash: String,
    /// Hash at the last successful write
    pub last_good_snapshot_hash: Option<String>,
    /// Per-write trace token
    pub atomic_write_id: String,
}

/// SHA-256 over the canonical serialization of `lkg`, hex
pub fn snapshot_hash(lkg: &LkgSnapshot) -> Result<String> {
    let bytes = serde_json::to_vec(lkg)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

/// Fresh write identifier: millisecond timestamp plus a v4 UUID
pub fn new_atomic_write_id() -> String {
    format!("{}-{}", now_ms(), uuid::Uuid::new_v4())
}

/// Recompute the snapshot hash and issue a new write id
pub fn seal(record: &mut WalletRecord) -> Result<()> {
    let hash = snapshot_hash(&record.lkg)?;
    record.integrity = Integrity {
        last_good_snapshot_hash: Some(hash.clone()),
        snapshot_hash: hash,
        atomic_write_id: new_atomic_write_id(),
    };
    Ok(())
}

/// Whether the stored hash matches the stored snapshot. Never repairs.
pub fn verify(record: &WalletRecord) -> Result<bool> {
    let actual = snapshot_hash(&record.lkg)?;
    let ok = actual == record.integrity.snapshot_hash;
    if !ok {
        tracing::warn!(
            "Integrity mismatch for wallet {}: stored={}, actual={}",
            record.wallet_id,
            record.integrity.snapshot_hash,
            actual
        );
    }
    Ok(ok)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ImportSource, WalletType};
    use satchel_params::NetworkType;

    fn record() -> WalletRecord {
        WalletRecord::new(
            "w1",
            "Test",
            WalletType::WatchAddresses,
            ImportSource::AddressList,
            NetworkType::Mainnet,
        )
    }

    #[test]
    fn test_seal_then_verify() {
        let mut record = record();
        assert!(!verify(&record).unwrap());

        seal(&mut record).unwrap();
        assert!(verify(&record).unwrap());
        assert_eq!(
            record.integrity.last_good_snapshot_hash.as_deref(),
            Some(record.integrity.snapshot_hash.as_str())
        );
        assert_eq!(record.integrity.snapshot_hash.len(), 64);
    }

    #[test]
    fn test_write_ids_are_distinct() {
        let mut record = record();
        seal(&mut record).unwrap();
        let first = record.integrity.atomic_write_id.clone();
        seal(&mut record).unwrap();
        assert_ne!(first, record.integrity.atomic_write_id);
    }

    #[test]
    fn test_mutation_breaks_verification() {
        let mut record = record();
        seal(&mut record).unwrap();
        record.lkg.confirmed_balance = 42;
        assert!(!verify(&record).unwrap());
    }

    #[test]
    fn test_hash_is_stable_across_serde() {
        let mut record = record();
        record.lkg.tracked_pending.insert("b".into());
        record.lkg.tracked_pending.insert("a".into());
        seal(&mut record).unwrap();

        let json = serde_json::to_string(&record).unwrap();
        let back: WalletRecord = serde_json::from_str(&json).unwrap();
        assert!(verify(&back).unwrap());
    }
}
