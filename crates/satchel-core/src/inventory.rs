//! Address inventory persisted with each wallet record

use crate::address::AddressInfo;
use crate::watch_only::WatchOnlyWallet;
use crate::Result;
use satchel_params::ScriptType;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Default number of addresses derived per chain
pub const DEFAULT_GAP_LIMIT: u32 = 20;

/// Next index to derive on each chain
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexCounters {
    /// External chain
    pub receive: u32,
    /// Internal chain
    pub change: u32,
}

/// Derived addresses plus discovery bookkeeping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptInventory {
    /// Addresses in derivation order (receive chain first)
    pub addresses: Vec<AddressInfo>,
    /// Per-script-type counters
    #[serde(default)]
    pub counters: BTreeMap<ScriptType, IndexCounters>,
    /// Gap limit used for discovery
    pub gap_limit: u32,
    /// Addresses seen in chain data
    #[serde(default)]
    pub used: BTreeSet<String>,
    /// Last discovery pass (ms since epoch)
    #[serde(default)]
    pub last_discovery_at: Option<i64>,
}

impl Default for ScriptInventory {
    fn default() -> Self {
        Self {
            addresses: Vec::new(),
            counters: BTreeMap::new(),
            gap_limit: DEFAULT_GAP_LIMIT,
            used: BTreeSet::new(),
            last_discovery_at: None,
        }
    }
}

impl ScriptInventory {
    /// Record a derived address and advance its counter
    pub fn push(&mut self, info: AddressInfo) {
        let counters = self.counters.entry(info.script_type).or_default();
        let next = info.index.saturating_add(1);
        if info.is_change {
            counters.change = counters.change.max(next);
        } else {
            counters.receive = counters.receive.max(next);
        }
        self.addresses.push(info);
    }

    /// Whether `address` is part of the inventory
    pub fn contains(&self, address: &str) -> bool {
        self.addresses.iter().any(|a| a.address == address)
    }

    /// Mark an inventory address as used. Returns false for unknown addresses.
    pub fn mark_used(&mut self, address: &str) -> bool {
        if !self.contains(address) {
            return false;
        }
        self.used.insert(address.to_string())
    }

    /// Index of the first unused receive address
    pub fn next_receive_index(&self) -> u32 {
        self.addresses
            .iter()
            .filter(|a| !a.is_change && !self.used.contains(&a.address))
            .map(|a| a.index)
            .min()
            .unwrap_or_else(|| {
                self.counters
                    .values()
                    .map(|c| c.receive)
                    .max()
                    .unwrap_or_default()
            })
    }

    /// All address strings, in inventory order
    pub fn address_strings(&self) -> Vec<String> {
        self.addresses.iter().map(|a| a.address.clone()).collect()
    }

    /// Number of inventory addresses
    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    /// Whether the inventory is empty
    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }
}

/// Derive the initial inventory for a wallet.
///
/// Derivable wallets get `gap_limit` addresses per chain they have; fixed
/// wallets (address lists, non-ranged descriptors) get everything they can
/// produce.
pub fn build_inventory(wallet: &WatchOnlyWallet, gap_limit: u32) -> Result<ScriptInventory> {
    let mut inventory = ScriptInventory {
        gap_limit,
        ..Default::default()
    };

    for is_change in [false, true] {
        if is_change && !wallet.has_change_chain() {
            continue;
        }
        if wallet.can_derive() {
            for info in wallet.derive_range(0, gap_limit, is_change)? {
                inventory.push(info);
            }
        } else {
            let mut index = 0u32;
            while let Ok(info) = wallet.derive_address(index, is_change) {
                inventory.push(info);
                index += 1;
            }
        }
    }

    inventory.last_discovery_at = Some(chrono::Utc::now().timestamp_millis());
    tracing::debug!(
        "Built inventory: {} addresses (gap limit {})",
        inventory.len(),
        gap_limit
    );
    Ok(inventory)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BIP84_ZPUB: &str = "zpub6rFR7y4Q2AijBEqTUquhVz398htDFrtymD9xYYfG1m4wAcvPhXNfE3EfH1r1ADqtfSdVCToUG868RvUUkgDKf31mGDtKsAYz2oz2AGutZYs";

    #[test]
    fn test_build_from_extended_key() {
        let wallet = WatchOnlyWallet::from_extended_key(BIP84_ZPUB, None).unwrap();
        let inventory = build_inventory(&wallet, 5).unwrap();
        assert_eq!(inventory.len(), 10);
        assert_eq!(inventory.gap_limit, 5);
        assert!(inventory.last_discovery_at.is_some());

        let counters = inventory.counters[&ScriptType::NativeSegwit];
        assert_eq!(counters, IndexCounters { receive: 5, change: 5 });
        assert_eq!(
            inventory.addresses[0].address,
            "bc1qcr8te4kr609gcawutmrza0j4xv80jy8z306fyu"
        );
        assert!(inventory.addresses[5].is_change);
    }

    #[test]
    fn test_build_from_address_list() {
        let list = [
            "bc1qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdq",
            "3J98t1WpEZ73CNmQviecrnyiWrnqRhWNLy",
        ];
        let wallet = WatchOnlyWallet::from_addresses(&list).unwrap();
        let inventory = build_inventory(&wallet, DEFAULT_GAP_LIMIT).unwrap();
        assert_eq!(inventory.address_strings(), list.to_vec());
        assert!(inventory.addresses.iter().all(|a| !a.is_change));
    }

    #[test]
    fn test_build_from_descriptor_without_change_chain() {
        let bare = format!("wpkh({BIP84_ZPUB}/*)");
        let wallet = WatchOnlyWallet::from_descriptor(&bare, None).unwrap();
        let inventory = build_inventory(&wallet, 3).unwrap();
        assert_eq!(inventory.len(), 3);
        assert!(inventory.addresses.iter().all(|a| !a.is_change));
        assert_eq!(
            inventory.counters[&ScriptType::NativeSegwit],
            IndexCounters { receive: 3, change: 0 }
        );
    }

    #[test]
    fn test_build_from_single_address_descriptor() {
        let fixed = format!("wpkh({BIP84_ZPUB}/0/1)");
        let wallet = WatchOnlyWallet::from_descriptor(&fixed, None).unwrap();
        let inventory = build_inventory(&wallet, DEFAULT_GAP_LIMIT).unwrap();
        assert_eq!(
            inventory.address_strings(),
            vec!["bc1qnjg0jd8228aq7egyzacy8cys3knf9xvrerkf9g".to_string()]
        );
        assert!(!inventory.addresses[0].is_change);
    }

    #[test]
    fn test_mark_used_and_next_receive_index() {
        let wallet = WatchOnlyWallet::from_extended_key(BIP84_ZPUB, None).unwrap();
        let mut inventory = build_inventory(&wallet, 3).unwrap();
        assert_eq!(inventory.next_receive_index(), 0);

        let first = inventory.addresses[0].address.clone();
        assert!(inventory.mark_used(&first));
        assert!(!inventory.mark_used(&first));
        assert!(!inventory.mark_used("bc1qnotmine"));
        assert_eq!(inventory.next_receive_index(), 1);

        for a in inventory.address_strings().into_iter().take(3) {
            inventory.mark_used(&a);
        }
        assert_eq!(inventory.next_receive_index(), 3);
    }

    #[test]
    fn test_serde_shape() {
        let wallet = WatchOnlyWallet::from_extended_key(BIP84_ZPUB, None).unwrap();
        let inventory = build_inventory(&wallet, 1).unwrap();
        let json = serde_json::to_value(&inventory).unwrap();
        assert_eq!(json["gapLimit"], 1);
        assert_eq!(json["counters"]["native_segwit"]["receive"], 1);

        let back: ScriptInventory = serde_json::from_value(json).unwrap();
        assert_eq!(back, inventory);
    }
}
