//! Watch-only wallets built from public material
//!
//! Watch-only wallets can:
//! - Derive receive and change addresses (extended key or descriptor)
//! - Report network and script type for the address inventory
//! - Locate an address on its derivation chains
//!
//! Watch-only wallets CANNOT:
//! - Sign or spend
//! - Derive beyond an imported address list

use crate::address::{address_for_pubkey, classify_address, parse_address, AddressInfo};
use crate::descriptor::{render_step, ParsedDescriptor};
use crate::xpub::ExtendedPubKey;
use crate::{Error, Result};
use bitcoin::bip32::ChildNumber;
use bitcoin::secp256k1::{Secp256k1, VerifyOnly};
use satchel_params::{Network, NetworkType, ScriptType};

const EXTERNAL_CHAIN: u32 = 0;
const INTERNAL_CHAIN: u32 = 1;

/// Watch-only wallet capabilities
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchOnlyCapabilities {
    /// Can view transactions touching known addresses
    pub can_view_transactions: bool,
    /// Can spend funds
    pub can_spend: bool,
    /// Can export seed
    pub can_export_seed: bool,
    /// Can generate addresses beyond the initial inventory
    pub can_generate_addresses: bool,
}

/// What the wallet was constructed from
#[derive(Debug, Clone)]
pub enum WatchOnlySource {
    /// Account-level extended public key
    ExtendedKey(ExtendedPubKey),
    /// Single-key output descriptor
    Descriptor(ParsedDescriptor),
    /// Flat list of addresses; no BIP32 node
    AddressList(Vec<String>),
}

/// Watch-only wallet
#[derive(Debug, Clone)]
pub struct WatchOnlyWallet {
    source: WatchOnlySource,
    network: NetworkType,
    script_type: ScriptType,
    secp: Secp256k1<VerifyOnly>,
}

impl WatchOnlyWallet {
    /// Build from an extended public key (`xpub`, `ypub`, `zpub`, `tpub`, `upub`, `vpub`)
    pub fn from_extended_key(key: &str, network: Option<NetworkType>) -> Result<Self> {
        let key = ExtendedPubKey::parse_for_network(key, network)?;
        tracing::info!(
            "Watch-only wallet from '{}' key: network={}, script_type={}",
            key.prefix().prefix,
            key.network(),
            key.script_type()
        );
        Ok(Self {
            network: key.network(),
            script_type: key.script_type(),
            source: WatchOnlySource::ExtendedKey(key),
            secp: Secp256k1::verification_only(),
        })
    }

    /// Build from an output descriptor
    pub fn from_descriptor(descriptor: &str, network: Option<NetworkType>) -> Result<Self> {
        let mut parsed = ParsedDescriptor::parse(descriptor)?;
        if let Some(network) = network {
            parsed = parsed.for_network(network)?;
        }
        tracing::info!(
            "Watch-only wallet from descriptor: network={}, script_type={}, ranged={}",
            parsed.network(),
            parsed.script_type(),
            parsed.is_ranged()
        );
        Ok(Self {
            network: parsed.network(),
            script_type: parsed.script_type(),
            source: WatchOnlySource::Descriptor(parsed),
            secp: Secp256k1::verification_only(),
        })
    }

    /// Build from a flat address list.
    ///
    /// Network and script type are guessed from the first address.
    pub fn from_addresses<S: AsRef<str>>(addresses: &[S]) -> Result<Self> {
        let first = addresses
            .first()
            .ok_or_else(|| Error::InvalidAddress("address list is empty".to_string()))?;
        let (network, script_type) = classify_address(first.as_ref())?;

        let mut list = Vec::with_capacity(addresses.len());
        for address in addresses {
            let address = address.as_ref().trim();
            let (entry_network, _) = classify_address(address)?;
            if entry_network.is_test() != network.is_test() {
                return Err(Error::NetworkMismatch(format!(
                    "{address} is not a {network} address"
                )));
            }
            parse_address(address, entry_network)?;
            list.push(address.to_string());
        }

        Ok(Self {
            source: WatchOnlySource::AddressList(list),
            network,
            script_type,
            secp: Secp256k1::verification_only(),
        })
    }

    /// Source material
    pub fn source(&self) -> &WatchOnlySource {
        &self.source
    }

    /// Network
    pub fn network(&self) -> NetworkType {
        self.network
    }

    /// Script type
    pub fn script_type(&self) -> ScriptType {
        self.script_type
    }

    /// Whether new addresses can be derived
    pub fn can_derive(&self) -> bool {
        match &self.source {
            WatchOnlySource::ExtendedKey(_) => true,
            WatchOnlySource::Descriptor(d) => d.is_ranged(),
            WatchOnlySource::AddressList(_) => false,
        }
    }

    /// Whether `derive_address(_, true)` has an internal chain to walk.
    ///
    /// False for address lists, non-ranged descriptors and ranged
    /// descriptors whose last fixed step is not a chain digit.
    pub fn has_change_chain(&self) -> bool {
        match &self.source {
            WatchOnlySource::ExtendedKey(_) => true,
            WatchOnlySource::Descriptor(d) => d.chain().is_some(),
            WatchOnlySource::AddressList(_) => false,
        }
    }

    /// Get capabilities
    pub fn capabilities(&self) -> WatchOnlyCapabilities {
        WatchOnlyCapabilities {
            can_view_transactions: true,
            can_spend: false,
            can_export_seed: false,
            can_generate_addresses: self.can_derive(),
        }
    }

    /// Master fingerprint, when known
    pub fn fingerprint(&self) -> Option<String> {
        match &self.source {
            WatchOnlySource::Descriptor(d) => d.origin().map(|o| o.fingerprint.to_string()),
            WatchOnlySource::ExtendedKey(k) if k.xpub().depth == 0 => {
                Some(k.fingerprint().to_string())
            }
            _ => None,
        }
    }

    /// Canonical receive descriptor with checksum (none for address lists)
    pub fn descriptor(&self) -> Result<Option<String>> {
        match &self.source {
            WatchOnlySource::ExtendedKey(k) => {
                ParsedDescriptor::from_extended_key(k, None, EXTERNAL_CHAIN)?
                    .to_string_with_checksum()
                    .map(Some)
            }
            WatchOnlySource::Descriptor(d) => d.to_string_with_checksum().map(Some),
            WatchOnlySource::AddressList(_) => Ok(None),
        }
    }

    /// Change-chain view of the descriptor (chain digit toggled)
    pub fn change_descriptor(&self) -> Result<Option<String>> {
        match &self.source {
            WatchOnlySource::ExtendedKey(k) => {
                ParsedDescriptor::from_extended_key(k, None, INTERNAL_CHAIN)?
                    .to_string_with_checksum()
                    .map(Some)
            }
            WatchOnlySource::Descriptor(d) => {
                d.change_descriptor()?.to_string_with_checksum().map(Some)
            }
            WatchOnlySource::AddressList(_) => Ok(None),
        }
    }

    /// Derive the address at `index` on the external (0) or internal (1) chain
    pub fn derive_address(&self, index: u32, is_change: bool) -> Result<AddressInfo> {
        match &self.source {
            WatchOnlySource::AddressList(list) => self.list_address(list, index, is_change),
            WatchOnlySource::ExtendedKey(key) => {
                let chain = if is_change { INTERNAL_CHAIN } else { EXTERNAL_CHAIN };
                let steps = vec![
                    ChildNumber::from_normal_idx(chain)?,
                    ChildNumber::from_normal_idx(index)?,
                ];
                let child = key.xpub().derive_pub(&self.secp, &steps)?;
                let address =
                    address_for_pubkey(&self.secp, &child.public_key, self.script_type, self.network);
                let coin = Network::from_type(self.network).coin_type;
                Ok(AddressInfo {
                    address: address.to_string(),
                    path: format!(
                        "m/{}'/{}'/0'/{}/{}",
                        self.script_type.purpose(),
                        coin,
                        chain,
                        index
                    ),
                    index,
                    is_change,
                    script_type: self.script_type,
                })
            }
            WatchOnlySource::Descriptor(desc) => {
                let steps = descriptor_steps(desc, index, is_change)?;
                let child = desc.key().xpub().derive_pub(&self.secp, &steps)?;
                let address =
                    address_for_pubkey(&self.secp, &child.public_key, self.script_type, self.network);

                let mut path = String::from("m");
                let origin_steps = desc.origin().map(|o| o.path.as_ref().to_vec()).unwrap_or_default();
                for step in origin_steps.iter().chain(steps.iter()) {
                    path.push('/');
                    path.push_str(&render_step(step));
                }
                Ok(AddressInfo {
                    address: address.to_string(),
                    path,
                    index,
                    is_change,
                    script_type: self.script_type,
                })
            }
        }
    }

    /// Derive `count` consecutive addresses starting at `start`
    pub fn derive_range(&self, start: u32, count: u32, is_change: bool) -> Result<Vec<AddressInfo>> {
        (start..start.saturating_add(count))
            .map(|index| self.derive_address(index, is_change))
            .collect()
    }

    /// Linear search of both chains for `address` up to `max_index` (exclusive)
    pub fn find_address(&self, address: &str, max_index: u32) -> Option<AddressInfo> {
        let address = address.trim();
        if let WatchOnlySource::AddressList(list) = &self.source {
            return list
                .iter()
                .position(|a| same_address(a, address))
                .and_then(|i| self.list_address(list, i as u32, false).ok());
        }

        for is_change in [false, true] {
            for index in 0..max_index {
                match self.derive_address(index, is_change) {
                    Ok(info) if same_address(&info.address, address) => return Some(info),
                    Ok(_) => {}
                    Err(e) => {
                        tracing::debug!("find_address stopped at index {}: {}", index, e);
                        break;
                    }
                }
            }
        }
        None
    }

    fn list_address(&self, list: &[String], index: u32, is_change: bool) -> Result<AddressInfo> {
        if is_change {
            return Err(Error::IndexOutOfRange(
                "address-list wallets have no change chain".to_string(),
            ));
        }
        let address = list.get(index as usize).ok_or_else(|| {
            Error::IndexOutOfRange(format!(
                "index {} beyond the {} imported addresses",
                index,
                list.len()
            ))
        })?;
        let script_type = classify_address(address)
            .map(|(_, ty)| ty)
            .unwrap_or(self.script_type);
        Ok(AddressInfo {
            address: address.clone(),
            path: format!("imported/{index}"),
            index,
            is_change: false,
            script_type,
        })
    }
}

fn descriptor_steps(desc: &ParsedDescriptor, index: u32, is_change: bool) -> Result<Vec<ChildNumber>> {
    let mut steps = desc.steps().to_vec();
    // Only the chain digit of a ranged descriptor is rewritten; fixed paths are kept as written
    match (desc.chain(), steps.last_mut()) {
        (Some(_), Some(last)) => {
            let chain = if is_change { INTERNAL_CHAIN } else { EXTERNAL_CHAIN };
            *last = ChildNumber::from_normal_idx(chain)?;
        }
        _ if is_change => {
            return Err(Error::UnsupportedDescriptor(
                "descriptor has no change branch".to_string(),
            ))
        }
        _ => {}
    }

    if desc.is_ranged() {
        steps.push(ChildNumber::from_normal_idx(index)?);
    } else if index != 0 {
        return Err(Error::IndexOutOfRange(
            "non-ranged descriptor describes a single address".to_string(),
        ));
    }
    Ok(steps)
}

fn same_address(a: &str, b: &str) -> bool {
    // Bech32 is case-insensitive; base58 is not.
    let bech32 = |s: &str| {
        let lower = s.to_ascii_lowercase();
        lower.starts_with("bc1") || lower.starts_with("tb1") || lower.starts_with("bcrt1")
    };
    if bech32(a) && bech32(b) {
        a.eq_ignore_ascii_case(b)
    } else {
        a == b
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BIP84_ZPUB: &str = "zpub6rFR7y4Q2AijBEqTUquhVz398htDFrtymD9xYYfG1m4wAcvPhXNfE3EfH1r1ADqtfSdVCToUG868RvUUkgDKf31mGDtKsAYz2oz2AGutZYs";
    const BIP86_XPUB: &str = "xpub6BgBgsespWvERF3LHQu6CnqdvfEvtMcQjYrcRzx53QJjSxarj2afYWcLteoGVky7D3UKDP9QyrLprQ3VCECoY49yfdDEHGCtMMj92pReUsQ";

    #[test]
    fn test_zpub_derives_bip84_vectors() {
        let wallet = WatchOnlyWallet::from_extended_key(BIP84_ZPUB, None).unwrap();
        assert_eq!(wallet.network(), NetworkType::Mainnet);
        assert_eq!(wallet.script_type(), ScriptType::NativeSegwit);
        assert!(wallet.can_derive());

        let receive = wallet.derive_address(0, false).unwrap();
        assert_eq!(receive.address, "bc1qcr8te4kr609gcawutmrza0j4xv80jy8z306fyu");
        assert_eq!(receive.path, "m/84'/0'/0'/0/0");

        let change = wallet.derive_address(0, true).unwrap();
        assert_eq!(change.address, "bc1q8c6fshw2dlwun7ekn9qwf37cu2rn755upcp6el");
        assert!(change.is_change);
        assert_eq!(change.path, "m/84'/0'/0'/1/0");
    }

    #[test]
    fn test_taproot_descriptor_derives_bip86_vector() {
        let desc = format!("tr([73c5da0a/86'/0'/0']{BIP86_XPUB}/0/*)");
        let wallet = WatchOnlyWallet::from_descriptor(&desc, None).unwrap();
        assert_eq!(wallet.script_type(), ScriptType::Taproot);
        assert_eq!(wallet.fingerprint().as_deref(), Some("73c5da0a"));

        let first = wallet.derive_address(0, false).unwrap();
        assert_eq!(
            first.address,
            "bc1p5cyxnuxmeuwuvkwfem96lqzszd02n6xdcjrs20cac6yqjjwudpxqkedrcr"
        );
        assert_eq!(first.path, "m/86'/0'/0'/0/0");
    }

    #[test]
    fn test_descriptor_and_zpub_agree() {
        let from_key = WatchOnlyWallet::from_extended_key(BIP84_ZPUB, None).unwrap();
        let desc = format!("wpkh([73c5da0a/84'/0'/0']{BIP84_ZPUB}/0/*)");
        let from_desc = WatchOnlyWallet::from_descriptor(&desc, None).unwrap();
        for index in 0..3 {
            for is_change in [false, true] {
                assert_eq!(
                    from_key.derive_address(index, is_change).unwrap().address,
                    from_desc.derive_address(index, is_change).unwrap().address
                );
            }
        }
    }

    #[test]
    fn test_wrapped_and_legacy_address_shapes() {
        let ypub = crate::xpub::convert_prefix(
            BIP84_ZPUB,
            satchel_params::extended_key_prefix("ypub").unwrap(),
        )
        .unwrap();
        let wrapped = WatchOnlyWallet::from_extended_key(&ypub, None).unwrap();
        let addr = wrapped.derive_address(0, false).unwrap();
        assert!(addr.address.starts_with('3'));
        assert_eq!(addr.path, "m/49'/0'/0'/0/0");

        let standard = crate::xpub::to_standard(BIP84_ZPUB).unwrap();
        let legacy = WatchOnlyWallet::from_extended_key(&standard, None).unwrap();
        let addr = legacy.derive_address(0, false).unwrap();
        assert!(addr.address.starts_with('1'));
        assert_eq!(addr.script_type, ScriptType::Legacy);
    }

    #[test]
    fn test_find_address_scans_both_chains() {
        let wallet = WatchOnlyWallet::from_extended_key(BIP84_ZPUB, None).unwrap();
        let found = wallet
            .find_address("bc1q8c6fshw2dlwun7ekn9qwf37cu2rn755upcp6el", 5)
            .unwrap();
        assert!(found.is_change);
        assert_eq!(found.index, 0);

        let upper = "BC1QCR8TE4KR609GCAWUTMRZA0J4XV80JY8Z306FYU";
        assert_eq!(wallet.find_address(upper, 5).unwrap().index, 0);
        assert!(wallet.find_address("bc1qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdq", 5).is_none());
    }

    #[test]
    fn test_address_list_wallet() {
        let list = [
            "bc1qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdq",
            "1BvBMSEYstWetqTFn5Au4m4GFg7xJaNVN2",
        ];
        let wallet = WatchOnlyWallet::from_addresses(&list).unwrap();
        assert_eq!(wallet.network(), NetworkType::Mainnet);
        assert_eq!(wallet.script_type(), ScriptType::NativeSegwit);
        assert!(!wallet.can_derive());
        assert!(!wallet.capabilities().can_generate_addresses);
        assert!(!wallet.capabilities().can_spend);

        let second = wallet.derive_address(1, false).unwrap();
        assert_eq!(second.address, list[1]);
        assert_eq!(second.script_type, ScriptType::Legacy);

        assert!(matches!(
            wallet.derive_address(2, false).unwrap_err(),
            Error::IndexOutOfRange(_)
        ));
        assert!(matches!(
            wallet.derive_address(0, true).unwrap_err(),
            Error::IndexOutOfRange(_)
        ));
        assert_eq!(wallet.find_address(list[1], 0).unwrap().index, 1);
        assert!(wallet.descriptor().unwrap().is_none());
    }

    #[test]
    fn test_address_list_rejects_garbage_and_empty() {
        let empty: [&str; 0] = [];
        assert!(WatchOnlyWallet::from_addresses(&empty).is_err());
        assert!(WatchOnlyWallet::from_addresses(&["hello"]).is_err());
        assert!(WatchOnlyWallet::from_addresses(&[
            "bc1qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdq",
            "tb1qw508d6qejxtdg4y5r3zarvary0c5xw7kxpjzsx",
        ])
        .is_err());
    }

    #[test]
    fn test_descriptor_views() {
        let wallet = WatchOnlyWallet::from_extended_key(BIP84_ZPUB, None).unwrap();
        let receive = wallet.descriptor().unwrap().unwrap();
        let change = wallet.change_descriptor().unwrap().unwrap();
        assert!(receive.starts_with("wpkh(xpub"));
        assert!(receive.contains("/0/*)#"));
        assert!(change.contains("/1/*)#"));
        // Both views parse back, checksum included
        assert!(ParsedDescriptor::parse(&receive).is_ok());
        assert!(ParsedDescriptor::parse(&change).is_ok());
    }

    #[test]
    fn test_non_ranged_descriptor_single_address() {
        let desc = format!("wpkh({BIP84_ZPUB}/0/0)");
        let wallet = WatchOnlyWallet::from_descriptor(&desc, None).unwrap();
        assert!(!wallet.can_derive());
        assert_eq!(
            wallet.derive_address(0, false).unwrap().address,
            "bc1qcr8te4kr609gcawutmrza0j4xv80jy8z306fyu"
        );
        assert!(matches!(
            wallet.derive_address(1, false).unwrap_err(),
            Error::IndexOutOfRange(_)
        ));
    }

    #[test]
    fn test_non_ranged_descriptor_keeps_fixed_path() {
        let desc = format!("wpkh({BIP84_ZPUB}/0/1)");
        let wallet = WatchOnlyWallet::from_descriptor(&desc, None).unwrap();
        assert!(!wallet.has_change_chain());

        let only = wallet.derive_address(0, false).unwrap();
        assert_eq!(only.address, "bc1qnjg0jd8228aq7egyzacy8cys3knf9xvrerkf9g");
        assert_eq!(only.path, "m/0/1");
        assert!(matches!(
            wallet.derive_address(0, true).unwrap_err(),
            Error::UnsupportedDescriptor(_)
        ));
        assert!(wallet.change_descriptor().is_err());
    }

    #[test]
    fn test_ranged_descriptor_without_chain_step() {
        let desc = format!("wpkh([73c5da0a/84'/0'/0']{BIP84_ZPUB}/5/*)");
        let wallet = WatchOnlyWallet::from_descriptor(&desc, None).unwrap();
        assert!(wallet.can_derive());
        assert!(!wallet.has_change_chain());

        let third = wallet.derive_address(2, false).unwrap();
        assert_eq!(third.path, "m/84'/0'/0'/5/2");
        assert!(wallet.derive_address(0, true).is_err());
    }
}
