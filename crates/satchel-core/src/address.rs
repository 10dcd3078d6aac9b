//! Address construction and classification

use crate::{Error, Result};
use bitcoin::address::NetworkUnchecked;
use bitcoin::key::CompressedPublicKey;
use bitcoin::secp256k1::{PublicKey, Secp256k1, Verification};
use bitcoin::Address;
use satchel_params::{address_prefix, NetworkType, ScriptType};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::str::FromStr;

/// A derived (or imported) wallet address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressInfo {
    /// Encoded address
    pub address: String,
    /// Derivation path (synthetic for imported address lists)
    pub path: String,
    /// Child index on its chain
    pub index: u32,
    /// Whether the address is on the internal (change) chain
    pub is_change: bool,
    /// Script type
    pub script_type: ScriptType,
}

/// Map to the `bitcoin` crate network
pub fn bitcoin_network(network: NetworkType) -> bitcoin::Network {
    match network {
        NetworkType::Mainnet => bitcoin::Network::Bitcoin,
        NetworkType::Testnet => bitcoin::Network::Testnet,
        NetworkType::Signet => bitcoin::Network::Signet,
        NetworkType::Regtest => bitcoin::Network::Regtest,
    }
}

/// Build the address paying to `pubkey` for a script type.
///
/// Taproot commits to the x-only key with no script tree; wrapped segwit
/// nests a P2WPKH redeem script inside P2SH.
pub fn address_for_pubkey<C: Verification>(
    secp: &Secp256k1<C>,
    pubkey: &PublicKey,
    script_type: ScriptType,
    network: NetworkType,
) -> Address {
    let network = bitcoin_network(network);
    let compressed = CompressedPublicKey(*pubkey);
    match script_type {
        ScriptType::Taproot => {
            let (x_only, _parity) = pubkey.x_only_public_key();
            Address::p2tr(secp, x_only, None, network)
        }
        ScriptType::NativeSegwit => Address::p2wpkh(&compressed, network),
        ScriptType::WrappedSegwit => Address::p2shwpkh(&compressed, network),
        ScriptType::Legacy => Address::p2pkh(compressed.pubkey_hash(), network),
    }
}

/// Guess network and script type from an address prefix
pub fn classify_address(address: &str) -> Result<(NetworkType, ScriptType)> {
    address_prefix(address)
        .map(|entry| (entry.network, entry.script_type))
        .ok_or_else(|| Error::InvalidAddress(format!("unrecognized address prefix: {address}")))
}

/// Parse an address and check it belongs to `network`
pub fn parse_address(address: &str, network: NetworkType) -> Result<Address> {
    let unchecked = Address::<NetworkUnchecked>::from_str(address.trim())
        .map_err(|e| Error::InvalidAddress(format!("{address}: {e}")))?;
    unchecked
        .require_network(bitcoin_network(network))
        .map_err(|e| Error::NetworkMismatch(format!("{address}: {e}")))
}

/// Electrum-style scripthash: SHA-256 of the output script, byte-reversed, hex
pub fn scripthash(address: &str, network: NetworkType) -> Result<String> {
    let script = parse_address(address, network)?.script_pubkey();
    let mut digest: [u8; 32] = Sha256::digest(script.as_bytes()).into();
    digest.reverse();
    Ok(hex::encode(digest))
}
