//! Extended public key parsing and prefix normalization
//!
//! SLIP-132 prefixes (`ypub`, `zpub`, `upub`, `vpub`) encode the intended
//! script type in the version bytes. BIP32 parsing only understands the
//! standard `xpub`/`tpub` versions, so non-standard keys are re-encoded
//! with the standard version before parsing. Only the first four payload
//! bytes change.

use crate::{Error, Result};
use bitcoin::bip32::{Fingerprint, Xpub};
use satchel_params::{extended_key_prefix, extended_key_prefix_for, ExtendedKeyPrefix, NetworkType, ScriptType};
use std::str::FromStr;

/// Length of a serialized BIP32 node
const BIP32_PAYLOAD_LEN: usize = 78;

/// Detect the version prefix of an extended public key
pub fn detect_prefix(key: &str) -> Result<&'static ExtendedKeyPrefix> {
    let key = key.trim();
    let head = key.get(..4).unwrap_or(key);
    if head.ends_with("prv") {
        return Err(Error::InvalidKey(
            "extended private keys are not accepted by a watch-only wallet".to_string(),
        ));
    }
    extended_key_prefix(key).ok_or_else(|| Error::UnknownPrefix(head.to_string()))
}

/// Re-encode an extended key with another version prefix.
///
/// The Base58Check payload after the version bytes is left untouched.
pub fn convert_prefix(key: &str, target: &ExtendedKeyPrefix) -> Result<String> {
    let key = key.trim();
    let source = detect_prefix(key)?;

    let mut payload = bs58::decode(key)
        .with_check(None)
        .into_vec()
        .map_err(|e| Error::InvalidKey(format!("Base58Check decode failed: {e}")))?;

    if payload.len() != BIP32_PAYLOAD_LEN {
        return Err(Error::InvalidKey(format!(
            "expected {} payload bytes, got {}",
            BIP32_PAYLOAD_LEN,
            payload.len()
        )));
    }
    if payload[..4] != source.version {
        return Err(Error::InvalidKey(format!(
            "version bytes do not match the '{}' prefix",
            source.prefix
        )));
    }
    if source.prefix == target.prefix {
        return Ok(key.to_string());
    }

    payload[..4].copy_from_slice(&target.version);
    Ok(bs58::encode(payload).with_check().into_string())
}

/// Convert any supported extended public key to the standard `xpub`/`tpub` form
pub fn to_standard(key: &str) -> Result<String> {
    let prefix = detect_prefix(key)?;
    let standard = extended_key_prefix_for(prefix.network, ScriptType::Legacy);
    convert_prefix(key, standard)
}

/// Parsed extended public key with its network and script type
#[derive(Debug, Clone)]
pub struct ExtendedPubKey {
    xpub: Xpub,
    network: NetworkType,
    script_type: ScriptType,
    prefix: &'static ExtendedKeyPrefix,
}

impl ExtendedPubKey {
    /// Parse an extended public key, taking network and script type from its prefix
    pub fn parse(key: &str) -> Result<Self> {
        Self::parse_for_network(key, None)
    }

    /// Parse an extended public key for a specific network.
    ///
    /// Test networks share key versions, so `network` disambiguates
    /// testnet/signet/regtest. A mainnet key on a test network (or the
    /// reverse) is rejected.
    pub fn parse_for_network(key: &str, network: Option<NetworkType>) -> Result<Self> {
        let prefix = detect_prefix(key)?;
        if let Some(requested) = network {
            if requested.is_test() != prefix.network.is_test() {
                return Err(Error::NetworkMismatch(format!(
                    "'{}' key cannot be used on {}",
                    prefix.prefix, requested
                )));
            }
        }

        let normalized = to_standard(key)?;
        let xpub = Xpub::from_str(&normalized)
            .map_err(|e| Error::InvalidKey(format!("BIP32 parse failed: {e}")))?;

        tracing::debug!(
            "Parsed extended key: prefix={}, depth={}, network={}",
            prefix.prefix,
            xpub.depth,
            network.unwrap_or(prefix.network)
        );

        Ok(Self {
            xpub,
            network: network.unwrap_or(prefix.network),
            script_type: prefix.script_type,
            prefix,
        })
    }

    /// Override the script type (descriptors state it explicitly)
    pub fn with_script_type(mut self, script_type: ScriptType) -> Self {
        self.script_type = script_type;
        self
    }

    /// Underlying BIP32 node
    pub fn xpub(&self) -> &Xpub {
        &self.xpub
    }

    /// Network
    pub fn network(&self) -> NetworkType {
        self.network
    }

    /// Script type
    pub fn script_type(&self) -> ScriptType {
        self.script_type
    }

    /// Prefix the key was supplied with
    pub fn prefix(&self) -> &'static ExtendedKeyPrefix {
        self.prefix
    }

    /// Standard `xpub`/`tpub` encoding
    pub fn standard(&self) -> String {
        self.xpub.to_string()
    }

    /// Fingerprint of this node
    pub fn fingerprint(&self) -> Fingerprint {
        self.xpub.fingerprint()
    }
}
