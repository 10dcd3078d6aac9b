//! Prefix lookup tables
//!
//! Extended public keys and addresses carry their network and intended
//! script type in a textual prefix by convention. Classification is a
//! table lookup, never inline string matching.

use crate::{NetworkType, ScriptType};

/// Extended public key version prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtendedKeyPrefix {
    /// Four-character textual prefix (`xpub`, `zpub`, ...)
    pub prefix: &'static str,
    /// Network the prefix belongs to
    pub network: NetworkType,
    /// Script type the prefix implies
    pub script_type: ScriptType,
    /// Serialized version bytes
    pub version: [u8; 4],
}

impl ExtendedKeyPrefix {
    /// Whether this is the standard BIP32 prefix (`xpub` / `tpub`)
    pub fn is_standard(&self) -> bool {
        self.prefix == "xpub" || self.prefix == "tpub"
    }
}

/// Known extended public key prefixes.
///
/// Test networks share the testnet prefixes; the table lists them under
/// `Testnet`.
pub const EXTENDED_KEY_PREFIXES: &[ExtendedKeyPrefix] = &[
    ExtendedKeyPrefix {
        prefix: "xpub",
        network: NetworkType::Mainnet,
        script_type: ScriptType::Legacy,
        version: [0x04, 0x88, 0xB2, 0x1E],
    },
    ExtendedKeyPrefix {
        prefix: "ypub",
        network: NetworkType::Mainnet,
        script_type: ScriptType::WrappedSegwit,
        version: [0x04, 0x9D, 0x7C, 0xB2],
    },
    ExtendedKeyPrefix {
        prefix: "zpub",
        network: NetworkType::Mainnet,
        script_type: ScriptType::NativeSegwit,
        version: [0x04, 0xB2, 0x47, 0x46],
    },
    ExtendedKeyPrefix {
        prefix: "tpub",
        network: NetworkType::Testnet,
        script_type: ScriptType::Legacy,
        version: [0x04, 0x35, 0x87, 0xCF],
    },
    ExtendedKeyPrefix {
        prefix: "upub",
        network: NetworkType::Testnet,
        script_type: ScriptType::WrappedSegwit,
        version: [0x04, 0x4A, 0x52, 0x62],
    },
    ExtendedKeyPrefix {
        prefix: "vpub",
        network: NetworkType::Testnet,
        script_type: ScriptType::NativeSegwit,
        version: [0x04, 0x5F, 0x1C, 0xF6],
    },
];

/// Look up an extended key by its leading four characters
pub fn extended_key_prefix(key: &str) -> Option<&'static ExtendedKeyPrefix> {
    let head = key.trim().get(..4)?;
    EXTENDED_KEY_PREFIXES.iter().find(|p| p.prefix == head)
}

/// Look up the prefix used for a network and script type.
///
/// Taproot has no SLIP-132 prefix; it uses the standard one.
pub fn extended_key_prefix_for(
    network: NetworkType,
    script_type: ScriptType,
) -> &'static ExtendedKeyPrefix {
    let table_network = if network.is_test() {
        NetworkType::Testnet
    } else {
        NetworkType::Mainnet
    };
    EXTENDED_KEY_PREFIXES
        .iter()
        .find(|p| p.network == table_network && p.script_type == script_type)
        .unwrap_or_else(|| standard_prefix(table_network))
}

fn standard_prefix(network: NetworkType) -> &'static ExtendedKeyPrefix {
    // Both standard entries are in the table.
    if network.is_test() {
        &EXTENDED_KEY_PREFIXES[3]
    } else {
        &EXTENDED_KEY_PREFIXES[0]
    }
}

/// Address prefix classification entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressPrefix {
    /// Leading characters (matched case-insensitively for bech32)
    pub prefix: &'static str,
    /// Network the prefix belongs to
    pub network: NetworkType,
    /// Script type the prefix implies
    pub script_type: ScriptType,
}

/// Known address prefixes, longest first so the first match wins.
pub const ADDRESS_PREFIXES: &[AddressPrefix] = &[
    AddressPrefix { prefix: "bcrt1p", network: NetworkType::Regtest, script_type: ScriptType::Taproot },
    AddressPrefix { prefix: "bcrt1q", network: NetworkType::Regtest, script_type: ScriptType::NativeSegwit },
    AddressPrefix { prefix: "bc1p", network: NetworkType::Mainnet, script_type: ScriptType::Taproot },
    AddressPrefix { prefix: "bc1q", network: NetworkType::Mainnet, script_type: ScriptType::NativeSegwit },
    AddressPrefix { prefix: "tb1p", network: NetworkType::Testnet, script_type: ScriptType::Taproot },
    AddressPrefix { prefix: "tb1q", network: NetworkType::Testnet, script_type: ScriptType::NativeSegwit },
    AddressPrefix { prefix: "1", network: NetworkType::Mainnet, script_type: ScriptType::Legacy },
    AddressPrefix { prefix: "3", network: NetworkType::Mainnet, script_type: ScriptType::WrappedSegwit },
    AddressPrefix { prefix: "m", network: NetworkType::Testnet, script_type: ScriptType::Legacy },
    AddressPrefix { prefix: "n", network: NetworkType::Testnet, script_type: ScriptType::Legacy },
    AddressPrefix { prefix: "2", network: NetworkType::Testnet, script_type: ScriptType::WrappedSegwit },
];

/// Classify an address by its prefix
pub fn address_prefix(address: &str) -> Option<&'static AddressPrefix> {
    let address = address.trim();
    ADDRESS_PREFIXES.iter().find(|p| {
        address
            .get(..p.prefix.len())
            .map(|head| head.eq_ignore_ascii_case(p.prefix))
            .unwrap_or(false)
    })
}
