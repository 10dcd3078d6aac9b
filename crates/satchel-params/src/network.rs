//! Bitcoin network definitions

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Network type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkType {
    /// Mainnet
    Mainnet,
    /// Testnet
    Testnet,
    /// Signet
    Signet,
    /// Regtest (local development)
    Regtest,
}

impl NetworkType {
    /// Canonical lowercase name
    pub const fn as_str(&self) -> &'static str {
        match self {
            NetworkType::Mainnet => "mainnet",
            NetworkType::Testnet => "testnet",
            NetworkType::Signet => "signet",
            NetworkType::Regtest => "regtest",
        }
    }

    /// Whether this is a test network (shares testnet key/address versions)
    pub const fn is_test(&self) -> bool {
        !matches!(self, NetworkType::Mainnet)
    }
}

impl fmt::Display for NetworkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NetworkType {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mainnet" | "main" | "bitcoin" => Ok(NetworkType::Mainnet),
            "testnet" | "test" | "testnet3" => Ok(NetworkType::Testnet),
            "signet" => Ok(NetworkType::Signet),
            "regtest" => Ok(NetworkType::Regtest),
            other => Err(crate::Error::InvalidNetwork(other.to_string())),
        }
    }
}

/// Network configuration
#[derive(Debug, Clone)]
pub struct Network {
    /// Network type
    pub network_type: NetworkType,
    /// Human-readable name
    pub name: &'static str,
    /// Coin type (BIP-44)
    pub coin_type: u32,
    /// Bech32 human-readable part for segwit addresses
    pub bech32_hrp: &'static str,
    /// Base58 version byte for P2PKH addresses
    pub p2pkh_version: u8,
    /// Base58 version byte for P2SH addresses
    pub p2sh_version: u8,
    /// Standard BIP32 public version bytes (`xpub` / `tpub`)
    pub bip32_public_version: [u8; 4],
}

impl Network {
    /// Get mainnet parameters
    pub const fn mainnet() -> Self {
        Self {
            network_type: NetworkType::Mainnet,
            name: "mainnet",
            coin_type: 0,
            bech32_hrp: "bc",
            p2pkh_version: 0x00,
            p2sh_version: 0x05,
            bip32_public_version: [0x04, 0x88, 0xB2, 0x1E],
        }
    }

    /// Get testnet parameters
    pub const fn testnet() -> Self {
        Self {
            network_type: NetworkType::Testnet,
            name: "testnet",
            coin_type: 1,
            bech32_hrp: "tb",
            p2pkh_version: 0x6F,
            p2sh_version: 0xC4,
            bip32_public_version: [0x04, 0x35, 0x87, 0xCF],
        }
    }

    /// Get signet parameters
    pub const fn signet() -> Self {
        Self {
            network_type: NetworkType::Signet,
            name: "signet",
            ..Self::testnet()
        }
    }

    /// Get regtest parameters
    pub const fn regtest() -> Self {
        Self {
            network_type: NetworkType::Regtest,
            name: "regtest",
            bech32_hrp: "bcrt",
            ..Self::testnet()
        }
    }

    /// Get network by type
    pub const fn from_type(network_type: NetworkType) -> Self {
        match network_type {
            NetworkType::Mainnet => Self::mainnet(),
            NetworkType::Testnet => Self::testnet(),
            NetworkType::Signet => Self::signet(),
            NetworkType::Regtest => Self::regtest(),
        }
    }
}
