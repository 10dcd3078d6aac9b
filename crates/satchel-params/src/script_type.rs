//! Output script types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Single-key output script type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptType {
    /// P2PKH
    Legacy,
    /// P2SH-P2WPKH
    WrappedSegwit,
    /// P2WPKH
    NativeSegwit,
    /// P2TR (key path only)
    Taproot,
}

impl ScriptType {
    /// All script types, in BIP purpose order
    pub const ALL: [ScriptType; 4] = [
        ScriptType::Legacy,
        ScriptType::WrappedSegwit,
        ScriptType::NativeSegwit,
        ScriptType::Taproot,
    ];

    /// BIP-43 purpose used for the synthetic derivation path
    pub const fn purpose(&self) -> u32 {
        match self {
            ScriptType::Legacy => 44,
            ScriptType::WrappedSegwit => 49,
            ScriptType::NativeSegwit => 84,
            ScriptType::Taproot => 86,
        }
    }

    /// Descriptor wrapper for this script type, without the key expression
    pub const fn descriptor_wrapper(&self) -> (&'static str, &'static str) {
        match self {
            ScriptType::Legacy => ("pkh(", ")"),
            ScriptType::WrappedSegwit => ("sh(wpkh(", "))"),
            ScriptType::NativeSegwit => ("wpkh(", ")"),
            ScriptType::Taproot => ("tr(", ")"),
        }
    }

    /// Canonical snake_case name
    pub const fn as_str(&self) -> &'static str {
        match self {
            ScriptType::Legacy => "legacy",
            ScriptType::WrappedSegwit => "wrapped_segwit",
            ScriptType::NativeSegwit => "native_segwit",
            ScriptType::Taproot => "taproot",
        }
    }
}

impl fmt::Display for ScriptType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScriptType {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "legacy" | "p2pkh" => Ok(ScriptType::Legacy),
            "wrapped_segwit" | "p2sh-p2wpkh" | "p2sh_p2wpkh" => Ok(ScriptType::WrappedSegwit),
            "native_segwit" | "p2wpkh" => Ok(ScriptType::NativeSegwit),
            "taproot" | "p2tr" => Ok(ScriptType::Taproot),
            other => Err(crate::Error::InvalidScriptType(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_purpose() {
        assert_eq!(ScriptType::Legacy.purpose(), 44);
        assert_eq!(ScriptType::WrappedSegwit.purpose(), 49);
        assert_eq!(ScriptType::NativeSegwit.purpose(), 84);
        assert_eq!(ScriptType::Taproot.purpose(), 86);
    }

    #[test]
    fn test_round_trip_names() {
        for ty in ScriptType::ALL {
            assert_eq!(ty.as_str().parse::<ScriptType>().unwrap(), ty);
            let json = serde_json::to_string(&ty).unwrap();
            assert_eq!(json, format!("\"{}\"", ty.as_str()));
        }
    }
}
