//! Bitcoin network parameters and prefix tables
//!
//! This crate provides network-specific constants and the lookup tables
//! used to classify extended public keys and addresses by their textual
//! prefix. Adding a network or a key format is a table edit here.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod network;
pub mod prefixes;
pub mod script_type;

pub use network::{Network, NetworkType};
pub use prefixes::{
    address_prefix, extended_key_prefix, extended_key_prefix_for, AddressPrefix,
    ExtendedKeyPrefix, ADDRESS_PREFIXES, EXTENDED_KEY_PREFIXES,
};
pub use script_type::ScriptType;

/// Error types for parameter operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid network specified
    #[error("Invalid network: {0}")]
    InvalidNetwork(String),

    /// Invalid script type specified
    #[error("Invalid script type: {0}")]
    InvalidScriptType(String),
}

/// Result type for parameter operations
pub type Result<T> = std::result::Result<T, Error>;
