//! Watch-only key derivation for the Satchel wallet engine
//!
//! Parses extended public keys and output descriptors, normalizes
//! SLIP-132 version prefixes, and derives the address inventory a wallet
//! record persists. Nothing in this crate handles private key material.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod address;
pub mod descriptor;
pub mod error;
pub mod inventory;
pub mod watch_only;
pub mod xpub;

pub use address::{
    address_for_pubkey, bitcoin_network, classify_address, parse_address, scripthash, AddressInfo,
};
pub use descriptor::{descriptor_checksum, KeyOrigin, ParsedDescriptor};
pub use error::{Error, ErrorCategory, Result};
pub use inventory::{build_inventory, IndexCounters, ScriptInventory, DEFAULT_GAP_LIMIT};
pub use satchel_params::{NetworkType, ScriptType};
pub use watch_only::{WatchOnlyCapabilities, WatchOnlySource, WatchOnlyWallet};
pub use xpub::{convert_prefix, detect_prefix, to_standard, ExtendedPubKey};
