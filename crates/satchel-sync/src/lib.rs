//! Wallet sync coordination for the Satchel wallet engine
//!
//! Runs the staging → commit / error cycle for watch-only wallets over a
//! pluggable chain-data provider, with bounded fan-out across wallets,
//! retry gating and stale flagging.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod coordinator;
pub mod error;
pub mod provider;

pub use coordinator::{SyncConfig, SyncCoordinator, SyncOutcome, WalletSyncReport};
pub use error::{Error, Result};
pub use provider::{BalanceSummary, ChainDataProvider};
