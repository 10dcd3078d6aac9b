//! Store configuration

use directories::ProjectDirs;
use satchel_core::DEFAULT_GAP_LIMIT;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable overriding the data directory
pub const DATA_DIR_ENV: &str = "SATCHEL_DATA_DIR";

/// Record store configuration
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Root data directory
    pub data_dir: PathBuf,
    /// Temp files younger than this survive the orphan sweep
    pub temp_grace: Duration,
    /// Gap limit for newly built inventories
    pub default_gap_limit: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        let data_dir = ProjectDirs::from("org", "Satchel", "Satchel")
            .map(|dirs| dirs.data_local_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from(".satchel"));
        Self {
            data_dir,
            temp_grace: Duration::from_secs(60),
            default_gap_limit: DEFAULT_GAP_LIMIT,
        }
    }
}

impl StoreConfig {
    /// Defaults, with `SATCHEL_DATA_DIR` taking precedence for the data directory
    pub fn from_env() -> Self {
        let config = Self::default();
        match env::var(DATA_DIR_ENV) {
            Ok(dir) if !dir.trim().is_empty() => config.with_data_dir(dir),
            _ => config,
        }
    }

    /// Set the data directory
    pub fn with_data_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.data_dir = dir.as_ref().to_path_buf();
        self
    }

    /// Set the temp-file grace window
    pub fn with_temp_grace(mut self, grace: Duration) -> Self {
        self.temp_grace = grace;
        self
    }

    /// Set the default gap limit
    pub fn with_default_gap_limit(mut self, gap_limit: u32) -> Self {
        self.default_gap_limit = gap_limit;
        self
    }

    /// Directory holding one file per wallet
    pub fn wallet_dir(&self) -> PathBuf {
        self.data_dir.join("wallets")
    }

    /// Relational store path
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("satchel.db")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_and_paths() {
        let config = StoreConfig::default()
            .with_data_dir("/tmp/satchel-test")
            .with_temp_grace(Duration::from_secs(5))
            .with_default_gap_limit(50);
        assert_eq!(config.wallet_dir(), PathBuf::from("/tmp/satchel-test/wallets"));
        assert_eq!(config.database_path(), PathBuf::from("/tmp/satchel-test/satchel.db"));
        assert_eq!(config.temp_grace, Duration::from_secs(5));
        assert_eq!(config.default_gap_limit, 50);
    }

    #[test]
    fn test_defaults() {
        let config = StoreConfig::default();
        assert_eq!(config.default_gap_limit, 20);
        assert!(config.temp_grace > Duration::ZERO);
    }
}
