//! Error types for sync operations

/// Result type
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Chain-data provider failed or returned unusable data
    #[error("Provider error: {0}")]
    Provider(String),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Wallet not found in the record store
    #[error("Wallet not found: {0}")]
    WalletNotFound(String),

    /// Blocking store task panicked or was cancelled
    #[error("Task error: {0}")]
    Task(String),
}

impl From<satchel_storage::Error> for Error {
    fn from(e: satchel_storage::Error) -> Self {
        Error::Storage(format!("{}", e))
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(e: tokio::task::JoinError) -> Self {
        Error::Task(format!("{}", e))
    }
}
