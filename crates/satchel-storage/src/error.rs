//! Error types

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Derivation error from the watch-only layer
    #[error(transparent)]
    Core(#[from] satchel_core::Error),

    /// Migration error
    #[error("Migration error: {0}")]
    Migration(String),

    /// Record written by a newer schema than this build understands
    #[error("Unsupported schema version: {0}")]
    UnsupportedSchema(u32),

    /// Wallet already exists
    #[error("Wallet already exists: {0}")]
    WalletAlreadyExists(String),

    /// Not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Result type
pub type Result<T> = std::result::Result<T, Error>;
