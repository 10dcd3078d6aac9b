//! Error types for Satchel Core
//!
//! Key, descriptor and address errors are raised synchronously to the
//! caller; a watch-only wallet is never partially constructed.

use std::fmt;

/// Result type
pub type Result<T> = std::result::Result<T, Error>;

/// Satchel Core errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Extended key prefix not in the version table
    #[error("Unknown extended key prefix: {0}")]
    UnknownPrefix(String),

    /// Invalid key
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Malformed descriptor
    #[error("Invalid descriptor: {0}")]
    InvalidDescriptor(String),

    /// Well-formed descriptor this engine does not derive from
    #[error("Unsupported descriptor: {0}")]
    UnsupportedDescriptor(String),

    /// Invalid address format
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Index beyond what the wallet can produce
    #[error("Index out of range: {0}")]
    IndexOutOfRange(String),

    /// Key derivation error
    #[error("Key derivation error: {0}")]
    KeyDerivation(String),

    /// Network mismatch between inputs
    #[error("Network mismatch: {0}")]
    NetworkMismatch(String),
}

impl Error {
    /// Check if error was caused by user input (vs internal error)
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Error::UnknownPrefix(_)
                | Error::InvalidKey(_)
                | Error::InvalidDescriptor(_)
                | Error::UnsupportedDescriptor(_)
                | Error::InvalidAddress(_)
                | Error::NetworkMismatch(_)
        )
    }

    /// Get error category for logging
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::UnknownPrefix(_) | Error::InvalidKey(_) | Error::KeyDerivation(_) => {
                ErrorCategory::Keys
            }
            Error::InvalidDescriptor(_) | Error::UnsupportedDescriptor(_) => {
                ErrorCategory::Descriptor
            }
            Error::InvalidAddress(_) | Error::IndexOutOfRange(_) => ErrorCategory::Address,
            Error::NetworkMismatch(_) => ErrorCategory::Network,
        }
    }
}

impl From<bitcoin::bip32::Error> for Error {
    fn from(e: bitcoin::bip32::Error) -> Self {
        Error::KeyDerivation(e.to_string())
    }
}

/// Error categories for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Key-related errors
    Keys,
    /// Descriptor-related errors
    Descriptor,
    /// Address-related errors
    Address,
    /// Network-related errors
    Network,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Keys => write!(f, "Keys"),
            ErrorCategory::Descriptor => write!(f, "Descriptor"),
            ErrorCategory::Address => write!(f, "Address"),
            ErrorCategory::Network => write!(f, "Network"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_error_detection() {
        assert!(Error::UnknownPrefix("Ypub".to_string()).is_user_error());
        assert!(Error::InvalidDescriptor("test".to_string()).is_user_error());
        assert!(!Error::KeyDerivation("test".to_string()).is_user_error());
        assert!(!Error::IndexOutOfRange("test".to_string()).is_user_error());
    }

    #[test]
    fn test_error_categories() {
        assert_eq!(
            Error::UnknownPrefix("test".to_string()).category(),
            ErrorCategory::Keys
        );
        assert_eq!(
            Error::UnsupportedDescriptor("test".to_string()).category(),
            ErrorCategory::Descriptor
        );
        assert_eq!(
            Error::IndexOutOfRange("test".to_string()).category(),
            ErrorCategory::Address
        );
    }

    #[test]
    fn test_category_display() {
        assert_eq!(ErrorCategory::Keys.to_string(), "Keys");
        assert_eq!(ErrorCategory::Descriptor.to_string(), "Descriptor");
    }
}
