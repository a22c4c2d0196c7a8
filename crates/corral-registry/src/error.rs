//! Registry error types

use thiserror::Error;

/// Registry errors
#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Registry unavailable")]
    Unavailable,
}

/// Result type for registry operations
pub type Result<T> = std::result::Result<T, RegistryError>;
