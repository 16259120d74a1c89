//! Error types for notesapp-core

use thiserror::Error;

/// Result type alias using notesapp-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in local storage and configuration operations
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Storage layer refused the operation
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(String),
}
