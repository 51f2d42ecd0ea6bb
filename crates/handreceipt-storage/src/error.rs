//! Error types for handreceipt-storage

use handreceipt_core::CustodyError;
use thiserror::Error;

/// Errors that can occur in storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    /// I/O error during storage operations
    #[error("I/O error: {0}")]
    Io(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// Error during serialization
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Error during deserialization
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// A secondary index points at a missing record
    #[error("Corrupt index: {0}")]
    CorruptIndex(String),
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err.to_string())
    }
}

impl StorageError {
    /// Create a new Database error from any redb error
    pub fn database(err: impl std::fmt::Display) -> Self {
        Self::Database(err.to_string())
    }

    /// Create a new Serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization(message.into())
    }

    /// Create a new Deserialization error
    pub fn deserialization(message: impl Into<String>) -> Self {
        Self::Deserialization(message.into())
    }

    /// Create a new CorruptIndex error
    pub fn corrupt_index(message: impl Into<String>) -> Self {
        Self::CorruptIndex(message.into())
    }
}

/// Storage failures surface to engine callers as infrastructure errors.
impl From<StorageError> for CustodyError {
    fn from(err: StorageError) -> Self {
        CustodyError::Storage(err.to_string())
    }
}
