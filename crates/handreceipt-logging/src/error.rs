//! Error types for handreceipt-logging

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LogError {
    /// Log directory or file could not be created
    #[error("I/O error: {0}")]
    Io(String),

    /// The level or RUST_LOG directive did not parse
    #[error("invalid log filter: {0}")]
    Filter(String),

    /// A global subscriber is already installed
    #[error("failed to install subscriber: {0}")]
    Init(String),
}

impl From<std::io::Error> for LogError {
    fn from(err: std::io::Error) -> Self {
        LogError::Io(err.to_string())
    }
}
