//! Error types for handreceipt-ledger

use handreceipt_core::CustodyError;
use thiserror::Error;

use crate::client::LedgerEventId;

/// Errors raised while forwarding events to the ledger
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// The ledger could not be reached; the append may be retried
    #[error("ledger unavailable: {0}")]
    Unavailable(String),

    /// The ledger refused the event
    #[error("ledger rejected event {key}: {reason}")]
    Rejected { key: u64, reason: String },

    /// Event could not be encoded for hashing
    #[error("encoding error: {0}")]
    Encoding(String),

    /// A record's hash no longer matches its content or predecessor
    #[error("hash chain broken at {0}")]
    ChainBroken(LedgerEventId),

    /// The custody store failed while reading or acknowledging the outbox
    #[error(transparent)]
    Store(#[from] CustodyError),
}

impl LedgerError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }
}
