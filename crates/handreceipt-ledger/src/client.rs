//! The external ledger seam.

use std::fmt;

use async_trait::async_trait;
use handreceipt_core::{EntityRef, LedgerEvent};
use serde::{Deserialize, Serialize};

use crate::error::LedgerError;

/// Identifier the ledger assigns to an appended event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LedgerEventId(pub u64);

impl fmt::Display for LedgerEventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ledger#{}", self.0)
    }
}

/// An appended event as the ledger reports it back.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerRecord {
    pub id: LedgerEventId,
    /// Outbox sequence the event was appended under.
    pub idempotency_key: u64,
    pub event: LedgerEvent,
    /// Hex BLAKE3 digest chaining this record to its predecessor.
    pub hash: String,
    pub prev_hash: String,
}

/// An append-only audit ledger.
///
/// Implementations must treat `idempotency_key` as the identity of the
/// append: appending the same key twice returns the first id and records
/// nothing new.
#[async_trait]
pub trait LedgerClient: Send + Sync + 'static {
    async fn append(
        &self,
        idempotency_key: u64,
        event: &LedgerEvent,
    ) -> Result<LedgerEventId, LedgerError>;

    /// Events concerning `entity`, in append order.
    async fn history(&self, entity: EntityRef) -> Result<Vec<LedgerRecord>, LedgerError>;
}
