//! In-process hash-chained ledger.
//!
//! Each record's hash covers the previous record's hash, the idempotency key
//! and the postcard encoding of the event, so rewriting any past record is
//! detectable by [`InMemoryLedger::verify_chain`].

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use handreceipt_core::{EntityRef, LedgerEvent};
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::client::{LedgerClient, LedgerEventId, LedgerRecord};
use crate::error::LedgerError;

/// Hash the first record chains from.
pub const GENESIS_HASH: [u8; 32] = [0u8; 32];

#[derive(Default)]
struct Inner {
    records: Vec<LedgerRecord>,
    by_key: HashMap<u64, LedgerEventId>,
    available: bool,
    rejected_keys: HashSet<u64>,
}

pub struct InMemoryLedger {
    inner: Mutex<Inner>,
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                available: true,
                ..Default::default()
            }),
        }
    }

    /// Simulates an outage; appends fail with `Unavailable` while false.
    pub fn set_available(&self, available: bool) {
        self.inner.lock().available = available;
    }

    /// Makes appends under `key` fail with `Rejected` until cleared.
    pub fn reject_key(&self, key: u64) {
        self.inner.lock().rejected_keys.insert(key);
    }

    pub fn clear_rejections(&self) {
        self.inner.lock().rejected_keys.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every record in append order.
    pub fn records(&self) -> Vec<LedgerRecord> {
        self.inner.lock().records.clone()
    }

    /// Recomputes every hash and checks each link to its predecessor.
    pub fn verify_chain(&self) -> Result<(), LedgerError> {
        let inner = self.inner.lock();
        let mut prev = GENESIS_HASH;
        for record in &inner.records {
            let expected = chain_hash(&prev, record.idempotency_key, &record.event)?;
            if record.prev_hash != hex::encode(prev) || record.hash != hex::encode(expected) {
                return Err(LedgerError::ChainBroken(record.id));
            }
            prev = expected;
        }
        Ok(())
    }
}

fn chain_hash(prev: &[u8; 32], key: u64, event: &LedgerEvent) -> Result<[u8; 32], LedgerError> {
    let encoded = postcard::to_allocvec(event).map_err(|e| LedgerError::Encoding(e.to_string()))?;
    let mut hasher = blake3::Hasher::new();
    hasher.update(prev);
    hasher.update(&key.to_be_bytes());
    hasher.update(&encoded);
    Ok(*hasher.finalize().as_bytes())
}

fn decode_hash(hash: &str) -> Result<[u8; 32], LedgerError> {
    let bytes = hex::decode(hash).map_err(|e| LedgerError::Encoding(e.to_string()))?;
    bytes
        .try_into()
        .map_err(|_| LedgerError::Encoding("hash must be 32 bytes".to_string()))
}

#[async_trait]
impl LedgerClient for InMemoryLedger {
    async fn append(
        &self,
        idempotency_key: u64,
        event: &LedgerEvent,
    ) -> Result<LedgerEventId, LedgerError> {
        let mut inner = self.inner.lock();
        if !inner.available {
            return Err(LedgerError::unavailable("in-memory ledger offline"));
        }
        if inner.rejected_keys.contains(&idempotency_key) {
            return Err(LedgerError::Rejected {
                key: idempotency_key,
                reason: "rejected by fault injection".to_string(),
            });
        }
        if let Some(id) = inner.by_key.get(&idempotency_key) {
            trace!(key = idempotency_key, id = %id, "duplicate append ignored");
            return Ok(*id);
        }

        let prev = match inner.records.last() {
            Some(last) => decode_hash(&last.hash)?,
            None => GENESIS_HASH,
        };
        let hash = chain_hash(&prev, idempotency_key, event)?;
        let id = LedgerEventId(inner.records.len() as u64 + 1);
        inner.records.push(LedgerRecord {
            id,
            idempotency_key,
            event: event.clone(),
            hash: hex::encode(hash),
            prev_hash: hex::encode(prev),
        });
        inner.by_key.insert(idempotency_key, id);
        debug!(id = %id, key = idempotency_key, event = event.name(), "ledger append");
        Ok(id)
    }

    async fn history(&self, entity: EntityRef) -> Result<Vec<LedgerRecord>, LedgerError> {
        let inner = self.inner.lock();
        Ok(inner
            .records
            .iter()
            .filter(|r| r.event.concerns(entity))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use handreceipt_core::{LedgerEventKind, PropertyId, UserId};

    fn retired(id: u64) -> LedgerEvent {
        LedgerEvent::new(
            LedgerEventKind::PropertyRetired {
                property: PropertyId(id),
            },
            UserId(1),
            1_000,
        )
    }

    #[tokio::test]
    async fn test_append_chains_records() {
        let ledger = InMemoryLedger::new();
        let first = ledger.append(1, &retired(1)).await.unwrap();
        let second = ledger.append(2, &retired(2)).await.unwrap();
        assert_eq!(first, LedgerEventId(1));
        assert_eq!(second, LedgerEventId(2));

        let records = ledger.records();
        assert_eq!(records[0].prev_hash, hex::encode(GENESIS_HASH));
        assert_eq!(records[1].prev_hash, records[0].hash);
        ledger.verify_chain().unwrap();
    }

    #[tokio::test]
    async fn test_same_key_appends_once() {
        let ledger = InMemoryLedger::new();
        let first = ledger.append(7, &retired(1)).await.unwrap();
        let again = ledger.append(7, &retired(1)).await.unwrap();
        assert_eq!(first, again);
        assert_eq!(ledger.len(), 1);
    }

    #[tokio::test]
    async fn test_tampering_breaks_chain() {
        let ledger = InMemoryLedger::new();
        ledger.append(1, &retired(1)).await.unwrap();
        ledger.append(2, &retired(2)).await.unwrap();
        ledger.append(3, &retired(3)).await.unwrap();

        ledger.inner.lock().records[1].event = retired(99);
        assert_eq!(
            ledger.verify_chain().unwrap_err(),
            LedgerError::ChainBroken(LedgerEventId(2))
        );
    }

    #[tokio::test]
    async fn test_outage_and_rejection() {
        let ledger = InMemoryLedger::new();
        ledger.set_available(false);
        assert!(matches!(
            ledger.append(1, &retired(1)).await,
            Err(LedgerError::Unavailable(_))
        ));

        ledger.set_available(true);
        ledger.reject_key(1);
        assert!(matches!(
            ledger.append(1, &retired(1)).await,
            Err(LedgerError::Rejected { key: 1, .. })
        ));
        assert!(ledger.is_empty());

        ledger.clear_rejections();
        ledger.append(1, &retired(1)).await.unwrap();
        assert_eq!(ledger.len(), 1);
    }

    #[tokio::test]
    async fn test_history_filters_by_entity() {
        let ledger = InMemoryLedger::new();
        ledger.append(1, &retired(1)).await.unwrap();
        ledger.append(2, &retired(2)).await.unwrap();
        ledger.append(3, &retired(1)).await.unwrap();

        let history = ledger
            .history(EntityRef::Property(PropertyId(1)))
            .await
            .unwrap();
        let keys: Vec<_> = history.iter().map(|r| r.idempotency_key).collect();
        assert_eq!(keys, vec![1, 3]);
    }
}
