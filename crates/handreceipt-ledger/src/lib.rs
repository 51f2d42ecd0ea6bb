//! # Handreceipt Ledger
//!
//! Forwards committed custody transitions to an append-only audit ledger.
//!
//! The engine writes every event to its store's outbox inside the domain
//! transaction. [`AuditLedgerRecorder`] drains that outbox afterwards, so a
//! ledger outage delays the audit trail but never blocks or rolls back a
//! custody change, and a ledger record never exists without the change it
//! describes.
//!
//! ## Example
//!
//! ```ignore
//! let ledger = Arc::new(InMemoryLedger::new());
//! let recorder = Arc::new(AuditLedgerRecorder::new(store.clone(), ledger, RecorderConfig::default()));
//! let engine = CustodyEngine::new(store, key, EngineConfig::default())
//!     .with_notifier(Arc::new(recorder.handle()));
//! recorder.clone().spawn(shutdown_rx);
//! ```

pub mod client;
pub mod error;
pub mod memory;
pub mod recorder;

pub use client::{LedgerClient, LedgerEventId, LedgerRecord};
pub use error::LedgerError;
pub use memory::{GENESIS_HASH, InMemoryLedger};
pub use recorder::{
    AuditLedgerRecorder, DEFAULT_BATCH_SIZE, DEFAULT_RETRY_INTERVAL, FlushReport, RecordOutcome,
    RecorderConfig, RecorderHandle, RecorderTask,
};
