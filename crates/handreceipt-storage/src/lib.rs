//! # HandReceipt Storage
//!
//! Durable [`CustodyStore`](handreceipt_core::CustodyStore) backed by redb.
//!
//! Each engine operation maps onto one redb write transaction. The
//! transaction commits when the operation succeeds and is aborted when it
//! fails, so a rejected operation never leaves partial writes behind.
//!
//! Uniqueness rules live in the table layout:
//!
//! - `edges` is keyed by component id, so a component has at most one edge
//! - `pending_by_subject` is keyed by subject id, so a property has at most
//!   one unresolved transfer request
//! - `serial_index` is keyed by serial number

pub mod error;
pub mod tables;
mod txn;

pub use error::StorageError;
pub use tables::{RedbCustodyStore, RedbStorageConfig};
