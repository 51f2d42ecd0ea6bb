//! # HandReceipt Core
//!
//! Custody transfer and attachment consistency engine.
//!
//! Tracks which user holds each piece of hand-receipted property, lets
//! holders mount components on attachable parents, and moves custody
//! between users through an approval state machine. Ownership and
//! attachment state are always mutated together inside one store
//! transaction, and every committed transition is written to a durable
//! outbox for the audit ledger.
//!
//! ## Components
//!
//! - [`AttachmentGraphManager`]: the parent/component relation and its invariants
//! - [`QrCredentialVerifier`]: issues and checks point-in-time QR credentials
//! - [`TransferWorkflowEngine`]: the Pending → Approved/Rejected/Cancelled machine
//! - [`ConsistencyCoordinator`]: applies an approval to holders and edges atomically
//! - [`CustodyEngine`]: facade that runs each operation as one unit of work
//!
//! ## Storage
//!
//! [`CustodyStore`] abstracts the transactional backend. [`InMemoryCustodyStore`]
//! is provided here; a durable redb store lives in `handreceipt-storage`.

pub mod attachment;
pub mod coordinator;
pub mod credential;
pub mod engine;
pub mod error;
pub mod event;
pub mod notify;
pub mod property;
pub mod store;
pub mod transfer;

pub use attachment::{AttachRequest, AttachmentEdge, AttachmentGraphManager, AttachmentKind};
pub use coordinator::{CommittedResult, ConsistencyCoordinator};
pub use credential::{CredentialKey, QrCredential, QrCredentialVerifier, VerifiedCredential};
pub use engine::{CustodyEngine, EngineConfig};
pub use error::{CustodyError, ErrorKind, Result};
pub use event::{DetachReason, EntityRef, LedgerEvent, LedgerEventKind, OutboxEntry};
pub use notify::{BroadcastNotifier, NoopNotifier, TransitionNotifier};
pub use property::*;
pub use store::{CustodyStore, InMemoryCustodyStore, StoreRead, StoreTxn, UnitOfWork};
pub use transfer::{
    InitiationMethod, NewTransfer, TransferDraft, TransferRequest, TransferStatus,
    TransferSubject, TransferWorkflowEngine,
};
