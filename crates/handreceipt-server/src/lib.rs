//! # Handreceipt Server
//!
//! The HTTP surface of the custody engine. Handlers are thin: they resolve
//! the acting user from `x-user-id`, call one [`CustodyEngine`] operation and
//! map [`CustodyError`] kinds onto status codes. Every committed operation
//! wakes the [`AuditLedgerRecorder`], which forwards the outbox to the
//! ledger in the background.
//!
//! [`CustodyEngine`]: handreceipt_core::CustodyEngine
//! [`CustodyError`]: handreceipt_core::CustodyError
//! [`AuditLedgerRecorder`]: handreceipt_ledger::AuditLedgerRecorder

pub mod api;
pub mod config;
pub mod error;
pub mod extract;
pub mod middleware;

pub use api::{AppState, create_app};
pub use config::{ConfigError, ServerConfig, StorageBackend};
pub use error::ApiError;
pub use extract::{ActingUser, USER_HEADER};
