//! Error types for the custody engine
//!
//! Every failure carries a [`ErrorKind`] so callers can tell a permanent
//! validation failure from state that moved underneath them.

use serde::Serialize;
use thiserror::Error;

use crate::property::{PropertyId, PropertyStatus, TransferId, UserId};
use crate::transfer::TransferStatus;

pub type Result<T> = std::result::Result<T, CustodyError>;

/// Broad classification of a [`CustodyError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    /// The request can never succeed against the current state.
    Precondition,
    /// The real-world state moved since the caller last read it.
    Staleness,
    /// Lost a race with a concurrent mutation.
    Conflict,
    /// Storage unavailable or corrupt.
    Infrastructure,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CustodyError {
    #[error("{0} not found")]
    PropertyNotFound(PropertyId),

    #[error("no property with serial number {0:?}")]
    SerialNotFound(String),

    #[error("{0} not found")]
    TransferNotFound(TransferId),

    #[error("{component} is not attached to {parent}")]
    AttachmentNotFound {
        parent: PropertyId,
        component: PropertyId,
    },

    #[error("{0} cannot host components")]
    NotAttachable(PropertyId),

    #[error("{property} is not owned by {user}")]
    NotOwned { property: PropertyId, user: UserId },

    #[error("{user} is not the current holder of {property}")]
    NotHolder { property: PropertyId, user: UserId },

    #[error("{user} did not initiate {transfer}")]
    NotInitiator { transfer: TransferId, user: UserId },

    #[error("{component} is not compatible with {parent}")]
    Incompatible {
        parent: PropertyId,
        component: PropertyId,
    },

    #[error("slot {slot:?} on {parent} is at capacity")]
    SlotFull { parent: PropertyId, slot: String },

    #[error("{parent} has no attachment point {slot:?}")]
    InvalidSlot { parent: PropertyId, slot: String },

    #[error("{0} cannot be attached to itself")]
    SelfReference(PropertyId),

    #[error("{0} would form a nested attachment")]
    NestedAttachment(PropertyId),

    #[error("{user} already holds {property}")]
    SelfTransfer { property: PropertyId, user: UserId },

    #[error("{component} is held by {holder}, not the transferring holder")]
    ForeignComponent {
        component: PropertyId,
        holder: UserId,
    },

    #[error("{property} is {status}")]
    PropertyInactive {
        property: PropertyId,
        status: PropertyStatus,
    },

    #[error("{0} still has attachments")]
    PropertyInUse(PropertyId),

    #[error("invalid property: {0}")]
    InvalidProperty(String),

    #[error("invalid credential: {0}")]
    InvalidCredential(String),

    #[error("credential integrity check failed")]
    Integrity,

    #[error("credential issued at {issued_at} expired at {expired_at}")]
    ExpiredCredential { issued_at: i64, expired_at: i64 },

    #[error("credential for {property} names {issued_to}, but {holder} holds it now")]
    StaleCredential {
        property: PropertyId,
        issued_to: UserId,
        holder: UserId,
    },

    #[error("{transfer} is stale: {property} is now held by {holder}")]
    StaleRequest {
        transfer: TransferId,
        property: PropertyId,
        holder: UserId,
    },

    #[error("{0} is already attached to a parent")]
    AlreadyAttached(PropertyId),

    #[error("{0} already has an unresolved transfer request")]
    DuplicatePendingRequest(PropertyId),

    #[error("{0} is under an unresolved transfer request")]
    TransferPending(PropertyId),

    #[error("{transfer} is already {status}")]
    AlreadyResolved {
        transfer: TransferId,
        status: TransferStatus,
    },

    #[error("serial number {0:?} is already registered")]
    DuplicateSerial(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl CustodyError {
    /// Create a new Storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    /// Create a new InvalidCredential error
    pub fn invalid_credential(message: impl Into<String>) -> Self {
        Self::InvalidCredential(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        use CustodyError::*;
        match self {
            PropertyNotFound(_) | SerialNotFound(_) | TransferNotFound(_)
            | AttachmentNotFound { .. } => ErrorKind::NotFound,

            NotAttachable(_)
            | NotOwned { .. }
            | NotHolder { .. }
            | NotInitiator { .. }
            | Incompatible { .. }
            | SlotFull { .. }
            | InvalidSlot { .. }
            | SelfReference(_)
            | NestedAttachment(_)
            | SelfTransfer { .. }
            | ForeignComponent { .. }
            | PropertyInactive { .. }
            | PropertyInUse(_)
            | InvalidProperty(_)
            | InvalidCredential(_) => ErrorKind::Precondition,

            Integrity | ExpiredCredential { .. } | StaleCredential { .. } | StaleRequest { .. } => {
                ErrorKind::Staleness
            }

            AlreadyAttached(_)
            | DuplicatePendingRequest(_)
            | TransferPending(_)
            | AlreadyResolved { .. }
            | DuplicateSerial(_) => ErrorKind::Conflict,

            Storage(_) => ErrorKind::Infrastructure,
        }
    }

    /// Stable machine-readable code for clients.
    pub fn code(&self) -> &'static str {
        use CustodyError::*;
        match self {
            PropertyNotFound(_) => "property_not_found",
            SerialNotFound(_) => "serial_not_found",
            TransferNotFound(_) => "transfer_not_found",
            AttachmentNotFound { .. } => "attachment_not_found",
            NotAttachable(_) => "not_attachable",
            NotOwned { .. } => "not_owned",
            NotHolder { .. } => "not_holder",
            NotInitiator { .. } => "not_initiator",
            Incompatible { .. } => "incompatible",
            SlotFull { .. } => "slot_full",
            InvalidSlot { .. } => "invalid_slot",
            SelfReference(_) => "self_reference",
            NestedAttachment(_) => "nested_attachment",
            SelfTransfer { .. } => "self_transfer",
            ForeignComponent { .. } => "foreign_component",
            PropertyInactive { .. } => "property_inactive",
            PropertyInUse(_) => "property_in_use",
            InvalidProperty(_) => "invalid_property",
            InvalidCredential(_) => "invalid_credential",
            Integrity => "integrity",
            ExpiredCredential { .. } => "expired_credential",
            StaleCredential { .. } => "stale_credential",
            StaleRequest { .. } => "stale_request",
            AlreadyAttached(_) => "already_attached",
            DuplicatePendingRequest(_) => "duplicate_pending_request",
            TransferPending(_) => "transfer_pending",
            AlreadyResolved { .. } => "already_resolved",
            DuplicateSerial(_) => "duplicate_serial",
            Storage(_) => "storage",
        }
    }

    /// Whether refreshing state and retrying can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Staleness | ErrorKind::Conflict | ErrorKind::Infrastructure
        )
    }

    /// Failures that belong to the caller's request rather than the request
    /// racing someone else.
    pub fn is_user_error(&self) -> bool {
        matches!(self.kind(), ErrorKind::NotFound | ErrorKind::Precondition)
    }
}
