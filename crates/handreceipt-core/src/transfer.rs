//! Custody transfer requests and their approval state machine.
//!
//! ```text
//!            ┌── approve (holder) ──▶ Approved
//! Pending ───┼── reject  (holder) ──▶ Rejected
//!            └── cancel  (initiator) ─▶ Cancelled
//! ```
//!
//! Every terminal state is final. While a request is pending its subject is
//! marked `InTransfer`, which freezes attachments touching it.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::coordinator::ConsistencyCoordinator;
use crate::credential::VerifiedCredential;
use crate::error::{CustodyError, Result};
use crate::event::LedgerEventKind;
use crate::property::{Property, PropertyId, PropertyStatus, TransferId, UserId};
use crate::store::{StoreRead, UnitOfWork};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransferStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
}

impl TransferStatus {
    pub fn is_terminal(self) -> bool {
        self != TransferStatus::Pending
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferStatus::Pending => f.write_str("pending"),
            TransferStatus::Approved => f.write_str("approved"),
            TransferStatus::Rejected => f.write_str("rejected"),
            TransferStatus::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// How a transfer request came about.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InitiationMethod {
    /// Someone asks the holder for the item.
    ManualRequest,
    /// The holder offers the item to someone.
    Offer,
    /// The recipient scanned the holder's QR credential.
    QrScan,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    pub id: TransferId,
    pub subject: PropertyId,
    pub initiator: UserId,
    /// Holder when the request was created; must still hold at resolution.
    pub source_holder: UserId,
    pub destination: UserId,
    pub method: InitiationMethod,
    pub include_components: bool,
    pub status: TransferStatus,
    pub signature: Option<String>,
    pub notes: Option<String>,
    pub created_at: i64,
    pub resolved_at: Option<i64>,
    pub resolved_by: Option<UserId>,
}

impl TransferRequest {
    pub fn is_pending(&self) -> bool {
        self.status == TransferStatus::Pending
    }

    pub fn involves(&self, user: UserId) -> bool {
        self.initiator == user || self.source_holder == user || self.destination == user
    }

    fn ensure_pending(&self) -> Result<()> {
        if self.status.is_terminal() {
            return Err(CustodyError::AlreadyResolved {
                transfer: self.id,
                status: self.status,
            });
        }
        Ok(())
    }

    fn resolve(&mut self, status: TransferStatus, by: UserId, now: i64) {
        self.status = status;
        self.resolved_by = Some(by);
        self.resolved_at = Some(now);
    }
}

/// Identifies the subject of a new request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TransferSubject {
    Id(PropertyId),
    Serial(String),
}

/// A transfer intent as submitted by a client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewTransfer {
    pub subject: TransferSubject,
    pub initiator: UserId,
    pub destination: UserId,
    pub include_components: bool,
    pub method: InitiationMethod,
    /// Scanned QR text, verified before the request is created.
    pub credential: Option<String>,
    pub notes: Option<String>,
}

impl NewTransfer {
    pub fn new(
        subject: impl Into<TransferSubject>,
        initiator: UserId,
        destination: UserId,
        method: InitiationMethod,
    ) -> Self {
        Self {
            subject: subject.into(),
            initiator,
            destination,
            include_components: false,
            method,
            credential: None,
            notes: None,
        }
    }

    pub fn including_components(mut self) -> Self {
        self.include_components = true;
        self
    }

    pub fn with_credential(mut self, text: impl Into<String>) -> Self {
        self.credential = Some(text.into());
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

impl From<PropertyId> for TransferSubject {
    fn from(id: PropertyId) -> Self {
        TransferSubject::Id(id)
    }
}

impl From<&str> for TransferSubject {
    fn from(serial: &str) -> Self {
        TransferSubject::Serial(serial.to_string())
    }
}

/// A request with its subject resolved, ready for precondition checks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransferDraft {
    pub subject: PropertyId,
    pub initiator: UserId,
    pub destination: UserId,
    pub include_components: bool,
    pub method: InitiationMethod,
    pub notes: Option<String>,
}

impl TransferDraft {
    pub fn resolve<R>(tx: &R, new: &NewTransfer) -> Result<Self>
    where
        R: StoreRead + ?Sized,
    {
        let subject = match &new.subject {
            TransferSubject::Id(id) => *id,
            TransferSubject::Serial(serial) => {
                tx.property_by_serial(serial.trim())?
                    .ok_or_else(|| CustodyError::SerialNotFound(serial.clone()))?
                    .id
            }
        };
        Ok(Self {
            subject,
            initiator: new.initiator,
            destination: new.destination,
            include_components: new.include_components,
            method: new.method,
            notes: new.notes.clone(),
        })
    }
}

pub struct TransferWorkflowEngine;

impl TransferWorkflowEngine {
    /// Persists a `Pending` request and marks the subject `InTransfer`.
    pub fn create(
        uow: &mut UnitOfWork<'_>,
        draft: TransferDraft,
        credential: Option<&VerifiedCredential>,
    ) -> Result<TransferRequest> {
        let now = uow.now();
        let tx = uow.store();
        let mut property = tx.require_property(draft.subject)?;

        match property.status {
            PropertyStatus::Active => {}
            PropertyStatus::InTransfer => {
                return Err(CustodyError::DuplicatePendingRequest(property.id));
            }
            PropertyStatus::Retired => {
                return Err(CustodyError::PropertyInactive {
                    property: property.id,
                    status: property.status,
                });
            }
        }
        if draft.destination == property.holder {
            return Err(CustodyError::SelfTransfer {
                property: property.id,
                user: draft.destination,
            });
        }
        Self::check_method(&draft, &property, credential)?;
        if tx.pending_transfer_for(property.id)?.is_some() {
            return Err(CustodyError::DuplicatePendingRequest(property.id));
        }

        let request = tx.insert_transfer(TransferRequest {
            id: TransferId(0),
            subject: property.id,
            initiator: draft.initiator,
            source_holder: property.holder,
            destination: draft.destination,
            method: draft.method,
            include_components: draft.include_components,
            status: TransferStatus::Pending,
            signature: credential.map(|c| c.signature().to_string()),
            notes: draft.notes,
            created_at: now,
            resolved_at: None,
            resolved_by: None,
        })?;

        property.status = PropertyStatus::InTransfer;
        property.updated_at = now;
        tx.update_property(&property)?;

        info!(
            transfer = %request.id,
            subject = %request.subject,
            from = %request.source_holder,
            to = %request.destination,
            method = ?request.method,
            "transfer requested"
        );
        uow.emit(
            request.initiator,
            LedgerEventKind::TransferCreated {
                transfer: request.id,
                subject: request.subject,
                from: request.source_holder,
                to: request.destination,
                method: request.method,
                include_components: request.include_components,
            },
        );
        Ok(request)
    }

    /// Approves a pending request and applies it through the coordinator.
    pub fn approve(
        uow: &mut UnitOfWork<'_>,
        id: TransferId,
        approver: UserId,
    ) -> Result<TransferRequest> {
        let now = uow.now();
        let mut request = uow.store().require_transfer(id)?;
        request.ensure_pending()?;
        let property = uow.store().require_property(request.subject)?;
        Self::check_resolver(&request, &property, approver)?;

        let result =
            ConsistencyCoordinator::resolve_approval(uow, &request, request.include_components)?;

        request.resolve(TransferStatus::Approved, approver, now);
        uow.store().update_transfer(&request)?;

        info!(
            transfer = %request.id,
            subject = %request.subject,
            to = %request.destination,
            moved = result.moved_components.len(),
            detached = result.detached_components.len(),
            "transfer approved"
        );
        Ok(request)
    }

    pub fn reject(uow: &mut UnitOfWork<'_>, id: TransferId, holder: UserId) -> Result<TransferRequest> {
        let now = uow.now();
        let mut request = uow.store().require_transfer(id)?;
        request.ensure_pending()?;
        let property = uow.store().require_property(request.subject)?;
        Self::check_resolver(&request, &property, holder)?;

        request.resolve(TransferStatus::Rejected, holder, now);
        Self::close(uow, &request, property)?;

        info!(transfer = %request.id, subject = %request.subject, "transfer rejected");
        uow.emit(
            holder,
            LedgerEventKind::TransferRejected {
                transfer: request.id,
                subject: request.subject,
            },
        );
        Ok(request)
    }

    pub fn cancel(
        uow: &mut UnitOfWork<'_>,
        id: TransferId,
        initiator: UserId,
    ) -> Result<TransferRequest> {
        let now = uow.now();
        let mut request = uow.store().require_transfer(id)?;
        request.ensure_pending()?;
        if request.initiator != initiator {
            return Err(CustodyError::NotInitiator {
                transfer: id,
                user: initiator,
            });
        }
        let property = uow.store().require_property(request.subject)?;

        request.resolve(TransferStatus::Cancelled, initiator, now);
        Self::close(uow, &request, property)?;

        info!(transfer = %request.id, subject = %request.subject, "transfer cancelled");
        uow.emit(
            initiator,
            LedgerEventKind::TransferCancelled {
                transfer: request.id,
                subject: request.subject,
            },
        );
        Ok(request)
    }

    fn check_method(
        draft: &TransferDraft,
        property: &Property,
        credential: Option<&VerifiedCredential>,
    ) -> Result<()> {
        match (draft.method, credential) {
            (InitiationMethod::QrScan, None) => Err(CustodyError::invalid_credential(
                "qr-scan transfers require a verified credential",
            )),
            (InitiationMethod::QrScan, Some(verified)) if verified.property_id() != property.id => {
                Err(CustodyError::invalid_credential(format!(
                    "credential is for {}, not {}",
                    verified.property_id(),
                    property.id
                )))
            }
            (InitiationMethod::QrScan, Some(_)) => Ok(()),
            (_, Some(_)) => Err(CustodyError::invalid_credential(
                "credentials are only accepted for qr-scan transfers",
            )),
            (InitiationMethod::Offer, None) if draft.initiator != property.holder => {
                Err(CustodyError::NotHolder {
                    property: property.id,
                    user: draft.initiator,
                })
            }
            _ => Ok(()),
        }
    }

    /// Staleness first: a request whose snapshot no longer matches the live
    /// holder is stale no matter who tries to resolve it.
    fn check_resolver(request: &TransferRequest, property: &Property, user: UserId) -> Result<()> {
        if property.holder != request.source_holder {
            return Err(CustodyError::StaleRequest {
                transfer: request.id,
                property: property.id,
                holder: property.holder,
            });
        }
        property.ensure_held_by(user)
    }

    /// Stores a rejected or cancelled request and releases the subject.
    fn close(uow: &mut UnitOfWork<'_>, request: &TransferRequest, mut property: Property) -> Result<()> {
        let now = uow.now();
        let tx = uow.store();
        tx.update_transfer(request)?;
        if property.status == PropertyStatus::InTransfer {
            property.status = PropertyStatus::Active;
            property.updated_at = now;
            tx.update_property(&property)?;
        }
        debug!(subject = %property.id, "subject released");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(status: TransferStatus) -> TransferRequest {
        TransferRequest {
            id: TransferId(1),
            subject: PropertyId(1),
            initiator: UserId(2),
            source_holder: UserId(1),
            destination: UserId(2),
            method: InitiationMethod::ManualRequest,
            include_components: false,
            status,
            signature: None,
            notes: None,
            created_at: 0,
            resolved_at: None,
            resolved_by: None,
        }
    }

    #[test]
    fn test_terminal_states() {
        assert!(!TransferStatus::Pending.is_terminal());
        assert!(TransferStatus::Approved.is_terminal());
        assert!(TransferStatus::Rejected.is_terminal());
        assert!(TransferStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_resolved_request_refuses_resolution() {
        let resolved = request(TransferStatus::Rejected);
        assert_eq!(
            resolved.ensure_pending(),
            Err(CustodyError::AlreadyResolved {
                transfer: TransferId(1),
                status: TransferStatus::Rejected,
            })
        );
        assert!(request(TransferStatus::Pending).ensure_pending().is_ok());
    }

    #[test]
    fn test_involves_every_party() {
        let request = request(TransferStatus::Pending);
        assert!(request.involves(UserId(1)));
        assert!(request.involves(UserId(2)));
        assert!(!request.involves(UserId(3)));
    }

    #[test]
    fn test_method_wire_names() {
        assert_eq!(
            serde_json::to_string(&InitiationMethod::QrScan).unwrap(),
            "\"qr-scan\""
        );
        assert_eq!(
            serde_json::from_str::<InitiationMethod>("\"manual-request\"").unwrap(),
            InitiationMethod::ManualRequest
        );
    }
}
