//! The custody engine facade.
//!
//! Each public operation is one unit of work: a single store transaction
//! that performs the mutation and writes its audit events to the outbox.
//! Notifiers hear about the events only after the transaction committed.

use std::sync::Arc;

use tracing::{debug, info, instrument};

use crate::attachment::{AttachRequest, AttachmentEdge, AttachmentGraphManager};
use crate::credential::{CredentialKey, QrCredential, QrCredentialVerifier, VerifiedCredential};
use crate::error::{CustodyError, Result};
use crate::event::{LedgerEvent, LedgerEventKind};
use crate::notify::TransitionNotifier;
use crate::property::{NewProperty, Property, PropertyId, PropertyStatus, TransferId, UserId};
use crate::store::{CustodyStore, StoreRead, UnitOfWork};
use crate::transfer::{NewTransfer, TransferDraft, TransferRequest, TransferWorkflowEngine};

/// Default QR credential lifetime: five minutes.
pub const DEFAULT_CREDENTIAL_VALIDITY_MS: i64 = 5 * 60 * 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    pub credential_validity_ms: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            credential_validity_ms: DEFAULT_CREDENTIAL_VALIDITY_MS,
        }
    }
}

pub struct CustodyEngine<S: CustodyStore> {
    store: Arc<S>,
    verifier: QrCredentialVerifier,
    notifiers: Vec<Arc<dyn TransitionNotifier>>,
}

impl<S: CustodyStore> CustodyEngine<S> {
    pub fn new(store: Arc<S>, key: CredentialKey, config: EngineConfig) -> Self {
        Self {
            store,
            verifier: QrCredentialVerifier::new(key, config.credential_validity_ms),
            notifiers: Vec::new(),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn TransitionNotifier>) -> Self {
        self.notifiers.push(notifier);
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn credential_validity_ms(&self) -> i64 {
        self.verifier.validity_ms()
    }

    // -- property intake --------------------------------------------------

    #[instrument(skip(self, new), fields(serial = %new.serial_number))]
    pub fn register_property(&self, new: NewProperty, actor: UserId, now: i64) -> Result<Property> {
        let property = new.into_property(now)?;
        self.commit(now, |uow| {
            let property = uow.store().insert_property(property)?;
            uow.emit(
                actor,
                LedgerEventKind::PropertyRegistered {
                    property: property.id,
                    serial_number: property.serial_number.clone(),
                    holder: property.holder,
                },
            );
            info!(property = %property.id, holder = %property.holder, "property registered");
            Ok(property)
        })
    }

    pub fn property(&self, id: PropertyId) -> Result<Property> {
        self.store.read(|tx| tx.require_property(id))
    }

    pub fn property_by_serial(&self, serial: &str) -> Result<Property> {
        self.store.read(|tx| {
            tx.property_by_serial(serial.trim())?
                .ok_or_else(|| CustodyError::SerialNotFound(serial.to_string()))
        })
    }

    /// Takes a property out of service. It must be free of transfers and
    /// attachments.
    #[instrument(skip(self))]
    pub fn retire_property(&self, id: PropertyId, actor: UserId, now: i64) -> Result<Property> {
        self.commit(now, |uow| {
            let tx = uow.store();
            let mut property = tx.require_property(id)?;
            property.ensure_held_by(actor)?;
            property.ensure_active()?;
            if tx.edge_for_component(id)?.is_some() || !tx.edges_for_parent(id)?.is_empty() {
                return Err(CustodyError::PropertyInUse(id));
            }

            property.status = PropertyStatus::Retired;
            property.updated_at = now;
            tx.update_property(&property)?;
            uow.emit(actor, LedgerEventKind::PropertyRetired { property: id });
            info!(property = %id, "property retired");
            Ok(property)
        })
    }

    // -- attachments ------------------------------------------------------

    #[instrument(skip(self, request), fields(parent = %request.parent, component = %request.component, actor = %request.actor))]
    pub fn attach(&self, request: AttachRequest, now: i64) -> Result<AttachmentEdge> {
        self.commit(now, |uow| AttachmentGraphManager::attach(uow, request))
    }

    #[instrument(skip(self))]
    pub fn detach(
        &self,
        parent: PropertyId,
        component: PropertyId,
        actor: UserId,
        now: i64,
    ) -> Result<AttachmentEdge> {
        self.commit(now, |uow| {
            AttachmentGraphManager::detach(uow, parent, component, actor)
        })
    }

    #[instrument(skip(self))]
    pub fn reposition(
        &self,
        parent: PropertyId,
        component: PropertyId,
        actor: UserId,
        slot: Option<String>,
        now: i64,
    ) -> Result<AttachmentEdge> {
        self.commit(now, |uow| {
            AttachmentGraphManager::reposition(uow, parent, component, actor, slot)
        })
    }

    pub fn list_components(&self, parent: PropertyId) -> Result<Vec<AttachmentEdge>> {
        self.store
            .read(|tx| AttachmentGraphManager::list_components(tx, parent))
    }

    pub fn list_available_components(
        &self,
        parent: PropertyId,
        owner: UserId,
    ) -> Result<Vec<Property>> {
        self.store
            .read(|tx| AttachmentGraphManager::list_available_components(tx, parent, owner))
    }

    // -- credentials ------------------------------------------------------

    #[instrument(skip(self))]
    pub fn issue_credential(
        &self,
        property: PropertyId,
        actor: UserId,
        now: i64,
    ) -> Result<QrCredential> {
        self.store
            .read(|tx| self.verifier.issue(tx, property, actor, now))
    }

    pub fn verify_credential(&self, text: &str, now: i64) -> Result<VerifiedCredential> {
        self.store
            .read(|tx| self.verifier.verify_text(tx, text, now))
    }

    // -- transfers --------------------------------------------------------

    /// Creates a pending request. A scanned credential is verified in the
    /// same transaction that creates the request.
    #[instrument(skip(self, new), fields(initiator = %new.initiator, destination = %new.destination, method = ?new.method))]
    pub fn create_transfer(&self, new: NewTransfer, now: i64) -> Result<TransferRequest> {
        self.commit(now, |uow| {
            let draft = TransferDraft::resolve(&*uow.store(), &new)?;
            let verified = match new.credential.as_deref() {
                Some(text) => Some(self.verifier.verify_text(&*uow.store(), text, now)?),
                None => None,
            };
            TransferWorkflowEngine::create(uow, draft, verified.as_ref())
        })
    }

    #[instrument(skip(self))]
    pub fn approve_transfer(
        &self,
        id: TransferId,
        approver: UserId,
        now: i64,
    ) -> Result<TransferRequest> {
        self.commit(now, |uow| TransferWorkflowEngine::approve(uow, id, approver))
    }

    #[instrument(skip(self))]
    pub fn reject_transfer(&self, id: TransferId, holder: UserId, now: i64) -> Result<TransferRequest> {
        self.commit(now, |uow| TransferWorkflowEngine::reject(uow, id, holder))
    }

    #[instrument(skip(self))]
    pub fn cancel_transfer(
        &self,
        id: TransferId,
        initiator: UserId,
        now: i64,
    ) -> Result<TransferRequest> {
        self.commit(now, |uow| TransferWorkflowEngine::cancel(uow, id, initiator))
    }

    pub fn transfer(&self, id: TransferId) -> Result<TransferRequest> {
        self.store.read(|tx| tx.require_transfer(id))
    }

    pub fn transfers_for_user(&self, user: UserId) -> Result<Vec<TransferRequest>> {
        self.store.read(|tx| tx.transfers_involving(user))
    }

    // -- internals --------------------------------------------------------

    fn commit<T, F>(&self, now: i64, op: F) -> Result<T>
    where
        F: FnOnce(&mut UnitOfWork<'_>) -> Result<T>,
    {
        let (value, events) = self
            .store
            .transact(|tx| {
                let mut uow = UnitOfWork::new(tx, now);
                let value = op(&mut uow)?;
                let events = uow.finish()?;
                Ok((value, events))
            })
            .inspect_err(|e| debug!(code = e.code(), error = %e, "operation rejected"))?;
        self.publish(&events);
        Ok(value)
    }

    fn publish(&self, events: &[LedgerEvent]) {
        if events.is_empty() {
            return;
        }
        for notifier in &self.notifiers {
            notifier.notify(events);
        }
    }
}
