//! Applies an approved transfer to holders and attachment edges.
//!
//! Runs inside the approving transaction. Every check happens before the
//! first write, and the enclosing transaction discards the writes anyway if
//! a later step fails.

use serde::Serialize;
use tracing::debug;

use crate::error::{CustodyError, Result};
use crate::event::{DetachReason, LedgerEventKind};
use crate::property::{PropertyId, PropertyStatus, TransferId, UserId};
use crate::store::UnitOfWork;
use crate::transfer::TransferRequest;

/// What an approval changed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommittedResult {
    pub transfer: TransferId,
    pub subject: PropertyId,
    pub from: UserId,
    pub to: UserId,
    /// Components that changed hands with the subject, still mounted.
    pub moved_components: Vec<PropertyId>,
    /// Components left with the source holder, now unmounted.
    pub detached_components: Vec<PropertyId>,
    /// Parent the subject itself was removed from.
    pub detached_from: Option<PropertyId>,
}

pub struct ConsistencyCoordinator;

impl ConsistencyCoordinator {
    pub fn resolve_approval(
        uow: &mut UnitOfWork<'_>,
        request: &TransferRequest,
        include_components: bool,
    ) -> Result<CommittedResult> {
        let now = uow.now();
        let actor = request.source_holder;
        let from = request.source_holder;
        let to = request.destination;

        let tx = uow.store();
        let mut subject = tx.require_property(request.subject)?;
        if subject.holder != from {
            return Err(CustodyError::StaleRequest {
                transfer: request.id,
                property: subject.id,
                holder: subject.holder,
            });
        }

        let edges = tx.edges_for_parent(subject.id)?;
        let mut components = Vec::new();
        if include_components {
            for edge in &edges {
                let component = tx.require_property(edge.component)?;
                if component.holder != from {
                    return Err(CustodyError::ForeignComponent {
                        component: component.id,
                        holder: component.holder,
                    });
                }
                if component.status == PropertyStatus::InTransfer {
                    return Err(CustodyError::TransferPending(component.id));
                }
                components.push(component);
            }
        }
        // Unmounting the subject changes its parent's attachments, which are
        // frozen while the parent has a pending transfer of its own.
        let own_edge = tx.edge_for_component(subject.id)?;
        if let Some(edge) = &own_edge {
            let parent = tx.require_property(edge.parent)?;
            if parent.status == PropertyStatus::InTransfer {
                return Err(CustodyError::TransferPending(parent.id));
            }
        }

        // Checks done; mutate.
        subject.holder = to;
        subject.status = PropertyStatus::Active;
        subject.updated_at = now;
        tx.update_property(&subject)?;

        let mut moved_components = Vec::new();
        for mut component in components {
            component.holder = to;
            component.updated_at = now;
            tx.update_property(&component)?;
            moved_components.push(component.id);
        }

        let mut detached = Vec::new();
        if !include_components {
            for edge in edges {
                tx.remove_edge(edge.component)?;
                detached.push(edge);
            }
        }
        let detached_from = match own_edge {
            Some(edge) => {
                tx.remove_edge(subject.id)?;
                Some(edge)
            }
            None => None,
        };

        uow.emit(
            actor,
            LedgerEventKind::OwnershipChanged {
                property: subject.id,
                from,
                to,
                transfer: request.id,
            },
        );
        for component in &moved_components {
            uow.emit(
                actor,
                LedgerEventKind::OwnershipChanged {
                    property: *component,
                    from,
                    to,
                    transfer: request.id,
                },
            );
        }
        for edge in &detached {
            uow.emit(
                actor,
                LedgerEventKind::ComponentDetached {
                    parent: edge.parent,
                    component: edge.component,
                    slot: edge.slot.clone(),
                    reason: DetachReason::TransferExcluded,
                },
            );
        }
        if let Some(edge) = &detached_from {
            uow.emit(
                actor,
                LedgerEventKind::ComponentDetached {
                    parent: edge.parent,
                    component: edge.component,
                    slot: edge.slot.clone(),
                    reason: DetachReason::SubjectTransferred,
                },
            );
        }

        let result = CommittedResult {
            transfer: request.id,
            subject: subject.id,
            from,
            to,
            moved_components,
            detached_components: detached.iter().map(|e| e.component).collect(),
            detached_from: detached_from.map(|e| e.parent),
        };
        uow.emit(
            actor,
            LedgerEventKind::TransferApproved {
                transfer: result.transfer,
                subject: result.subject,
                from,
                to,
                moved_components: result.moved_components.clone(),
                detached_components: result.detached_components.clone(),
                detached_from: result.detached_from,
            },
        );

        debug!(?result, "approval applied");
        Ok(result)
    }
}
