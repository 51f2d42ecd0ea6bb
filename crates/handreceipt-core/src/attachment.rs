//! The parent/component attachment graph.
//!
//! A component hangs off at most one parent, a parent may host many
//! components, and the graph is a single level deep: a mounted component
//! never hosts components of its own.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CustodyError, Result};
use crate::event::{DetachReason, LedgerEventKind};
use crate::property::{AttachmentPoint, Property, PropertyId, PropertyStatus, UserId};
use crate::store::{StoreRead, UnitOfWork};

/// How a component is mounted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AttachmentKind {
    Permanent,
    Temporary,
    #[default]
    Field,
}

/// "Component is currently mounted on parent at slot."
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentEdge {
    pub parent: PropertyId,
    pub component: PropertyId,
    pub slot: Option<String>,
    pub kind: AttachmentKind,
    pub attached_by: UserId,
    pub attached_at: i64,
    pub notes: Option<String>,
    /// Store-assigned insertion order.
    pub sequence: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttachRequest {
    pub parent: PropertyId,
    pub component: PropertyId,
    pub actor: UserId,
    pub slot: Option<String>,
    pub kind: AttachmentKind,
    pub notes: Option<String>,
}

impl AttachRequest {
    pub fn new(parent: PropertyId, component: PropertyId, actor: UserId) -> Self {
        Self {
            parent,
            component,
            actor,
            slot: None,
            kind: AttachmentKind::default(),
            notes: None,
        }
    }

    pub fn at_slot(mut self, slot: impl Into<String>) -> Self {
        self.slot = Some(slot.into());
        self
    }

    pub fn with_kind(mut self, kind: AttachmentKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

/// Owns every change to the attachment relation.
pub struct AttachmentGraphManager;

impl AttachmentGraphManager {
    /// Mounts a component on a parent.
    ///
    /// The actor must hold both items. The store's one-edge-per-component
    /// rule is the final word on [`CustodyError::AlreadyAttached`]; the
    /// lookup here only produces the error earlier.
    pub fn attach(uow: &mut UnitOfWork<'_>, request: AttachRequest) -> Result<AttachmentEdge> {
        if request.parent == request.component {
            return Err(CustodyError::SelfReference(request.parent));
        }

        let now = uow.now();
        let tx = uow.store();
        let parent = tx.require_property(request.parent)?;
        let component = tx.require_property(request.component)?;
        parent.ensure_active()?;
        component.ensure_active()?;

        if !parent.is_attachable {
            return Err(CustodyError::NotAttachable(parent.id));
        }
        for item in [&parent, &component] {
            if item.holder != request.actor {
                return Err(CustodyError::NotOwned {
                    property: item.id,
                    user: request.actor,
                });
            }
        }
        if tx.edge_for_component(component.id)?.is_some() {
            return Err(CustodyError::AlreadyAttached(component.id));
        }
        if tx.edge_for_component(parent.id)?.is_some() {
            return Err(CustodyError::NestedAttachment(parent.id));
        }
        if !tx.edges_for_parent(component.id)?.is_empty() {
            return Err(CustodyError::NestedAttachment(component.id));
        }

        let point = match request.slot.as_deref() {
            Some(name) => Some(Self::open_slot(&*tx, &parent, name, None)?),
            None => None,
        };
        if !is_compatible(&parent, &component, point) {
            return Err(CustodyError::Incompatible {
                parent: parent.id,
                component: component.id,
            });
        }

        let edge = tx.insert_edge(AttachmentEdge {
            parent: parent.id,
            component: component.id,
            slot: request.slot,
            kind: request.kind,
            attached_by: request.actor,
            attached_at: now,
            notes: request.notes,
            sequence: 0,
        })?;

        debug!(parent = %edge.parent, component = %edge.component, slot = ?edge.slot, "attached");
        uow.emit(
            request.actor,
            LedgerEventKind::ComponentAttached {
                parent: edge.parent,
                component: edge.component,
                slot: edge.slot.clone(),
                attachment: edge.kind,
            },
        );
        Ok(edge)
    }

    /// Removes a component from its parent. Only the parent's holder may detach.
    pub fn detach(
        uow: &mut UnitOfWork<'_>,
        parent: PropertyId,
        component: PropertyId,
        actor: UserId,
    ) -> Result<AttachmentEdge> {
        let tx = uow.store();
        let parent_item = tx.require_property(parent)?;
        Self::edge_between(&*tx, parent, component)?;
        parent_item.ensure_held_by(actor)?;
        Self::ensure_not_in_transfer(&parent_item)?;
        Self::ensure_not_in_transfer(&tx.require_property(component)?)?;

        let edge = tx
            .remove_edge(component)?
            .ok_or(CustodyError::AttachmentNotFound { parent, component })?;

        debug!(parent = %parent, component = %component, "detached");
        uow.emit(
            actor,
            LedgerEventKind::ComponentDetached {
                parent,
                component,
                slot: edge.slot.clone(),
                reason: DetachReason::Manual,
            },
        );
        Ok(edge)
    }

    /// Moves a mounted component to another slot on the same parent.
    ///
    /// The edge keeps its insertion position.
    pub fn reposition(
        uow: &mut UnitOfWork<'_>,
        parent: PropertyId,
        component: PropertyId,
        actor: UserId,
        slot: Option<String>,
    ) -> Result<AttachmentEdge> {
        let tx = uow.store();
        let parent_item = tx.require_property(parent)?;
        let component_item = tx.require_property(component)?;
        let mut edge = Self::edge_between(&*tx, parent, component)?;
        parent_item.ensure_held_by(actor)?;
        Self::ensure_not_in_transfer(&parent_item)?;
        Self::ensure_not_in_transfer(&component_item)?;

        let point = match slot.as_deref() {
            Some(name) => Some(Self::open_slot(&*tx, &parent_item, name, Some(component))?),
            None => None,
        };
        if !is_compatible(&parent_item, &component_item, point) {
            return Err(CustodyError::Incompatible { parent, component });
        }

        let from_slot = std::mem::replace(&mut edge.slot, slot);
        tx.update_edge(&edge)?;

        uow.emit(
            actor,
            LedgerEventKind::ComponentRepositioned {
                parent,
                component,
                from_slot,
                to_slot: edge.slot.clone(),
            },
        );
        Ok(edge)
    }

    pub fn list_components<R>(tx: &R, parent: PropertyId) -> Result<Vec<AttachmentEdge>>
    where
        R: StoreRead + ?Sized,
    {
        tx.require_property(parent)?;
        tx.edges_for_parent(parent)
    }

    /// Items `owner` could mount on `parent` right now, ordered by id.
    ///
    /// Empty when the parent cannot host components.
    pub fn list_available_components<R>(
        tx: &R,
        parent: PropertyId,
        owner: UserId,
    ) -> Result<Vec<Property>>
    where
        R: StoreRead + ?Sized,
    {
        let parent = tx.require_property(parent)?;
        if !parent.is_attachable {
            return Ok(Vec::new());
        }

        let mut available = Vec::new();
        for candidate in tx.properties_held_by(owner)? {
            if candidate.id == parent.id
                || candidate.ensure_active().is_err()
                || !is_compatible(&parent, &candidate, None)
            {
                continue;
            }
            if tx.edge_for_component(candidate.id)?.is_some()
                || !tx.edges_for_parent(candidate.id)?.is_empty()
            {
                continue;
            }
            available.push(candidate);
        }
        Ok(available)
    }

    fn edge_between<R>(tx: &R, parent: PropertyId, component: PropertyId) -> Result<AttachmentEdge>
    where
        R: StoreRead + ?Sized,
    {
        tx.edge_for_component(component)?
            .filter(|edge| edge.parent == parent)
            .ok_or(CustodyError::AttachmentNotFound { parent, component })
    }

    /// Resolves a slot by name and checks it has room, not counting `moving`.
    fn open_slot<'p, R>(
        tx: &R,
        parent: &'p Property,
        name: &str,
        moving: Option<PropertyId>,
    ) -> Result<&'p AttachmentPoint>
    where
        R: StoreRead + ?Sized,
    {
        let point = parent
            .attachment_point(name)
            .ok_or_else(|| CustodyError::InvalidSlot {
                parent: parent.id,
                slot: name.to_string(),
            })?;
        let occupied = tx
            .edges_for_parent(parent.id)?
            .iter()
            .filter(|e| e.slot.as_deref() == Some(name) && Some(e.component) != moving)
            .count();
        if point.is_full(occupied) {
            return Err(CustodyError::SlotFull {
                parent: parent.id,
                slot: name.to_string(),
            });
        }
        Ok(point)
    }

    fn ensure_not_in_transfer(item: &Property) -> Result<()> {
        match item.status {
            PropertyStatus::InTransfer => Err(CustodyError::TransferPending(item.id)),
            _ => Ok(()),
        }
    }
}

/// Category matching between a parent and a candidate component.
///
/// Compatible when the parent's filter (the named slot's, or any slot's
/// when no slot is given) lists the component's category, or when the
/// component lists the parent's category. Empty lists match nothing.
pub fn is_compatible(parent: &Property, component: &Property, slot: Option<&AttachmentPoint>) -> bool {
    let parent_accepts = match slot {
        Some(point) => point.accepts(&component.category),
        None => parent.accepts(&component.category),
    };
    parent_accepts || component.compatible_with.contains(&parent.category)
}
