//! Audit events produced by committed transitions.
//!
//! Events are written to the store's outbox in the same transaction as the
//! mutation they describe. Forwarding them to the ledger happens later and
//! never feeds back into the domain state.

use serde::{Deserialize, Serialize};

use crate::attachment::AttachmentKind;
use crate::property::{PropertyId, TransferId, UserId};
use crate::transfer::InitiationMethod;

/// Why an attachment edge was removed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DetachReason {
    /// Removed by the parent's holder.
    Manual,
    /// The parent changed hands without its components.
    TransferExcluded,
    /// The component itself changed hands.
    SubjectTransferred,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all_fields = "camelCase")]
pub enum LedgerEventKind {
    PropertyRegistered {
        property: PropertyId,
        serial_number: String,
        holder: UserId,
    },
    PropertyRetired {
        property: PropertyId,
    },
    ComponentAttached {
        parent: PropertyId,
        component: PropertyId,
        slot: Option<String>,
        attachment: AttachmentKind,
    },
    ComponentDetached {
        parent: PropertyId,
        component: PropertyId,
        slot: Option<String>,
        reason: DetachReason,
    },
    ComponentRepositioned {
        parent: PropertyId,
        component: PropertyId,
        from_slot: Option<String>,
        to_slot: Option<String>,
    },
    TransferCreated {
        transfer: TransferId,
        subject: PropertyId,
        from: UserId,
        to: UserId,
        method: InitiationMethod,
        include_components: bool,
    },
    TransferApproved {
        transfer: TransferId,
        subject: PropertyId,
        from: UserId,
        to: UserId,
        moved_components: Vec<PropertyId>,
        detached_components: Vec<PropertyId>,
        /// Parent the subject was unmounted from.
        detached_from: Option<PropertyId>,
    },
    TransferRejected {
        transfer: TransferId,
        subject: PropertyId,
    },
    TransferCancelled {
        transfer: TransferId,
        subject: PropertyId,
    },
    OwnershipChanged {
        property: PropertyId,
        from: UserId,
        to: UserId,
        transfer: TransferId,
    },
}

/// An entity an event can be looked up by.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntityRef {
    Property(PropertyId),
    Transfer(TransferId),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEvent {
    pub kind: LedgerEventKind,
    pub actor: UserId,
    pub recorded_at: i64,
}

impl LedgerEvent {
    pub fn new(kind: LedgerEventKind, actor: UserId, recorded_at: i64) -> Self {
        Self {
            kind,
            actor,
            recorded_at,
        }
    }

    /// Variant name, as used in logs and ledger queries.
    pub fn name(&self) -> &'static str {
        match &self.kind {
            LedgerEventKind::PropertyRegistered { .. } => "PropertyRegistered",
            LedgerEventKind::PropertyRetired { .. } => "PropertyRetired",
            LedgerEventKind::ComponentAttached { .. } => "ComponentAttached",
            LedgerEventKind::ComponentDetached { .. } => "ComponentDetached",
            LedgerEventKind::ComponentRepositioned { .. } => "ComponentRepositioned",
            LedgerEventKind::TransferCreated { .. } => "TransferCreated",
            LedgerEventKind::TransferApproved { .. } => "TransferApproved",
            LedgerEventKind::TransferRejected { .. } => "TransferRejected",
            LedgerEventKind::TransferCancelled { .. } => "TransferCancelled",
            LedgerEventKind::OwnershipChanged { .. } => "OwnershipChanged",
        }
    }

    /// Every entity this event refers to.
    pub fn entities(&self) -> Vec<EntityRef> {
        use EntityRef::{Property, Transfer};
        match &self.kind {
            LedgerEventKind::PropertyRegistered { property, .. }
            | LedgerEventKind::PropertyRetired { property } => vec![Property(*property)],
            LedgerEventKind::ComponentAttached {
                parent, component, ..
            }
            | LedgerEventKind::ComponentDetached {
                parent, component, ..
            }
            | LedgerEventKind::ComponentRepositioned {
                parent, component, ..
            } => vec![Property(*parent), Property(*component)],
            LedgerEventKind::TransferCreated {
                transfer, subject, ..
            }
            | LedgerEventKind::TransferRejected { transfer, subject }
            | LedgerEventKind::TransferCancelled { transfer, subject } => {
                vec![Transfer(*transfer), Property(*subject)]
            }
            LedgerEventKind::TransferApproved {
                transfer,
                subject,
                moved_components,
                detached_components,
                detached_from,
                ..
            } => {
                let mut refs = vec![Transfer(*transfer), Property(*subject)];
                refs.extend(moved_components.iter().map(|id| Property(*id)));
                refs.extend(detached_components.iter().map(|id| Property(*id)));
                refs.extend(detached_from.map(Property));
                refs
            }
            LedgerEventKind::OwnershipChanged {
                property, transfer, ..
            } => vec![Property(*property), Transfer(*transfer)],
        }
    }

    pub fn concerns(&self, entity: EntityRef) -> bool {
        self.entities().contains(&entity)
    }
}

/// A committed event waiting to be forwarded to the ledger.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxEntry {
    /// Position in commit order; also the ledger idempotency key.
    pub sequence: u64,
    pub event: LedgerEvent,
    pub attempts: u32,
    pub last_error: Option<String>,
}

impl OutboxEntry {
    pub fn new(sequence: u64, event: LedgerEvent) -> Self {
        Self {
            sequence,
            event,
            attempts: 0,
            last_error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attach_event_names_both_sides() {
        let event = LedgerEvent::new(
            LedgerEventKind::ComponentAttached {
                parent: PropertyId(1),
                component: PropertyId(2),
                slot: Some("rail-top".into()),
                attachment: AttachmentKind::Field,
            },
            UserId(7),
            100,
        );
        assert_eq!(event.name(), "ComponentAttached");
        assert!(event.concerns(EntityRef::Property(PropertyId(1))));
        assert!(event.concerns(EntityRef::Property(PropertyId(2))));
        assert!(!event.concerns(EntityRef::Property(PropertyId(3))));
    }

    #[test]
    fn test_approval_event_names_moved_components() {
        let event = LedgerEvent::new(
            LedgerEventKind::TransferApproved {
                transfer: TransferId(4),
                subject: PropertyId(1),
                from: UserId(1),
                to: UserId(2),
                moved_components: vec![PropertyId(2), PropertyId(3)],
                detached_components: vec![],
                detached_from: None,
            },
            UserId(1),
            100,
        );
        let entities = event.entities();
        assert_eq!(entities.len(), 4);
        assert!(entities.contains(&EntityRef::Transfer(TransferId(4))));
        assert!(entities.contains(&EntityRef::Property(PropertyId(3))));
    }

    #[test]
    fn test_approval_event_names_former_parent() {
        let event = LedgerEvent::new(
            LedgerEventKind::TransferApproved {
                transfer: TransferId(5),
                subject: PropertyId(2),
                from: UserId(1),
                to: UserId(2),
                moved_components: vec![],
                detached_components: vec![],
                detached_from: Some(PropertyId(1)),
            },
            UserId(1),
            100,
        );
        assert!(event.concerns(EntityRef::Property(PropertyId(1))));
        assert_eq!(event.entities().len(), 3);
    }

    #[test]
    fn test_event_json_shape() {
        let event = LedgerEvent::new(
            LedgerEventKind::TransferRejected {
                transfer: TransferId(4),
                subject: PropertyId(1),
            },
            UserId(1),
            5,
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"]["TransferRejected"]["transfer"], 4);
        assert_eq!(json["recordedAt"], 5);
    }
}
