use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;

use crate::attachment::AttachmentEdge;
use crate::error::{CustodyError, Result};
use crate::event::{LedgerEvent, LedgerEventKind, OutboxEntry};
use crate::property::{Property, PropertyId, TransferId, UserId};
use crate::transfer::{TransferRequest, TransferStatus};

// ---------------------------------------------------------------------------
// Store traits
// ---------------------------------------------------------------------------

/// Read access to custody state, inside a transaction or a snapshot.
pub trait StoreRead {
    fn property(&self, id: PropertyId) -> Result<Option<Property>>;
    fn property_by_serial(&self, serial: &str) -> Result<Option<Property>>;
    /// Properties held by `holder`, ordered by id.
    fn properties_held_by(&self, holder: UserId) -> Result<Vec<Property>>;

    fn edge_for_component(&self, component: PropertyId) -> Result<Option<AttachmentEdge>>;
    /// Edges hosted by `parent`, in insertion order.
    fn edges_for_parent(&self, parent: PropertyId) -> Result<Vec<AttachmentEdge>>;

    fn transfer(&self, id: TransferId) -> Result<Option<TransferRequest>>;
    fn pending_transfer_for(&self, subject: PropertyId) -> Result<Option<TransferRequest>>;
    /// Requests where `user` is initiator, source holder or destination, newest first.
    fn transfers_involving(&self, user: UserId) -> Result<Vec<TransferRequest>>;

    /// Undelivered outbox entries in commit order.
    fn outbox(&self, limit: usize) -> Result<Vec<OutboxEntry>>;

    fn require_property(&self, id: PropertyId) -> Result<Property> {
        self.property(id)?
            .ok_or(CustodyError::PropertyNotFound(id))
    }

    fn require_transfer(&self, id: TransferId) -> Result<TransferRequest> {
        self.transfer(id)?.ok_or(CustodyError::TransferNotFound(id))
    }
}

/// Mutations available inside a write transaction.
///
/// Inserts assign identity (property id, edge sequence, transfer id, outbox
/// sequence). Uniqueness is enforced here, not by callers:
/// `insert_edge` rejects a second edge for a component with
/// [`CustodyError::AlreadyAttached`], `insert_transfer` rejects a second
/// pending request for a subject with [`CustodyError::DuplicatePendingRequest`],
/// and `insert_property` rejects a reused serial with
/// [`CustodyError::DuplicateSerial`].
pub trait StoreTxn: StoreRead {
    fn insert_property(&mut self, property: Property) -> Result<Property>;
    fn update_property(&mut self, property: &Property) -> Result<()>;

    fn insert_edge(&mut self, edge: AttachmentEdge) -> Result<AttachmentEdge>;
    fn update_edge(&mut self, edge: &AttachmentEdge) -> Result<()>;
    fn remove_edge(&mut self, component: PropertyId) -> Result<Option<AttachmentEdge>>;

    fn insert_transfer(&mut self, request: TransferRequest) -> Result<TransferRequest>;
    /// Replaces a request; leaving `Pending` releases the subject's pending slot.
    fn update_transfer(&mut self, request: &TransferRequest) -> Result<()>;

    fn enqueue_event(&mut self, event: LedgerEvent) -> Result<u64>;
    fn ack_event(&mut self, sequence: u64) -> Result<()>;
    fn record_attempt(&mut self, sequence: u64, error: &str) -> Result<()>;
}

/// A transactional custody backend.
///
/// `transact` runs the closure as one serializable unit: its writes become
/// visible together when it returns `Ok`, and not at all when it returns
/// `Err`.
pub trait CustodyStore: Send + Sync + 'static {
    fn transact<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut dyn StoreTxn) -> Result<T>;

    fn read<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&dyn StoreRead) -> Result<T>;
}

// ---------------------------------------------------------------------------
// UnitOfWork
// ---------------------------------------------------------------------------

/// One engine operation in flight: the open transaction, the operation's
/// clock reading, and the audit events it has produced so far.
pub struct UnitOfWork<'t> {
    tx: &'t mut dyn StoreTxn,
    now: i64,
    events: Vec<LedgerEvent>,
}

impl<'t> UnitOfWork<'t> {
    pub fn new(tx: &'t mut dyn StoreTxn, now: i64) -> Self {
        Self {
            tx,
            now,
            events: Vec::new(),
        }
    }

    pub fn now(&self) -> i64 {
        self.now
    }

    pub fn store(&mut self) -> &mut (dyn StoreTxn + 't) {
        &mut *self.tx
    }

    pub fn emit(&mut self, actor: UserId, kind: LedgerEventKind) {
        self.events.push(LedgerEvent::new(kind, actor, self.now));
    }

    pub fn events(&self) -> &[LedgerEvent] {
        &self.events
    }

    /// Writes the emitted events to the outbox and hands them back.
    pub fn finish(self) -> Result<Vec<LedgerEvent>> {
        for event in &self.events {
            self.tx.enqueue_event(event.clone())?;
        }
        Ok(self.events)
    }
}

// ---------------------------------------------------------------------------
// InMemoryCustodyStore
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
struct State {
    properties: BTreeMap<PropertyId, Property>,
    serials: HashMap<String, PropertyId>,
    /// Keyed by component: one edge per component.
    edges: HashMap<PropertyId, AttachmentEdge>,
    transfers: BTreeMap<TransferId, TransferRequest>,
    /// Keyed by subject: one pending request per property.
    pending: HashMap<PropertyId, TransferId>,
    outbox: BTreeMap<u64, OutboxEntry>,
    last_property_id: u64,
    last_edge_sequence: u64,
    last_transfer_id: u64,
    last_outbox_sequence: u64,
}

/// In-memory custody store.
///
/// A transaction works on a copy of the state under a global lock and swaps
/// it in on success, so transactions are fully serialized.
#[derive(Default)]
pub struct InMemoryCustodyStore {
    state: Mutex<State>,
}

impl InMemoryCustodyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CustodyStore for InMemoryCustodyStore {
    fn transact<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut dyn StoreTxn) -> Result<T>,
    {
        let mut state = self.state.lock();
        let mut working = state.clone();
        let value = f(&mut working)?;
        *state = working;
        Ok(value)
    }

    fn read<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&dyn StoreRead) -> Result<T>,
    {
        let state = self.state.lock();
        f(&*state)
    }
}

impl StoreRead for State {
    fn property(&self, id: PropertyId) -> Result<Option<Property>> {
        Ok(self.properties.get(&id).cloned())
    }

    fn property_by_serial(&self, serial: &str) -> Result<Option<Property>> {
        Ok(self
            .serials
            .get(serial)
            .and_then(|id| self.properties.get(id))
            .cloned())
    }

    fn properties_held_by(&self, holder: UserId) -> Result<Vec<Property>> {
        Ok(self
            .properties
            .values()
            .filter(|p| p.holder == holder)
            .cloned()
            .collect())
    }

    fn edge_for_component(&self, component: PropertyId) -> Result<Option<AttachmentEdge>> {
        Ok(self.edges.get(&component).cloned())
    }

    fn edges_for_parent(&self, parent: PropertyId) -> Result<Vec<AttachmentEdge>> {
        let mut edges: Vec<_> = self
            .edges
            .values()
            .filter(|e| e.parent == parent)
            .cloned()
            .collect();
        edges.sort_by_key(|e| e.sequence);
        Ok(edges)
    }

    fn transfer(&self, id: TransferId) -> Result<Option<TransferRequest>> {
        Ok(self.transfers.get(&id).cloned())
    }

    fn pending_transfer_for(&self, subject: PropertyId) -> Result<Option<TransferRequest>> {
        Ok(self
            .pending
            .get(&subject)
            .and_then(|id| self.transfers.get(id))
            .cloned())
    }

    fn transfers_involving(&self, user: UserId) -> Result<Vec<TransferRequest>> {
        Ok(self
            .transfers
            .values()
            .rev()
            .filter(|t| t.involves(user))
            .cloned()
            .collect())
    }

    fn outbox(&self, limit: usize) -> Result<Vec<OutboxEntry>> {
        Ok(self.outbox.values().take(limit).cloned().collect())
    }
}

impl StoreTxn for State {
    fn insert_property(&mut self, mut property: Property) -> Result<Property> {
        if self.serials.contains_key(&property.serial_number) {
            return Err(CustodyError::DuplicateSerial(property.serial_number));
        }
        self.last_property_id += 1;
        property.id = PropertyId(self.last_property_id);
        self.serials
            .insert(property.serial_number.clone(), property.id);
        self.properties.insert(property.id, property.clone());
        Ok(property)
    }

    fn update_property(&mut self, property: &Property) -> Result<()> {
        let slot = self
            .properties
            .get_mut(&property.id)
            .ok_or(CustodyError::PropertyNotFound(property.id))?;
        if slot.serial_number != property.serial_number {
            return Err(CustodyError::InvalidProperty(
                "serial numbers are immutable".into(),
            ));
        }
        *slot = property.clone();
        Ok(())
    }

    fn insert_edge(&mut self, mut edge: AttachmentEdge) -> Result<AttachmentEdge> {
        if self.edges.contains_key(&edge.component) {
            return Err(CustodyError::AlreadyAttached(edge.component));
        }
        self.last_edge_sequence += 1;
        edge.sequence = self.last_edge_sequence;
        self.edges.insert(edge.component, edge.clone());
        Ok(edge)
    }

    fn update_edge(&mut self, edge: &AttachmentEdge) -> Result<()> {
        match self.edges.get_mut(&edge.component) {
            Some(slot) if slot.parent == edge.parent => {
                *slot = edge.clone();
                Ok(())
            }
            _ => Err(CustodyError::AttachmentNotFound {
                parent: edge.parent,
                component: edge.component,
            }),
        }
    }

    fn remove_edge(&mut self, component: PropertyId) -> Result<Option<AttachmentEdge>> {
        Ok(self.edges.remove(&component))
    }

    fn insert_transfer(&mut self, mut request: TransferRequest) -> Result<TransferRequest> {
        if request.status == TransferStatus::Pending && self.pending.contains_key(&request.subject)
        {
            return Err(CustodyError::DuplicatePendingRequest(request.subject));
        }
        self.last_transfer_id += 1;
        request.id = TransferId(self.last_transfer_id);
        if request.status == TransferStatus::Pending {
            self.pending.insert(request.subject, request.id);
        }
        self.transfers.insert(request.id, request.clone());
        Ok(request)
    }

    fn update_transfer(&mut self, request: &TransferRequest) -> Result<()> {
        let slot = self
            .transfers
            .get_mut(&request.id)
            .ok_or(CustodyError::TransferNotFound(request.id))?;
        *slot = request.clone();
        if request.status != TransferStatus::Pending
            && self.pending.get(&request.subject) == Some(&request.id)
        {
            self.pending.remove(&request.subject);
        }
        Ok(())
    }

    fn enqueue_event(&mut self, event: LedgerEvent) -> Result<u64> {
        self.last_outbox_sequence += 1;
        let sequence = self.last_outbox_sequence;
        self.outbox.insert(sequence, OutboxEntry::new(sequence, event));
        Ok(sequence)
    }

    fn ack_event(&mut self, sequence: u64) -> Result<()> {
        self.outbox.remove(&sequence);
        Ok(())
    }

    fn record_attempt(&mut self, sequence: u64, error: &str) -> Result<()> {
        if let Some(entry) = self.outbox.get_mut(&sequence) {
            entry.attempts += 1;
            entry.last_error = Some(error.to_string());
        }
        Ok(())
    }
}
