//! `StoreRead` / `StoreTxn` over redb transactions.
//!
//! A table may be open only once at a time within a write transaction, so
//! every helper opens what it needs and drops it before returning.

use redb::{ReadTransaction, ReadableTable, TableDefinition, WriteTransaction};
use serde::Serialize;
use serde::de::DeserializeOwned;

use handreceipt_core::{
    AttachmentEdge, CustodyError, LedgerEvent, OutboxEntry, Property, PropertyId, Result,
    StoreRead, StoreTxn, TransferId, TransferRequest, TransferStatus, UserId,
};

use crate::error::StorageError;
use crate::tables::{
    COUNTERS, EDGES, LEDGER_OUTBOX, PARENT_EDGES, PENDING_BY_SUBJECT, PROPERTIES, SERIAL_INDEX,
    TRANSFERS,
};

const PROPERTY_COUNTER: &str = "property_id";
const EDGE_COUNTER: &str = "edge_sequence";
const TRANSFER_COUNTER: &str = "transfer_id";
const OUTBOX_COUNTER: &str = "outbox_sequence";

fn encode<T: Serialize>(value: &T) -> std::result::Result<Vec<u8>, StorageError> {
    postcard::to_allocvec(value).map_err(|e| StorageError::serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> std::result::Result<T, StorageError> {
    postcard::from_bytes(bytes).map_err(|e| StorageError::deserialization(e.to_string()))
}

fn get_record<T, Tb>(table: &Tb, key: u64) -> Result<Option<T>>
where
    T: DeserializeOwned,
    Tb: ReadableTable<u64, &'static [u8]>,
{
    match table.get(key).map_err(StorageError::database)? {
        Some(guard) => Ok(Some(decode(guard.value())?)),
        None => Ok(None),
    }
}

fn scan_records<T, Tb>(table: &Tb, newest_first: bool, limit: usize) -> Result<Vec<T>>
where
    T: DeserializeOwned,
    Tb: ReadableTable<u64, &'static [u8]>,
{
    let mut range = table.iter().map_err(StorageError::database)?;
    let mut records = Vec::new();
    while records.len() < limit {
        let entry = if newest_first {
            range.next_back()
        } else {
            range.next()
        };
        let Some(entry) = entry else { break };
        let (_, value) = entry.map_err(StorageError::database)?;
        records.push(decode(value.value())?);
    }
    Ok(records)
}

/// Read-only snapshot.
pub(crate) struct RedbReader {
    txn: ReadTransaction,
}

impl RedbReader {
    pub(crate) fn new(txn: ReadTransaction) -> Self {
        Self { txn }
    }
}

/// Open write transaction. Commit and abort belong to the store.
pub(crate) struct RedbWriter<'a> {
    txn: &'a WriteTransaction,
}

impl<'a> RedbWriter<'a> {
    pub(crate) fn new(txn: &'a WriteTransaction) -> Self {
        Self { txn }
    }

    fn next_id(&self, counter: &str) -> Result<u64> {
        let mut table = self
            .txn
            .open_table(COUNTERS)
            .map_err(StorageError::database)?;
        let last = table
            .get(counter)
            .map_err(StorageError::database)?
            .map(|v| v.value())
            .unwrap_or(0);
        let next = last + 1;
        table.insert(counter, next).map_err(StorageError::database)?;
        Ok(next)
    }

    fn put_record(
        &self,
        definition: TableDefinition<'static, u64, &'static [u8]>,
        key: u64,
        bytes: &[u8],
    ) -> Result<()> {
        let mut table = self
            .txn
            .open_table(definition)
            .map_err(StorageError::database)?;
        table.insert(key, bytes).map_err(StorageError::database)?;
        Ok(())
    }
}

macro_rules! impl_store_read {
    ($ty:ty) => {
        impl StoreRead for $ty {
            fn property(&self, id: PropertyId) -> Result<Option<Property>> {
                let table = self
                    .txn
                    .open_table(PROPERTIES)
                    .map_err(StorageError::database)?;
                get_record(&table, id.get())
            }

            fn property_by_serial(&self, serial: &str) -> Result<Option<Property>> {
                let id = {
                    let index = self
                        .txn
                        .open_table(SERIAL_INDEX)
                        .map_err(StorageError::database)?;
                    let found = index
                        .get(serial)
                        .map_err(StorageError::database)?
                        .map(|v| v.value());
                    found
                };
                match id {
                    Some(id) => {
                        let property = self.property(PropertyId(id))?;
                        property.map(Some).ok_or_else(|| {
                            StorageError::corrupt_index(format!("serial {serial:?} -> {id}")).into()
                        })
                    }
                    None => Ok(None),
                }
            }

            fn properties_held_by(&self, holder: UserId) -> Result<Vec<Property>> {
                let table = self
                    .txn
                    .open_table(PROPERTIES)
                    .map_err(StorageError::database)?;
                let all: Vec<Property> = scan_records(&table, false, usize::MAX)?;
                Ok(all.into_iter().filter(|p| p.holder == holder).collect())
            }

            fn edge_for_component(&self, component: PropertyId) -> Result<Option<AttachmentEdge>> {
                let table = self
                    .txn
                    .open_table(EDGES)
                    .map_err(StorageError::database)?;
                get_record(&table, component.get())
            }

            fn edges_for_parent(&self, parent: PropertyId) -> Result<Vec<AttachmentEdge>> {
                let components = {
                    let index = self
                        .txn
                        .open_table(PARENT_EDGES)
                        .map_err(StorageError::database)?;
                    let range = index
                        .range((parent.get(), 0)..=(parent.get(), u64::MAX))
                        .map_err(StorageError::database)?;
                    let mut components = Vec::new();
                    for entry in range {
                        let (_, component) = entry.map_err(StorageError::database)?;
                        components.push(component.value());
                    }
                    components
                };

                let table = self
                    .txn
                    .open_table(EDGES)
                    .map_err(StorageError::database)?;
                let mut edges = Vec::with_capacity(components.len());
                for component in components {
                    let edge: AttachmentEdge = get_record(&table, component)?.ok_or_else(|| {
                        CustodyError::from(StorageError::corrupt_index(format!(
                            "parent edge -> component {component}"
                        )))
                    })?;
                    edges.push(edge);
                }
                Ok(edges)
            }

            fn transfer(&self, id: TransferId) -> Result<Option<TransferRequest>> {
                let table = self
                    .txn
                    .open_table(TRANSFERS)
                    .map_err(StorageError::database)?;
                get_record(&table, id.get())
            }

            fn pending_transfer_for(&self, subject: PropertyId) -> Result<Option<TransferRequest>> {
                let id = {
                    let index = self
                        .txn
                        .open_table(PENDING_BY_SUBJECT)
                        .map_err(StorageError::database)?;
                    let found = index
                        .get(subject.get())
                        .map_err(StorageError::database)?
                        .map(|v| v.value());
                    found
                };
                match id {
                    Some(id) => self.transfer(TransferId(id)),
                    None => Ok(None),
                }
            }

            fn transfers_involving(&self, user: UserId) -> Result<Vec<TransferRequest>> {
                let table = self
                    .txn
                    .open_table(TRANSFERS)
                    .map_err(StorageError::database)?;
                let all: Vec<TransferRequest> = scan_records(&table, true, usize::MAX)?;
                Ok(all.into_iter().filter(|t| t.involves(user)).collect())
            }

            fn outbox(&self, limit: usize) -> Result<Vec<OutboxEntry>> {
                let table = self
                    .txn
                    .open_table(LEDGER_OUTBOX)
                    .map_err(StorageError::database)?;
                scan_records(&table, false, limit)
            }
        }
    };
}

impl_store_read!(RedbReader);
impl_store_read!(RedbWriter<'_>);

impl StoreTxn for RedbWriter<'_> {
    fn insert_property(&mut self, mut property: Property) -> Result<Property> {
        {
            let index = self
                .txn
                .open_table(SERIAL_INDEX)
                .map_err(StorageError::database)?;
            if index
                .get(property.serial_number.as_str())
                .map_err(StorageError::database)?
                .is_some()
            {
                return Err(CustodyError::DuplicateSerial(property.serial_number));
            }
        }

        property.id = PropertyId(self.next_id(PROPERTY_COUNTER)?);
        {
            let mut index = self
                .txn
                .open_table(SERIAL_INDEX)
                .map_err(StorageError::database)?;
            index
                .insert(property.serial_number.as_str(), property.id.get())
                .map_err(StorageError::database)?;
        }
        self.put_record(PROPERTIES, property.id.get(), &encode(&property)?)?;
        Ok(property)
    }

    fn update_property(&mut self, property: &Property) -> Result<()> {
        let existing = self
            .property(property.id)?
            .ok_or(CustodyError::PropertyNotFound(property.id))?;
        if existing.serial_number != property.serial_number {
            return Err(CustodyError::InvalidProperty(
                "serial numbers are immutable".into(),
            ));
        }
        self.put_record(PROPERTIES, property.id.get(), &encode(property)?)
    }

    fn insert_edge(&mut self, mut edge: AttachmentEdge) -> Result<AttachmentEdge> {
        if self.edge_for_component(edge.component)?.is_some() {
            return Err(CustodyError::AlreadyAttached(edge.component));
        }

        edge.sequence = self.next_id(EDGE_COUNTER)?;
        self.put_record(EDGES, edge.component.get(), &encode(&edge)?)?;
        let mut index = self
            .txn
            .open_table(PARENT_EDGES)
            .map_err(StorageError::database)?;
        index
            .insert((edge.parent.get(), edge.sequence), edge.component.get())
            .map_err(StorageError::database)?;
        Ok(edge)
    }

    fn update_edge(&mut self, edge: &AttachmentEdge) -> Result<()> {
        match self.edge_for_component(edge.component)? {
            Some(existing) if existing.parent == edge.parent && existing.sequence == edge.sequence => {
                self.put_record(EDGES, edge.component.get(), &encode(edge)?)
            }
            _ => Err(CustodyError::AttachmentNotFound {
                parent: edge.parent,
                component: edge.component,
            }),
        }
    }

    fn remove_edge(&mut self, component: PropertyId) -> Result<Option<AttachmentEdge>> {
        let removed: Option<AttachmentEdge> = {
            let mut table = self
                .txn
                .open_table(EDGES)
                .map_err(StorageError::database)?;
            let removed = table
                .remove(component.get())
                .map_err(StorageError::database)?;
            match removed {
                Some(guard) => Some(decode(guard.value())?),
                None => None,
            }
        };

        if let Some(edge) = &removed {
            let mut index = self
                .txn
                .open_table(PARENT_EDGES)
                .map_err(StorageError::database)?;
            index
                .remove((edge.parent.get(), edge.sequence))
                .map_err(StorageError::database)?;
        }
        Ok(removed)
    }

    fn insert_transfer(&mut self, mut request: TransferRequest) -> Result<TransferRequest> {
        let pending = request.status == TransferStatus::Pending;
        if pending && self.pending_transfer_for(request.subject)?.is_some() {
            return Err(CustodyError::DuplicatePendingRequest(request.subject));
        }

        request.id = TransferId(self.next_id(TRANSFER_COUNTER)?);
        self.put_record(TRANSFERS, request.id.get(), &encode(&request)?)?;
        if pending {
            let mut index = self
                .txn
                .open_table(PENDING_BY_SUBJECT)
                .map_err(StorageError::database)?;
            index
                .insert(request.subject.get(), request.id.get())
                .map_err(StorageError::database)?;
        }
        Ok(request)
    }

    fn update_transfer(&mut self, request: &TransferRequest) -> Result<()> {
        if self.transfer(request.id)?.is_none() {
            return Err(CustodyError::TransferNotFound(request.id));
        }
        self.put_record(TRANSFERS, request.id.get(), &encode(request)?)?;

        if request.status != TransferStatus::Pending {
            let mut index = self
                .txn
                .open_table(PENDING_BY_SUBJECT)
                .map_err(StorageError::database)?;
            let holds_slot = index
                .get(request.subject.get())
                .map_err(StorageError::database)?
                .is_some_and(|v| v.value() == request.id.get());
            if holds_slot {
                index
                    .remove(request.subject.get())
                    .map_err(StorageError::database)?;
            }
        }
        Ok(())
    }

    fn enqueue_event(&mut self, event: LedgerEvent) -> Result<u64> {
        let sequence = self.next_id(OUTBOX_COUNTER)?;
        let entry = OutboxEntry::new(sequence, event);
        self.put_record(LEDGER_OUTBOX, sequence, &encode(&entry)?)?;
        Ok(sequence)
    }

    fn ack_event(&mut self, sequence: u64) -> Result<()> {
        let mut table = self
            .txn
            .open_table(LEDGER_OUTBOX)
            .map_err(StorageError::database)?;
        table.remove(sequence).map_err(StorageError::database)?;
        Ok(())
    }

    fn record_attempt(&mut self, sequence: u64, error: &str) -> Result<()> {
        let entry: Option<OutboxEntry> = {
            let table = self
                .txn
                .open_table(LEDGER_OUTBOX)
                .map_err(StorageError::database)?;
            get_record(&table, sequence)?
        };
        if let Some(mut entry) = entry {
            entry.attempts += 1;
            entry.last_error = Some(error.to_string());
            self.put_record(LEDGER_OUTBOX, sequence, &encode(&entry)?)?;
        }
        Ok(())
    }
}
