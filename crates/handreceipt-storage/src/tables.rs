//! redb table definitions and the custody store
//!
//! Record values are postcard-encoded domain types.

use std::path::PathBuf;
use std::sync::Arc;

use redb::{Database, TableDefinition};
use tracing::{debug, info, instrument, warn};

use handreceipt_core::{CustodyStore, Result, StoreRead, StoreTxn};

use crate::error::StorageError;
use crate::txn::{RedbReader, RedbWriter};

// Table definitions
// Key: property id, Value: serialized Property
pub const PROPERTIES: TableDefinition<u64, &[u8]> = TableDefinition::new("properties");

// Key: serial number, Value: property id
pub const SERIAL_INDEX: TableDefinition<&str, u64> = TableDefinition::new("serial_index");

// Key: component id, Value: serialized AttachmentEdge
pub const EDGES: TableDefinition<u64, &[u8]> = TableDefinition::new("edges");

// Key: (parent id, edge sequence), Value: component id
pub const PARENT_EDGES: TableDefinition<(u64, u64), u64> = TableDefinition::new("parent_edges");

// Key: transfer id, Value: serialized TransferRequest
pub const TRANSFERS: TableDefinition<u64, &[u8]> = TableDefinition::new("transfers");

// Key: subject property id, Value: id of its pending transfer
pub const PENDING_BY_SUBJECT: TableDefinition<u64, u64> =
    TableDefinition::new("pending_by_subject");

// Key: outbox sequence, Value: serialized OutboxEntry
pub const LEDGER_OUTBOX: TableDefinition<u64, &[u8]> = TableDefinition::new("ledger_outbox");

// Key: counter name, Value: last issued value
pub const COUNTERS: TableDefinition<&str, u64> = TableDefinition::new("counters");

/// Configuration for redb storage
#[derive(Debug, Clone)]
pub struct RedbStorageConfig {
    /// Path to the database file
    pub db_path: PathBuf,
    /// Cache size in bytes
    pub cache_size: usize,
}

impl Default for RedbStorageConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./data/handreceipt.redb"),
            cache_size: 64 * 1024 * 1024, // 64MB
        }
    }
}

/// Custody store persisted in a single redb file.
///
/// redb allows one write transaction at a time, so engine operations are
/// serialized; readers see the last committed state.
pub struct RedbCustodyStore {
    db: Arc<Database>,
    config: RedbStorageConfig,
}

impl RedbCustodyStore {
    /// Open or create the database
    #[instrument(skip(config), fields(path = %config.db_path.display()))]
    pub fn open(config: RedbStorageConfig) -> std::result::Result<Self, StorageError> {
        if let Some(parent) = config.db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::builder()
            .set_cache_size(config.cache_size)
            .create(&config.db_path)
            .map_err(|e| StorageError::Io(e.to_string()))?;

        info!("Opened redb database");

        let store = Self {
            db: Arc::new(db),
            config,
        };
        store.init_tables()?;
        Ok(store)
    }

    /// Initialize all tables
    fn init_tables(&self) -> std::result::Result<(), StorageError> {
        let write_txn = self.db.begin_write().map_err(StorageError::database)?;

        // Create tables if they don't exist
        write_txn
            .open_table(PROPERTIES)
            .map_err(StorageError::database)?;
        write_txn
            .open_table(SERIAL_INDEX)
            .map_err(StorageError::database)?;
        write_txn.open_table(EDGES).map_err(StorageError::database)?;
        write_txn
            .open_table(PARENT_EDGES)
            .map_err(StorageError::database)?;
        write_txn
            .open_table(TRANSFERS)
            .map_err(StorageError::database)?;
        write_txn
            .open_table(PENDING_BY_SUBJECT)
            .map_err(StorageError::database)?;
        write_txn
            .open_table(LEDGER_OUTBOX)
            .map_err(StorageError::database)?;
        write_txn
            .open_table(COUNTERS)
            .map_err(StorageError::database)?;

        write_txn.commit().map_err(StorageError::database)?;

        debug!("Initialized redb tables");
        Ok(())
    }

    /// Get the configuration
    pub fn config(&self) -> &RedbStorageConfig {
        &self.config
    }
}

impl CustodyStore for RedbCustodyStore {
    fn transact<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut dyn StoreTxn) -> Result<T>,
    {
        let write_txn = self.db.begin_write().map_err(StorageError::database)?;
        let outcome = {
            let mut writer = RedbWriter::new(&write_txn);
            f(&mut writer)
        };

        match outcome {
            Ok(value) => {
                write_txn.commit().map_err(StorageError::database)?;
                Ok(value)
            }
            Err(err) => {
                if let Err(abort) = write_txn.abort() {
                    warn!(error = %abort, "failed to abort write transaction");
                }
                Err(err)
            }
        }
    }

    fn read<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&dyn StoreRead) -> Result<T>,
    {
        let read_txn = self.db.begin_read().map_err(StorageError::database)?;
        f(&RedbReader::new(read_txn))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use handreceipt_core::{CustodyError, NewProperty, PropertyId, UserId};
    use tempfile::TempDir;

    fn create_test_store() -> (RedbCustodyStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let config = RedbStorageConfig {
            db_path: temp_dir.path().join("test.redb"),
            ..Default::default()
        };
        let store = RedbCustodyStore::open(config).unwrap();
        (store, temp_dir)
    }

    fn rifle(serial: &str) -> handreceipt_core::Property {
        NewProperty::new(serial, "M4", "rifle", UserId(1))
            .into_property(0)
            .unwrap()
    }

    #[test]
    fn test_open_creates_parent_dirs() {
        let temp_dir = TempDir::new().unwrap();
        let config = RedbStorageConfig {
            db_path: temp_dir.path().join("nested/dir/custody.redb"),
            ..Default::default()
        };
        let store = RedbCustodyStore::open(config).unwrap();
        assert!(store.config().db_path.exists());
    }

    #[test]
    fn test_commit_on_ok() {
        let (store, _temp) = create_test_store();
        let inserted = store
            .transact(|tx| tx.insert_property(rifle("RIFLE-001")))
            .unwrap();
        assert_eq!(inserted.id, PropertyId(1));

        let loaded = store.read(|tx| tx.require_property(inserted.id)).unwrap();
        assert_eq!(loaded, inserted);
    }

    #[test]
    fn test_abort_on_err() {
        let (store, _temp) = create_test_store();
        let result: Result<()> = store.transact(|tx| {
            tx.insert_property(rifle("RIFLE-001"))?;
            Err(CustodyError::storage("fail after write"))
        });
        assert!(result.is_err());

        assert!(
            store
                .read(|tx| tx.property_by_serial("RIFLE-001"))
                .unwrap()
                .is_none()
        );
        // The id counter rolled back with the rest.
        let next = store
            .transact(|tx| tx.insert_property(rifle("RIFLE-002")))
            .unwrap();
        assert_eq!(next.id, PropertyId(1));
    }
}
