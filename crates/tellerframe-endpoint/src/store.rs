//! Durable block store backed by redb.
//!
//! Every [`RecordKey`] maps to one row in a single table. Each block write is
//! its own write transaction, so a crash between two writes leaves the first
//! durable and the second absent, which is the guarantee the vault's write
//! ordering relies on.
//!
//! Calls block the runtime thread until the commit is on disk, including the
//! 128 slot clears before a vault's first provisioning. An endpoint serves a
//! single session at a time, so there is nothing else for the thread to do
//! meanwhile.

use std::path::Path;

use redb::{Database, ReadableTable, TableDefinition};
use tellerframe_core::{Block, PersistentStore, RecordKey, StoreError};
use thiserror::Error;

const BLOCKS: TableDefinition<&str, &[u8]> = TableDefinition::new("blocks");

/// Failure opening or using the database.
#[derive(Debug, Error)]
pub enum RedbStoreError {
    /// Error reported by redb.
    #[error("redb: {0}")]
    Database(#[from] redb::Error),
}

impl From<RedbStoreError> for StoreError {
    fn from(err: RedbStoreError) -> Self {
        Self::Backend(Box::new(err))
    }
}

/// [`PersistentStore`] persisted in a redb file.
pub struct RedbStore {
    db: Database,
}

impl std::fmt::Debug for RedbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbStore").finish_non_exhaustive()
    }
}

impl RedbStore {
    /// Open the store at `path`, creating an erased one if it does not exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RedbStoreError> {
        let db = Database::create(path).map_err(redb::Error::from)?;

        // Create the table up front so reads never see a missing table
        let txn = db.begin_write().map_err(redb::Error::from)?;
        txn.open_table(BLOCKS).map_err(redb::Error::from)?;
        txn.commit().map_err(redb::Error::from)?;

        Ok(Self { db })
    }

    fn read_row(&self, name: &str) -> Result<Option<Vec<u8>>, redb::Error> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(BLOCKS)?;
        Ok(table.get(name)?.map(|value| value.value().to_vec()))
    }

    fn write_row(&self, name: &str, bytes: &[u8]) -> Result<(), redb::Error> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(BLOCKS)?;
            table.insert(name, bytes)?;
        }
        txn.commit()?;
        Ok(())
    }
}

impl PersistentStore for RedbStore {
    fn read(&self, key: RecordKey) -> Result<Block, StoreError> {
        if !key.is_valid() {
            return Err(StoreError::InvalidKey(key));
        }

        match self.read_row(&key.name()).map_err(RedbStoreError::from)? {
            Some(bytes) => Block::from_bytes(&bytes),
            None => Ok(Block::ERASED),
        }
    }

    fn write(&mut self, key: RecordKey, block: &Block) -> Result<(), StoreError> {
        if !key.is_valid() {
            return Err(StoreError::InvalidKey(key));
        }

        self.write_row(&key.name(), block.as_bytes()).map_err(RedbStoreError::from)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use tellerframe_core::{BILL_SLOTS, Endpoint, MemoryStore, Vault};
    use tellerframe_proto::{SessionMode, literals};
    use tempfile::TempDir;

    use super::*;

    fn open(dir: &TempDir) -> RedbStore {
        RedbStore::open(dir.path().join("endpoint.redb")).unwrap()
    }

    #[test]
    fn fresh_store_is_erased() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);

        assert!(store.read(RecordKey::Uuid).unwrap().is_erased());
        assert!(!store.is_provisioned().unwrap());
    }

    #[test]
    fn blocks_survive_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let mut store = open(&dir);
            store.write(RecordKey::Pin, &Block::from_field(b"12345678").unwrap()).unwrap();
            store.write(RecordKey::Bill(42), &Block::from_field(b"bill").unwrap()).unwrap();
            store.mark_provisioned().unwrap();
        }

        let store = open(&dir);
        assert!(store.is_provisioned().unwrap());
        assert_eq!(store.read(RecordKey::Pin).unwrap().field(8), b"12345678");
        assert_eq!(store.read(RecordKey::Bill(42)).unwrap().field(4), b"bill");
    }

    #[test]
    fn overwrite_replaces_block() {
        let dir = TempDir::new().unwrap();
        let mut store = open(&dir);

        store.write(RecordKey::Uuid, &Block::from_field(b"first-uuid").unwrap()).unwrap();
        store.write(RecordKey::Uuid, &Block::from_field(b"2nd").unwrap()).unwrap();

        assert_eq!(store.read(RecordKey::Uuid).unwrap().field(5), b"2nd\0\0");
    }

    #[test]
    fn out_of_range_slot_rejected() {
        let dir = TempDir::new().unwrap();
        let mut store = open(&dir);

        let result = store.write(RecordKey::Bill(200), &Block::ERASED);
        assert!(matches!(result, Err(StoreError::InvalidKey(RecordKey::Bill(200)))));
    }

    #[test]
    fn vault_slot_clears_are_durable() {
        let dir = TempDir::new().unwrap();
        {
            let mut store = open(&dir);
            let mode = Vault::new().begin_session(&mut store).unwrap();
            assert_eq!(mode, SessionMode::Provisioning);
        }

        let store = open(&dir);
        assert!(!store.is_provisioned().unwrap());
        assert_eq!(Vault::loaded_slots(&store).unwrap(), 0);
        for slot in 0..BILL_SLOTS as u8 {
            assert_eq!(Vault::bill(&store, slot).unwrap(), literals::EMPTY_BILL);
        }
    }

    fn key_strategy() -> impl Strategy<Value = RecordKey> {
        prop_oneof![
            Just(RecordKey::Provisioned),
            Just(RecordKey::Pin),
            Just(RecordKey::Uuid),
            Just(RecordKey::Ledger),
            (0..BILL_SLOTS as u8).prop_map(RecordKey::Bill),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        /// Any write sequence leaves redb reading back what memory does.
        #[test]
        fn prop_matches_memory_store(
            writes in prop::collection::vec(
                (key_strategy(), prop::collection::vec(any::<u8>(), 0..=32)),
                0..24,
            )
        ) {
            let dir = TempDir::new().unwrap();
            let mut redb = open(&dir);
            let mut memory = MemoryStore::new();

            for (key, field) in &writes {
                let block = Block::from_field(field).unwrap();
                redb.write(*key, &block).unwrap();
                memory.write(*key, &block).unwrap();
            }

            for (key, _) in &writes {
                prop_assert_eq!(redb.read(*key).unwrap(), memory.read(*key).unwrap());
            }
        }
    }
}
