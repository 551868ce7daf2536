//! redb backend for the mempool transaction store.
//!
//! [`RedbEngine`] keeps the whole keyspace in one redb table. Every
//! [`write_batch`](KeyValueEngine::write_batch) runs in its own write
//! transaction, so a batch is either fully durable or not applied at all.

mod error;

use std::path::Path;

use redb::{Builder, Database, TableDefinition};
use tracing::debug;
use txdb_storage::{DatabaseError, KeyValueEngine, WriteOp};

pub use error::RedbEngineError;

/// Table definition for the store keyspace.
/// Key: raw key bytes (record or meta key)
/// Value: raw value bytes
const ENTRIES_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("entries");

/// Smallest page cache handed to redb, whatever the size hint says.
const MIN_CACHE_SIZE: usize = 1024 * 1024;

/// redb-based key-value engine.
pub struct RedbEngine {
    db: Database,
}

impl RedbEngine {
    /// Open or create an engine at the given path.
    ///
    /// `cache_size` is the size budget of the owning store and is used as the
    /// redb page cache size. It is a tuning hint, not a cap on stored data.
    pub fn open<P: AsRef<Path>>(path: P, cache_size: usize) -> Result<Self, RedbEngineError> {
        let db = Builder::new()
            .set_cache_size(cache_size.max(MIN_CACHE_SIZE))
            .create(path.as_ref())?;

        // Ensure the entries table exists
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(ENTRIES_TABLE)?;
        }
        write_txn.commit()?;

        debug!(path = %path.as_ref().display(), cache_size, "Opened redb engine");
        Ok(Self { db })
    }

    fn apply(&self, ops: Vec<WriteOp>) -> Result<(), RedbEngineError> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(ENTRIES_TABLE)?;
            for op in &ops {
                match op {
                    WriteOp::Put { key, value } => {
                        table.insert(key.as_slice(), value.as_slice())?;
                    }
                    WriteOp::Delete { key } => {
                        table.remove(key.as_slice())?;
                    }
                }
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    fn read(&self, key: &[u8]) -> Result<Option<Vec<u8>>, RedbEngineError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ENTRIES_TABLE)?;
        Ok(table.get(key)?.map(|value| value.value().to_vec()))
    }

    fn scan(&self, prefix: &[u8]) -> Result<Vec<Vec<u8>>, RedbEngineError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ENTRIES_TABLE)?;

        let mut keys = Vec::new();
        for entry in table.range(prefix..)? {
            let (key, _) = entry?;
            let key = key.value();
            if !key.starts_with(prefix) {
                break;
            }
            keys.push(key.to_vec());
        }
        Ok(keys)
    }
}

impl KeyValueEngine for RedbEngine {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, DatabaseError> {
        self.read(key).map_err(|e| DatabaseError::Read(e.to_string()))
    }

    fn write_batch(&mut self, ops: Vec<WriteOp>) -> Result<(), DatabaseError> {
        self.apply(ops).map_err(|e| DatabaseError::Commit(e.to_string()))
    }

    fn keys_with_prefix(&self, prefix: &[u8]) -> Result<Vec<Vec<u8>>, DatabaseError> {
        self.scan(prefix).map_err(|e| DatabaseError::Read(e.to_string()))
    }
}
