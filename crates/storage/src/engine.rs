//! Key-value engine contract.

use auto_impl::auto_impl;

use crate::{Compress, DatabaseError, Encode};

/// A single operation inside an atomic write batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    /// Insert or overwrite `key` with `value`.
    Put { key: Vec<u8>, value: Vec<u8> },
    /// Remove `key` if present.
    Delete { key: Vec<u8> },
}

impl WriteOp {
    /// Build a put from typed key and value.
    pub fn put<K: Encode, V: Compress>(key: K, value: V) -> Self {
        Self::Put {
            key: key.encode().into(),
            value: value.compress().into(),
        }
    }

    /// Build a delete from a typed key.
    pub fn delete<K: Encode>(key: K) -> Self {
        Self::Delete {
            key: key.encode().into(),
        }
    }
}

/// Ordered byte-key/byte-value store with atomic batch commit.
///
/// Backends (redb, in-memory) implement this trait. A successful
/// [`write_batch`](KeyValueEngine::write_batch) must have applied every
/// operation; a failed one must have applied none.
#[auto_impl(Box)]
pub trait KeyValueEngine: Send + Sync + 'static {
    /// Read the value stored under `key`.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, DatabaseError>;

    /// Apply `ops` in order as one all-or-nothing commit.
    fn write_batch(&mut self, ops: Vec<WriteOp>) -> Result<(), DatabaseError>;

    /// All keys starting with `prefix`, in key order.
    fn keys_with_prefix(&self, prefix: &[u8]) -> Result<Vec<Vec<u8>>, DatabaseError>;
}
