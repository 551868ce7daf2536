//! In-memory engine.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::trace;

use crate::{DatabaseError, KeyValueEngine, WriteOp};

/// Ordered in-memory engine.
///
/// Nothing survives the process; used for ephemeral stores and tests.
#[derive(Debug, Default)]
pub struct MemoryEngine {
    entries: BTreeMap<Vec<u8>, Vec<u8>>,
    faults: FaultInjector,
}

impl MemoryEngine {
    /// Create a new empty engine.
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle that makes subsequent batch writes fail.
    pub fn fault_injector(&self) -> FaultInjector {
        self.faults.clone()
    }

    /// Number of stored entries, meta keys included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the engine holds no entries at all.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl KeyValueEngine for MemoryEngine {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, DatabaseError> {
        Ok(self.entries.get(key).cloned())
    }

    fn write_batch(&mut self, ops: Vec<WriteOp>) -> Result<(), DatabaseError> {
        if self.faults.take() {
            return Err(DatabaseError::Commit("injected write failure".to_string()));
        }

        trace!(ops = ops.len(), "Applying memory batch");
        for op in ops {
            match op {
                WriteOp::Put { key, value } => {
                    self.entries.insert(key, value);
                }
                WriteOp::Delete { key } => {
                    self.entries.remove(&key);
                }
            }
        }
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &[u8]) -> Result<Vec<Vec<u8>>, DatabaseError> {
        Ok(self
            .entries
            .range(prefix.to_vec()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect())
    }
}

/// Shared switch that fails a number of upcoming batch writes.
#[derive(Debug, Clone, Default)]
pub struct FaultInjector(Arc<AtomicUsize>);

impl FaultInjector {
    /// Fail the next `n` batch writes.
    pub fn fail_next(&self, n: usize) {
        self.0.store(n, Ordering::SeqCst);
    }

    /// Fail every batch write until [`heal`](Self::heal) is called.
    pub fn fail_always(&self) {
        self.0.store(usize::MAX, Ordering::SeqCst);
    }

    /// Stop failing writes.
    pub fn heal(&self) {
        self.0.store(0, Ordering::SeqCst);
    }

    /// Consume one pending failure, returning whether this write must fail.
    fn take(&self) -> bool {
        self.0
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| match n {
                0 => None,
                usize::MAX => Some(usize::MAX),
                n => Some(n - 1),
            })
            .is_ok()
    }
}
