//! Lazy transaction handles handed to the background writer.

use std::fmt::Debug;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use auto_impl::auto_impl;
use bytes::Bytes;

use crate::{CommitObserver, TxId, TxRecord};

/// Handle to a pooled transaction whose bytes are resolved on demand.
///
/// The writer calls [`load`](Self::load) when it builds a batch, not when the
/// handle is queued, and calls [`mark_moved_to_disk`](Self::mark_moved_to_disk)
/// once the payload is committed.
#[auto_impl(&, Arc, Box)]
pub trait TransactionWrapper: Send + Sync + Debug {
    /// Transaction id.
    fn id(&self) -> TxId;

    /// Accounted size.
    fn size(&self) -> u64;

    /// Payload to persist, `None` if it is no longer available.
    fn load(&self) -> Option<Bytes>;

    /// Record that the payload is now durably stored.
    fn mark_moved_to_disk(&self);

    /// Whether the payload is still held in memory.
    fn is_in_memory(&self) -> bool;
}

/// Shared wrapper reference as queued by callers.
pub type TransactionWrapperRef = Arc<dyn TransactionWrapper>;

/// Commit observer that flags its wrapper as on disk.
#[derive(Debug)]
pub(crate) struct MovedToDisk(pub(crate) TransactionWrapperRef);

impl CommitObserver for MovedToDisk {
    fn on_committed(&self, _id: &TxId) {
        self.0.mark_moved_to_disk();
    }
}

/// Wrapper around a payload held in memory.
#[derive(Debug)]
pub struct MemoryTxWrapper {
    record: TxRecord,
    on_disk: AtomicBool,
}

impl MemoryTxWrapper {
    pub fn new(record: TxRecord) -> Self {
        Self {
            record,
            on_disk: AtomicBool::new(false),
        }
    }

    /// Shared handle, ready to queue.
    pub fn shared(record: TxRecord) -> Arc<Self> {
        Arc::new(Self::new(record))
    }

    pub fn record(&self) -> &TxRecord {
        &self.record
    }
}

impl TransactionWrapper for MemoryTxWrapper {
    fn id(&self) -> TxId {
        self.record.id
    }

    fn size(&self) -> u64 {
        self.record.size
    }

    fn load(&self) -> Option<Bytes> {
        Some(self.record.bytes.clone())
    }

    fn mark_moved_to_disk(&self) {
        self.on_disk.store(true, Ordering::Release);
    }

    fn is_in_memory(&self) -> bool {
        !self.on_disk.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observer_marks_wrapper() {
        let wrapper = MemoryTxWrapper::shared(TxRecord::new(TxId::new([1; 32]), vec![1u8; 4]));
        assert!(wrapper.is_in_memory());

        let observer = MovedToDisk(wrapper.clone());
        observer.on_committed(&wrapper.id());
        assert!(!wrapper.is_in_memory());
        assert_eq!(wrapper.load().unwrap().len(), 4);
    }
}
