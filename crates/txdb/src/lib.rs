//! Persistent side store for mempool transaction payloads.
//!
//! The mempool keeps its index in memory and moves full transaction bytes
//! here. [`MempoolTxDb`] is the synchronous store with exact size and count
//! accounting. [`AsyncMempoolTxDb`] puts a coalescing background writer in
//! front of it so callers never block on a commit.
//!
//! ```text
//! ┌─────────────────────┐
//! │ AsyncMempoolTxDb    │  add / remove / sync / clear
//! └──────────┬──────────┘
//!            │ Batch
//! ┌──────────▼──────────┐
//! │ MempoolTxDb         │  accounting, xref marker
//! └──────────┬──────────┘
//!            │ WriteOp
//! ┌──────────▼──────────┐
//! │ KeyValueEngine      │  redb, memory
//! └─────────────────────┘
//! ```

mod args;
mod async_db;
mod batch;
pub mod consistency;
mod db;
mod error;
mod keys;
mod metrics;
mod primitives;
mod wrapper;

pub use args::{
    DEFAULT_CACHE_SIZE, DEFAULT_COMMIT_RETRIES, DEFAULT_MAX_BATCH_SIZE, DEFAULT_RETRY_BACKOFF_MS,
    TxDbArgs,
};
pub use async_db::{AsyncMempoolTxDb, WorkerHealth, WriterConfig};
pub use batch::{Batch, CommitObserver};
pub use consistency::ConsistencyReport;
pub use db::{CommitSummary, MempoolTxDb};
pub use error::TxDbError;
pub use primitives::{ParseTxIdError, TxData, TxId, TxRecord, XrefKey};
pub use wrapper::{MemoryTxWrapper, TransactionWrapper, TransactionWrapperRef};

pub use txdb_storage::{FaultInjector, KeyValueEngine, MemoryEngine};
#[cfg(feature = "redb")]
pub use txdb_storage_redb::RedbEngine;

/// Result type for transaction store operations.
pub type TxDbResult<T> = Result<T, TxDbError>;
