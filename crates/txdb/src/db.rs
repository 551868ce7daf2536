//! Synchronous transaction store.

use std::collections::BTreeSet;
use std::panic::{self, AssertUnwindSafe};

use bytes::Bytes;
use parking_lot::RwLock;
use tracing::{debug, error, trace, warn};
use txdb_storage::{Decode, Decompress, Encode, KeyValueEngine, MemoryEngine, WriteOp};

use crate::batch::{Action, Batch};
use crate::keys::{DiskStats, MetaKey, RECORD_PREFIX, RecordKey, StoredTx, StoredXref};
use crate::metrics::TxDbMetrics;
use crate::error::panic_reason;
use crate::{TxData, TxDbError, TxDbResult, TxId, TxRecord, XrefKey};

/// Outcome of a committed batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitSummary {
    /// Ids that were not stored before.
    pub added: u64,
    /// Ids already stored whose payload or size was overwritten.
    pub replaced: u64,
    /// Ids already stored with identical content.
    pub unchanged: u64,
    /// Ids that were stored and are now gone.
    pub removed: u64,
    /// Observers invoked.
    pub notified: u64,
    /// Whether an engine write took place.
    pub written: bool,
}

impl CommitSummary {
    /// Whether stored content changed.
    pub fn content_changed(&self) -> bool {
        self.added + self.replaced + self.removed > 0
    }
}

/// State guarded as one unit: engine content, counters and marker change together.
struct Inner<E> {
    engine: E,
    stats: DiskStats,
    xref: Option<XrefKey>,
}

impl<E: KeyValueEngine> Inner<E> {
    fn stored(&self, id: TxId) -> TxDbResult<Option<StoredTx>> {
        let key = RecordKey(id).encode();
        Ok(self
            .engine
            .get(&key)?
            .map(StoredTx::decompress_owned)
            .transpose()?)
    }
}

/// Persistent map of transaction id to transaction bytes with exact accounting.
///
/// Tracks the summed accounted size and number of stored records, and holds a
/// single cross-reference marker that is dropped whenever content changes.
///
/// All state sits behind one lock: readers never observe content and counters
/// out of step.
pub struct MempoolTxDb<E = MemoryEngine> {
    inner: RwLock<Inner<E>>,
    metrics: TxDbMetrics,
}

impl MempoolTxDb<MemoryEngine> {
    /// Store backed by a fresh in-memory engine.
    pub fn in_memory() -> Self {
        Self {
            inner: RwLock::new(Inner {
                engine: MemoryEngine::new(),
                stats: DiskStats::default(),
                xref: None,
            }),
            metrics: TxDbMetrics::default(),
        }
    }
}

#[cfg(feature = "redb")]
impl MempoolTxDb<txdb_storage_redb::RedbEngine> {
    /// Open or create a redb-backed store.
    ///
    /// `size_budget` tunes the engine cache; it does not cap stored data.
    pub fn open_path<P: AsRef<std::path::Path>>(path: P, size_budget: usize) -> TxDbResult<Self> {
        let engine = txdb_storage_redb::RedbEngine::open(path, size_budget)
            .map_err(txdb_storage::DatabaseError::from)?;
        Self::open(engine)
    }
}

impl<E: KeyValueEngine> MempoolTxDb<E> {
    /// Open a store over `engine`, resuming its persisted counters and marker.
    ///
    /// Content written without counters is recounted.
    pub fn open(engine: E) -> TxDbResult<Self> {
        let stats = match engine.get(MetaKey::Stats.encode())? {
            Some(raw) => DiskStats::decompress(&raw)?,
            None => Self::recount(&engine)?,
        };
        let xref = engine
            .get(MetaKey::Xref.encode())?
            .map(|raw| StoredXref::decompress(&raw))
            .transpose()?
            .map(|stored| stored.0);

        debug!(usage = stats.usage, count = stats.count, xref = ?xref, "Opened transaction store");

        let metrics = TxDbMetrics::default();
        metrics.set_totals(stats.usage, stats.count);
        Ok(Self {
            inner: RwLock::new(Inner {
                engine,
                stats,
                xref,
            }),
            metrics,
        })
    }

    fn recount(engine: &E) -> TxDbResult<DiskStats> {
        let mut stats = DiskStats::default();
        for key in engine.keys_with_prefix(RECORD_PREFIX)? {
            if let Some(raw) = engine.get(&key)? {
                stats.usage += StoredTx::decompress_owned(raw)?.size;
                stats.count += 1;
            }
        }
        if stats.count > 0 {
            warn!(
                usage = stats.usage,
                count = stats.count,
                "Recounted store without persisted stats"
            );
        }
        Ok(stats)
    }

    /// Write `records`. Re-adding a stored id never double counts.
    pub fn add_transactions(&self, records: &[TxRecord]) -> TxDbResult<CommitSummary> {
        let mut batch = Batch::with_capacity(records.len());
        for record in records {
            batch.add(record.clone(), None);
        }
        self.commit(&batch)
    }

    /// Remove the given ids. Ids that are not stored are ignored.
    pub fn remove_transactions(&self, txdata: &[TxData]) -> TxDbResult<CommitSummary> {
        let mut batch = Batch::with_capacity(txdata.len());
        for data in txdata {
            batch.remove(*data);
        }
        self.commit(&batch)
    }

    /// Payload stored for `id`.
    pub fn get_transaction(&self, id: &TxId) -> TxDbResult<Option<Bytes>> {
        let inner = self.inner.read();
        Ok(inner.stored(*id)?.map(|stored| stored.bytes))
    }

    /// Summed accounted size of all stored records.
    pub fn disk_usage(&self) -> u64 {
        self.inner.read().stats.usage
    }

    /// Number of stored records.
    pub fn tx_count(&self) -> u64 {
        self.inner.read().stats.count
    }

    /// Every stored transaction id.
    pub fn keys(&self) -> TxDbResult<BTreeSet<TxId>> {
        let inner = self.inner.read();
        let mut ids = BTreeSet::new();
        for key in inner.engine.keys_with_prefix(RECORD_PREFIX)? {
            ids.insert(RecordKey::decode_owned(key)?.0);
        }
        Ok(ids)
    }

    /// Remove all content, reset the counters and drop the marker.
    pub fn clear(&self) -> TxDbResult<()> {
        let mut inner = self.inner.write();

        let mut ops: Vec<WriteOp> = inner
            .engine
            .keys_with_prefix(RECORD_PREFIX)?
            .into_iter()
            .map(|key| WriteOp::Delete { key })
            .collect();
        let removed = ops.len();
        ops.push(WriteOp::put(MetaKey::Stats, DiskStats::default()));
        ops.push(WriteOp::delete(MetaKey::Xref));

        if let Err(err) = inner.engine.write_batch(ops) {
            self.metrics.on_commit_failure();
            return Err(err.into());
        }
        inner.stats = DiskStats::default();
        inner.xref = None;
        drop(inner);

        self.metrics.on_clear();
        debug!(removed, "Cleared transaction store");
        Ok(())
    }

    /// Store `marker`, replacing any previous one.
    pub fn set_xref_key(&self, marker: XrefKey) -> TxDbResult<()> {
        let mut inner = self.inner.write();
        inner.engine.write_batch(vec![WriteOp::put(MetaKey::Xref, StoredXref(marker))])?;
        inner.xref = Some(marker);
        trace!(%marker, "Set xref marker");
        Ok(())
    }

    /// Current marker, if any.
    pub fn xref_key(&self) -> Option<XrefKey> {
        self.inner.read().xref
    }

    /// Drop the marker.
    pub fn remove_xref_key(&self) -> TxDbResult<()> {
        let mut inner = self.inner.write();
        inner.engine.write_batch(vec![WriteOp::delete(MetaKey::Xref)])?;
        inner.xref = None;
        Ok(())
    }

    /// Apply `batch` atomically.
    ///
    /// Counters and the marker are only touched once the engine write has
    /// succeeded. Observers of adds that end up stored fire after the write,
    /// outside the store lock.
    pub fn commit(&self, batch: &Batch) -> TxDbResult<CommitSummary> {
        let intents = batch.resolve();
        let mut summary = CommitSummary::default();
        if intents.is_empty() {
            return Ok(summary);
        }

        let mut inner = self.inner.write();
        let mut stats = inner.stats;
        let mut ops = Vec::with_capacity(intents.len() + 2);
        let mut notify = Vec::new();

        for intent in intents {
            let existing = inner.stored(intent.id)?;
            match intent.action {
                Action::Add { bytes, size } => {
                    let stored = StoredTx { size, bytes };
                    match existing {
                        Some(old) if old == stored => summary.unchanged += 1,
                        Some(old) => {
                            stats.usage = stats
                                .usage
                                .saturating_sub(old.size)
                                .checked_add(size)
                                .ok_or(TxDbError::SizeOverflow(intent.id))?;
                            summary.replaced += 1;
                            ops.push(WriteOp::put(RecordKey(intent.id), stored));
                        }
                        None => {
                            stats.usage = stats
                                .usage
                                .checked_add(size)
                                .ok_or(TxDbError::SizeOverflow(intent.id))?;
                            stats.count += 1;
                            summary.added += 1;
                            ops.push(WriteOp::put(RecordKey(intent.id), stored));
                        }
                    }
                    if let Some(observer) = intent.observer {
                        notify.push((intent.id, observer));
                    }
                }
                Action::Remove { size } => match existing {
                    Some(old) => {
                        if old.size != size {
                            warn!(
                                id = %intent.id,
                                stored = old.size,
                                given = size,
                                "Remove size differs from stored size"
                            );
                        }
                        stats.usage = stats.usage.saturating_sub(old.size);
                        stats.count = stats.count.saturating_sub(1);
                        summary.removed += 1;
                        ops.push(WriteOp::delete(RecordKey(intent.id)));
                    }
                    None => trace!(id = %intent.id, "Remove of absent transaction"),
                },
            }
        }

        if summary.content_changed() {
            ops.push(WriteOp::put(MetaKey::Stats, stats));
            if inner.xref.is_some() {
                ops.push(WriteOp::delete(MetaKey::Xref));
            }

            if let Err(err) = inner.engine.write_batch(ops) {
                self.metrics.on_commit_failure();
                return Err(err.into());
            }
            inner.stats = stats;
            inner.xref = None;
            summary.written = true;
        }
        drop(inner);

        for (id, observer) in &notify {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| observer.on_committed(id)));
            if let Err(panic) = outcome {
                error!(%id, reason = %panic_reason(panic.as_ref()), "Commit observer panicked");
            }
        }
        summary.notified = notify.len() as u64;

        if summary.written {
            self.metrics
                .on_commit(summary.added, summary.removed, stats.usage, stats.count);
        }
        trace!(?summary, "Committed batch");
        Ok(summary)
    }
}
