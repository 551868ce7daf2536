//! Non-blocking front end with a coalescing background writer.
//!
//! Callers enqueue adds and removes and return at once. A single writer
//! thread drains whatever has queued up since its last commit into one
//! [`Batch`], so a burst of logical operations costs a handful of physical
//! commits.
//!
//! ```text
//! add/remove ──► unbounded channel ──► txdb-writer ──► MempoolTxDb::commit
//! sync ── barrier ──┘                        │
//!        ◄──────────── oneshot ◄─────────────┘ (after the preceding flush)
//! ```

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, trace, warn};
use txdb_storage::{KeyValueEngine, MemoryEngine};

use crate::args::{DEFAULT_COMMIT_RETRIES, DEFAULT_MAX_BATCH_SIZE, DEFAULT_RETRY_BACKOFF_MS};
use crate::error::panic_reason;
use crate::metrics::WriterMetrics;
use crate::wrapper::{MovedToDisk, TransactionWrapperRef};
use crate::{Batch, MempoolTxDb, TxData, TxDbError, TxDbResult, TxRecord, XrefKey};

/// Background writer configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriterConfig {
    /// Upper bound on intents folded into one commit.
    pub max_batch_size: usize,
    /// Retries of a failed commit before the writer faults.
    pub commit_retries: u32,
    /// Delay between retries, multiplied by the attempt number.
    pub retry_backoff: Duration,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            commit_retries: DEFAULT_COMMIT_RETRIES,
            retry_backoff: Duration::from_millis(DEFAULT_RETRY_BACKOFF_MS),
        }
    }
}

/// State of the background writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerHealth {
    /// Accepting and committing intents.
    Running,
    /// Gave up after a persistent commit failure or a panic. Queued intents
    /// were not written.
    Faulted(String),
    /// Shut down cleanly.
    Stopped,
}

type Waiter = oneshot::Sender<TxDbResult<()>>;

enum Request {
    Add(Vec<TransactionWrapperRef>),
    Remove(Vec<TxData>),
    Barrier(Waiter),
    Clear(Waiter),
    Shutdown,
}

impl Request {
    fn intents(&self) -> usize {
        match self {
            Self::Add(wrappers) => wrappers.len(),
            Self::Remove(txdata) => txdata.len(),
            _ => 0,
        }
    }

    fn into_waiter(self) -> Option<Waiter> {
        match self {
            Self::Barrier(done) | Self::Clear(done) => Some(done),
            _ => None,
        }
    }
}

/// Asynchronous transaction store.
///
/// Wraps a [`MempoolTxDb`] and owns its only committer. Dropping the handle
/// commits everything still queued before the writer exits.
pub struct AsyncMempoolTxDb<E: KeyValueEngine = MemoryEngine> {
    db: Arc<MempoolTxDb<E>>,
    requests: mpsc::UnboundedSender<Request>,
    health: watch::Receiver<WorkerHealth>,
    write_count: Arc<AtomicU64>,
    metrics: WriterMetrics,
    worker: Option<JoinHandle<()>>,
}

impl AsyncMempoolTxDb<MemoryEngine> {
    /// Asynchronous store over a fresh in-memory engine.
    pub fn in_memory() -> TxDbResult<Self> {
        Self::new(MempoolTxDb::in_memory())
    }
}

impl<E: KeyValueEngine> AsyncMempoolTxDb<E> {
    /// Start a writer over `db` with default settings.
    pub fn new(db: MempoolTxDb<E>) -> TxDbResult<Self> {
        Self::with_config(db, WriterConfig::default())
    }

    /// Start a writer over `db`.
    pub fn with_config(db: MempoolTxDb<E>, config: WriterConfig) -> TxDbResult<Self> {
        let db = Arc::new(db);
        let (requests, receiver) = mpsc::unbounded_channel();
        let (health_tx, health) = watch::channel(WorkerHealth::Running);
        let write_count = Arc::new(AtomicU64::new(0));
        let metrics = WriterMetrics::default();

        let writer = Writer {
            db: db.clone(),
            requests: receiver,
            health: health_tx,
            write_count: write_count.clone(),
            config,
            metrics: metrics.clone(),
        };
        let worker = thread::Builder::new()
            .name("txdb-writer".to_string())
            .spawn(move || writer.run())
            .map_err(|e| TxDbError::Spawn(e.to_string()))?;

        Ok(Self {
            db,
            requests,
            health,
            write_count,
            metrics,
            worker: Some(worker),
        })
    }

    /// Queue `wrappers` for writing. Their payloads are loaded by the writer.
    pub fn add(&self, wrappers: Vec<TransactionWrapperRef>) -> TxDbResult<()> {
        if wrappers.is_empty() {
            return Ok(());
        }
        self.metrics.on_queued(wrappers.len());
        self.send(Request::Add(wrappers))
    }

    /// Queue removals.
    pub fn remove(&self, txdata: Vec<TxData>) -> TxDbResult<()> {
        if txdata.is_empty() {
            return Ok(());
        }
        self.metrics.on_queued(txdata.len());
        self.send(Request::Remove(txdata))
    }

    /// Block until everything queued before this call is committed and its
    /// observers have run.
    ///
    /// Must not be called from within an async runtime worker thread.
    pub fn sync(&self) -> TxDbResult<()> {
        let (done, wait) = oneshot::channel();
        self.send(Request::Barrier(done))?;
        wait.blocking_recv().map_err(|_| self.stopped())?
    }

    /// Remove all content once everything queued before this call is applied.
    pub fn clear(&self) -> TxDbResult<()> {
        let (done, wait) = oneshot::channel();
        self.send(Request::Clear(done))?;
        wait.blocking_recv().map_err(|_| self.stopped())?
    }

    /// Physical commits performed since construction.
    pub fn write_count(&self) -> u64 {
        self.write_count.load(Ordering::Relaxed)
    }

    /// The underlying store, for reads.
    ///
    /// Reads race with the writer unless preceded by [`sync`](Self::sync).
    pub fn database(&self) -> Arc<MempoolTxDb<E>> {
        self.db.clone()
    }

    /// Accounted size once queued intents are applied.
    pub fn disk_usage(&self) -> TxDbResult<u64> {
        self.sync()?;
        Ok(self.db.disk_usage())
    }

    /// Record count once queued intents are applied.
    pub fn tx_count(&self) -> TxDbResult<u64> {
        self.sync()?;
        Ok(self.db.tx_count())
    }

    /// Set the marker after queued intents are applied, so none of them clears it.
    pub fn set_xref_key(&self, marker: XrefKey) -> TxDbResult<()> {
        self.sync()?;
        self.db.set_xref_key(marker)
    }

    /// Marker once queued intents are applied.
    pub fn xref_key(&self) -> TxDbResult<Option<XrefKey>> {
        self.sync()?;
        Ok(self.db.xref_key())
    }

    /// Drop the marker after queued intents are applied.
    pub fn remove_xref_key(&self) -> TxDbResult<()> {
        self.sync()?;
        self.db.remove_xref_key()
    }

    /// Current writer state.
    pub fn health(&self) -> WorkerHealth {
        self.health.borrow().clone()
    }

    /// Channel that observes writer state changes.
    pub fn subscribe_health(&self) -> watch::Receiver<WorkerHealth> {
        self.health.clone()
    }

    fn send(&self, request: Request) -> TxDbResult<()> {
        if let WorkerHealth::Faulted(reason) = &*self.health.borrow() {
            return Err(TxDbError::WorkerFaulted(reason.clone()));
        }
        self.requests.send(request).map_err(|_| self.stopped())
    }

    fn stopped(&self) -> TxDbError {
        match &*self.health.borrow() {
            WorkerHealth::Faulted(reason) => TxDbError::WorkerFaulted(reason.clone()),
            _ => TxDbError::WorkerFaulted("background writer stopped".to_string()),
        }
    }
}

impl<E: KeyValueEngine> Drop for AsyncMempoolTxDb<E> {
    fn drop(&mut self) {
        let _ = self.requests.send(Request::Shutdown);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("Background writer panicked");
            }
        }
    }
}

enum Flow {
    Continue,
    Shutdown,
}

/// The single committer.
struct Writer<E> {
    db: Arc<MempoolTxDb<E>>,
    requests: mpsc::UnboundedReceiver<Request>,
    health: watch::Sender<WorkerHealth>,
    write_count: Arc<AtomicU64>,
    config: WriterConfig,
    metrics: WriterMetrics,
}

impl<E: KeyValueEngine> Writer<E> {
    fn run(mut self) {
        debug!(max_batch_size = self.config.max_batch_size, "Background writer started");

        let mut waiters = Vec::new();
        while let Some(first) = self.requests.blocking_recv() {
            let mut round = self.drain(first);
            let outcome =
                panic::catch_unwind(AssertUnwindSafe(|| self.process(&mut round, &mut waiters)));
            let reason = match outcome {
                Ok(Ok(Flow::Continue)) => continue,
                Ok(Ok(Flow::Shutdown)) => break,
                Ok(Err(err)) => err.to_string(),
                Err(panic) => format!("writer panicked: {}", panic_reason(panic.as_ref())),
            };
            waiters.extend(round.into_iter().filter_map(Request::into_waiter));
            self.fault(reason, waiters);
            return;
        }

        self.health.send_replace(WorkerHealth::Stopped);
        debug!(writes = self.write_count.load(Ordering::Relaxed), "Background writer stopped");
    }

    /// Pull everything already queued, up to the batch size bound.
    fn drain(&mut self, first: Request) -> VecDeque<Request> {
        let mut intents = first.intents();
        let mut round = VecDeque::from([first]);
        while intents < self.config.max_batch_size
            && !matches!(round.back(), Some(Request::Shutdown))
        {
            match self.requests.try_recv() {
                Ok(request) => {
                    intents += request.intents();
                    round.push_back(request);
                }
                Err(_) => break,
            }
        }
        round
    }

    /// Apply one round. Requests still in `round` when this fails or panics
    /// were never answered.
    fn process(
        &mut self,
        round: &mut VecDeque<Request>,
        waiters: &mut Vec<Waiter>,
    ) -> TxDbResult<Flow> {
        let mut batch = Batch::new();
        let mut flow = Flow::Continue;

        loop {
            // A clear stays queued until everything before it is flushed.
            if matches!(round.front(), Some(Request::Clear(_))) {
                self.flush(&mut batch)?;
                release(waiters);
            }
            let Some(request) = round.pop_front() else {
                break;
            };
            match request {
                Request::Add(wrappers) => self.stage_adds(&mut batch, wrappers),
                Request::Remove(txdata) => {
                    for data in txdata {
                        batch.remove(data);
                    }
                }
                Request::Barrier(done) => waiters.push(done),
                Request::Clear(done) => {
                    let result = self.db.clear();
                    if let Err(err) = &result {
                        warn!(%err, "Clear failed");
                    }
                    let _ = done.send(result);
                }
                Request::Shutdown => {
                    flow = Flow::Shutdown;
                    break;
                }
            }
        }

        self.flush(&mut batch)?;
        release(waiters);
        Ok(flow)
    }

    fn stage_adds(&self, batch: &mut Batch, wrappers: Vec<TransactionWrapperRef>) {
        for wrapper in wrappers {
            let id = wrapper.id();
            match wrapper.load() {
                Some(bytes) => {
                    let record = TxRecord::with_size(id, bytes, wrapper.size());
                    batch.add(record, Some(Arc::new(MovedToDisk(wrapper))));
                }
                None => {
                    self.metrics.on_unresolved_wrapper();
                    warn!(%id, "Transaction payload unavailable, not written");
                }
            }
        }
    }

    /// Commit `batch`, retrying with backoff. An error here is fatal.
    fn flush(&self, batch: &mut Batch) -> TxDbResult<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut attempt = 0;
        loop {
            match self.db.commit(batch) {
                Ok(summary) => {
                    if summary.written {
                        self.write_count.fetch_add(1, Ordering::Relaxed);
                    }
                    trace!(intents = batch.len(), ?summary, "Flushed batch");
                    batch.clear();
                    return Ok(());
                }
                Err(err @ TxDbError::Database(_)) if attempt < self.config.commit_retries => {
                    attempt += 1;
                    self.metrics.on_retry();
                    warn!(%err, attempt, "Commit failed, retrying");
                    thread::sleep(self.config.retry_backoff * attempt);
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn fault(mut self, reason: String, waiters: Vec<Waiter>) {
        error!(%reason, "Background writer giving up, queued intents were not written");
        self.health.send_replace(WorkerHealth::Faulted(reason.clone()));

        // Refuse new requests, then fail everyone already waiting.
        self.requests.close();
        let faulted = || Err(TxDbError::WorkerFaulted(reason.clone()));
        for waiter in waiters {
            let _ = waiter.send(faulted());
        }
        while let Ok(request) = self.requests.try_recv() {
            if let Some(done) = request.into_waiter() {
                let _ = done.send(faulted());
            }
        }
    }
}

fn release(waiters: &mut Vec<Waiter>) {
    for waiter in waiters.drain(..) {
        let _ = waiter.send(Ok(()));
    }
}
