//! Background writer behaviour.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use rand::seq::SliceRandom;
use txdb::{
    AsyncMempoolTxDb, MemoryEngine, MemoryTxWrapper, MempoolTxDb, TransactionWrapper,
    TransactionWrapperRef, TxData, TxDbError, TxId, TxRecord, WorkerHealth, WriterConfig,
};

fn tx_id(n: u32) -> TxId {
    let mut bytes = [0u8; 32];
    bytes[..4].copy_from_slice(&n.to_be_bytes());
    TxId::new(bytes)
}

fn wrappers(range: std::ops::Range<u32>) -> Vec<Arc<MemoryTxWrapper>> {
    range
        .map(|n| {
            let len = 10 + (n % 7) as usize;
            MemoryTxWrapper::shared(TxRecord::new(tx_id(n), vec![n as u8; len]))
        })
        .collect()
}

fn queued(wrappers: &[Arc<MemoryTxWrapper>]) -> Vec<TransactionWrapperRef> {
    wrappers
        .iter()
        .map(|w| w.clone() as TransactionWrapperRef)
        .collect()
}

fn usage(wrappers: &[Arc<MemoryTxWrapper>]) -> u64 {
    wrappers.iter().map(|w| w.size()).sum()
}

fn fast_retry() -> WriterConfig {
    WriterConfig {
        commit_retries: 2,
        retry_backoff: Duration::from_millis(1),
        ..Default::default()
    }
}

#[test]
fn write_then_sync() {
    let db = AsyncMempoolTxDb::in_memory().unwrap();
    let txs = wrappers(0..4);
    db.add(queued(&txs)).unwrap();
    db.sync().unwrap();

    let store = db.database();
    for tx in &txs {
        assert_eq!(
            store.get_transaction(&tx.id()).unwrap(),
            Some(tx.record().bytes.clone())
        );
        assert!(!tx.is_in_memory());
    }
    assert_eq!(db.disk_usage().unwrap(), usage(&txs));
    assert_eq!(db.tx_count().unwrap(), 4);
}

#[test]
fn delete_then_sync() {
    let db = AsyncMempoolTxDb::in_memory().unwrap();
    let txs = wrappers(0..4);
    db.add(queued(&txs)).unwrap();
    db.sync().unwrap();

    db.remove(txs.iter().map(|w| w.record().tx_data()).collect())
        .unwrap();
    db.sync().unwrap();

    let store = db.database();
    for tx in &txs {
        assert_eq!(store.get_transaction(&tx.id()).unwrap(), None);
    }
    assert_eq!(db.disk_usage().unwrap(), 0);
    assert_eq!(db.tx_count().unwrap(), 0);
}

#[test]
fn clear_orders_after_queued_adds() {
    let db = AsyncMempoolTxDb::in_memory().unwrap();
    let txs = wrappers(0..100);
    for tx in &txs {
        db.add(vec![tx.clone()]).unwrap();
    }
    db.clear().unwrap();

    assert_eq!(db.tx_count().unwrap(), 0);
    assert_eq!(db.disk_usage().unwrap(), 0);
    assert!(db.database().keys().unwrap().is_empty());
}

#[test]
fn single_adds_coalesce_into_fewer_commits() {
    let dir = tempfile::tempdir().unwrap();
    let store = MempoolTxDb::open_path(dir.path().join("txdb.redb"), 1 << 20).unwrap();
    let db = AsyncMempoolTxDb::new(store).unwrap();

    const N: u32 = 1223;
    let txs = wrappers(0..N);
    for tx in &txs {
        db.add(vec![tx.clone()]).unwrap();
    }
    db.sync().unwrap();

    assert_eq!(db.tx_count().unwrap(), N as u64);
    assert_eq!(db.disk_usage().unwrap(), usage(&txs));
    assert!(db.write_count() >= 1);
    assert!(db.write_count() < N as u64, "writes: {}", db.write_count());
}

#[test]
fn shuffled_adds_and_removes_cancel_out() {
    let db = AsyncMempoolTxDb::in_memory().unwrap();

    const N: u32 = 500;
    let txs = wrappers(0..N);
    for tx in &txs {
        db.add(vec![tx.clone()]).unwrap();
    }

    let mut removals: Vec<TxData> = txs.iter().map(|w| w.record().tx_data()).collect();
    removals.shuffle(&mut rand::rng());
    for data in removals {
        db.remove(vec![data]).unwrap();
    }
    db.sync().unwrap();

    assert_eq!(db.tx_count().unwrap(), 0);
    assert_eq!(db.disk_usage().unwrap(), 0);
}

#[test]
fn add_and_remove_phases_coalesce() {
    let dir = tempfile::tempdir().unwrap();
    let store = MempoolTxDb::open_path(dir.path().join("txdb.redb"), 1 << 20).unwrap();
    let db = AsyncMempoolTxDb::new(store).unwrap();

    const N: u32 = 1223;
    let txs = wrappers(0..N);
    for tx in &txs {
        db.add(vec![tx.clone()]).unwrap();
    }
    db.sync().unwrap();
    assert_eq!(db.tx_count().unwrap(), N as u64);

    let mut removals: Vec<TxData> = txs.iter().map(|w| w.record().tx_data()).collect();
    removals.shuffle(&mut rand::rng());
    for data in removals {
        db.remove(vec![data]).unwrap();
    }
    db.sync().unwrap();

    assert_eq!(db.tx_count().unwrap(), 0);
    assert_eq!(db.disk_usage().unwrap(), 0);
    assert!(db.write_count() < 2 * N as u64, "writes: {}", db.write_count());
}

#[test]
fn sync_is_not_starved_by_later_adds() {
    let db = Arc::new(AsyncMempoolTxDb::in_memory().unwrap());
    let before = wrappers(0..100);
    db.add(queued(&before)).unwrap();

    let stop = Arc::new(AtomicBool::new(false));
    let producer = {
        let db = db.clone();
        let stop = stop.clone();
        thread::spawn(move || {
            let mut n = 1_000;
            while !stop.load(Ordering::Relaxed) {
                db.add(queued(&wrappers(n..n + 1))).unwrap();
                n += 1;
            }
        })
    };

    for _ in 0..10 {
        db.sync().unwrap();
    }
    let store = db.database();
    for tx in &before {
        assert!(!tx.is_in_memory());
        assert!(store.get_transaction(&tx.id()).unwrap().is_some());
    }

    stop.store(true, Ordering::Relaxed);
    producer.join().unwrap();
}

#[test]
fn batch_size_bound_splits_commits() {
    let config = WriterConfig {
        max_batch_size: 1,
        ..Default::default()
    };
    let db = AsyncMempoolTxDb::with_config(MempoolTxDb::in_memory(), config).unwrap();
    let txs = wrappers(0..20);
    for tx in &txs {
        db.add(vec![tx.clone()]).unwrap();
    }
    db.sync().unwrap();

    assert_eq!(db.write_count(), 20);
    assert_eq!(db.tx_count().unwrap(), 20);
}

#[test]
fn xref_key_round_trip() {
    let db = AsyncMempoolTxDb::in_memory().unwrap();
    assert_eq!(db.xref_key().unwrap(), None);

    let marker = uuid::Uuid::new_v4();
    db.set_xref_key(marker).unwrap();
    assert_eq!(db.xref_key().unwrap(), Some(marker));

    db.remove_xref_key().unwrap();
    assert_eq!(db.xref_key().unwrap(), None);
}

#[test]
fn queued_write_drops_xref_key() {
    let db = AsyncMempoolTxDb::in_memory().unwrap();
    db.set_xref_key(uuid::Uuid::new_v4()).unwrap();

    db.add(queued(&wrappers(0..1))).unwrap();
    assert_eq!(db.xref_key().unwrap(), None);
}

#[test]
fn queued_remove_drops_xref_key() {
    let db = AsyncMempoolTxDb::in_memory().unwrap();
    let txs = wrappers(0..2);
    db.add(queued(&txs)).unwrap();
    db.set_xref_key(uuid::Uuid::new_v4()).unwrap();
    assert!(db.xref_key().unwrap().is_some());

    db.remove(vec![txs[0].record().tx_data()]).unwrap();
    assert_eq!(db.xref_key().unwrap(), None);
    assert_eq!(db.tx_count().unwrap(), 1);
}

#[test]
fn xref_key_set_after_queued_writes_survives() {
    let db = AsyncMempoolTxDb::in_memory().unwrap();
    db.add(queued(&wrappers(0..50))).unwrap();

    let marker = uuid::Uuid::new_v4();
    db.set_xref_key(marker).unwrap();
    assert_eq!(db.xref_key().unwrap(), Some(marker));
    assert_eq!(db.tx_count().unwrap(), 50);
}

#[test]
fn persistent_commit_failure_faults_writer() {
    let engine = MemoryEngine::new();
    let faults = engine.fault_injector();
    let store = MempoolTxDb::open(engine).unwrap();
    let db = AsyncMempoolTxDb::with_config(store, fast_retry()).unwrap();
    let mut health = db.subscribe_health();

    faults.fail_always();
    let txs = wrappers(0..3);
    db.add(queued(&txs)).unwrap();

    assert!(matches!(db.sync(), Err(TxDbError::WorkerFaulted(_))));
    assert!(matches!(db.health(), WorkerHealth::Faulted(_)));
    assert!(health.has_changed().unwrap_or(true));
    assert!(matches!(*health.borrow_and_update(), WorkerHealth::Faulted(_)));

    assert!(matches!(
        db.add(queued(&wrappers(3..4))),
        Err(TxDbError::WorkerFaulted(_))
    ));
    assert!(matches!(db.clear(), Err(TxDbError::WorkerFaulted(_))));
    for tx in &txs {
        assert!(tx.is_in_memory());
    }
    assert_eq!(db.database().tx_count(), 0);
}

#[test]
fn transient_commit_failure_is_retried() {
    let engine = MemoryEngine::new();
    let faults = engine.fault_injector();
    let store = MempoolTxDb::open(engine).unwrap();
    let db = AsyncMempoolTxDb::with_config(store, fast_retry()).unwrap();

    faults.fail_next(2);
    let txs = wrappers(0..3);
    db.add(queued(&txs)).unwrap();
    db.sync().unwrap();

    assert_eq!(db.health(), WorkerHealth::Running);
    assert_eq!(db.tx_count().unwrap(), 3);
    assert!(txs.iter().all(|tx| !tx.is_in_memory()));
}

#[test]
fn drop_commits_queued_intents() {
    let db = AsyncMempoolTxDb::in_memory().unwrap();
    let store = db.database();
    let txs = wrappers(0..200);
    for tx in &txs {
        db.add(vec![tx.clone()]).unwrap();
    }
    drop(db);

    assert_eq!(store.tx_count(), 200);
    assert_eq!(store.disk_usage(), usage(&txs));
    assert!(txs.iter().all(|tx| !tx.is_in_memory()));
}

#[test]
fn concurrent_producers() {
    let db = Arc::new(AsyncMempoolTxDb::in_memory().unwrap());

    let handles: Vec<_> = (0..4u32)
        .map(|t| {
            let db = db.clone();
            thread::spawn(move || {
                let txs = wrappers(t * 100..t * 100 + 100);
                for tx in &txs {
                    db.add(vec![tx.clone()]).unwrap();
                }
                db.sync().unwrap();
                assert!(txs.iter().all(|tx| !tx.is_in_memory()));
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(db.tx_count().unwrap(), 400);
}

/// Wrapper whose payload has already been evicted.
#[derive(Debug)]
struct Evicted(TxId);

impl TransactionWrapper for Evicted {
    fn id(&self) -> TxId {
        self.0
    }

    fn size(&self) -> u64 {
        10
    }

    fn load(&self) -> Option<Bytes> {
        None
    }

    fn mark_moved_to_disk(&self) {
        panic!("evicted wrapper must not be marked");
    }

    fn is_in_memory(&self) -> bool {
        false
    }
}

#[test]
fn unresolvable_wrapper_is_skipped() {
    let db = AsyncMempoolTxDb::in_memory().unwrap();
    let live = wrappers(0..2);
    let mut batch = queued(&live);
    batch.push(Arc::new(Evicted(tx_id(99))));
    db.add(batch).unwrap();
    db.sync().unwrap();

    let store = db.database();
    assert_eq!(store.get_transaction(&tx_id(99)).unwrap(), None);
    assert_eq!(db.tx_count().unwrap(), 2);
    assert_eq!(db.health(), WorkerHealth::Running);
}

/// Wrapper whose owner panics when told the payload reached disk.
#[derive(Debug)]
struct PanicsOnMark(TxRecord);

impl TransactionWrapper for PanicsOnMark {
    fn id(&self) -> TxId {
        self.0.id
    }

    fn size(&self) -> u64 {
        self.0.size
    }

    fn load(&self) -> Option<Bytes> {
        Some(self.0.bytes.clone())
    }

    fn mark_moved_to_disk(&self) {
        panic!("mempool entry already gone");
    }

    fn is_in_memory(&self) -> bool {
        true
    }
}

#[test]
fn panicking_mark_keeps_writer_running() {
    let db = AsyncMempoolTxDb::in_memory().unwrap();
    let live = wrappers(0..2);
    let mut batch = queued(&live);
    batch.push(Arc::new(PanicsOnMark(TxRecord::new(tx_id(77), vec![7u8; 16]))));
    db.add(batch).unwrap();
    db.sync().unwrap();

    assert_eq!(db.health(), WorkerHealth::Running);
    assert_eq!(db.tx_count().unwrap(), 3);
    assert!(live.iter().all(|tx| !tx.is_in_memory()));

    db.add(queued(&wrappers(2..3))).unwrap();
    assert_eq!(db.tx_count().unwrap(), 4);
}

/// Wrapper whose payload lookup panics.
#[derive(Debug)]
struct PanicsOnLoad(TxId);

impl TransactionWrapper for PanicsOnLoad {
    fn id(&self) -> TxId {
        self.0
    }

    fn size(&self) -> u64 {
        10
    }

    fn load(&self) -> Option<Bytes> {
        panic!("payload store poisoned");
    }

    fn mark_moved_to_disk(&self) {}

    fn is_in_memory(&self) -> bool {
        true
    }
}

#[test]
fn writer_panic_is_reported_as_fault() {
    let db = AsyncMempoolTxDb::in_memory().unwrap();
    db.add(vec![Arc::new(PanicsOnLoad(tx_id(5)))]).unwrap();

    match db.sync() {
        Err(TxDbError::WorkerFaulted(reason)) => assert!(reason.contains("payload store poisoned")),
        other => panic!("expected a writer fault, got {other:?}"),
    }
    assert!(matches!(db.health(), WorkerHealth::Faulted(_)));
    assert!(matches!(
        db.add(queued(&wrappers(0..1))),
        Err(TxDbError::WorkerFaulted(_))
    ));
    assert!(matches!(db.sync(), Err(TxDbError::WorkerFaulted(_))));
}
