//! Cross-check between an external index and the store.
//!
//! The mempool keeps its own record of which entries it moved to disk. This
//! module compares that record with what the store actually holds.

use std::collections::BTreeMap;

use tracing::warn;
use txdb_storage::KeyValueEngine;

use crate::{MempoolTxDb, TxData, TxDbResult, TxId};

/// Differences between an index and the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsistencyReport {
    /// Ids the index believes are on disk but the store lacks.
    pub missing_on_disk: Vec<TxId>,
    /// Ids the store holds that the index does not know as on disk.
    pub unexpected_on_disk: Vec<TxId>,
    /// Record count the index implies.
    pub expected_count: u64,
    /// Record count the store reports.
    pub disk_count: u64,
    /// Accounted size the index implies.
    pub expected_usage: u64,
    /// Accounted size the store reports.
    pub disk_usage: u64,
}

impl ConsistencyReport {
    pub fn is_consistent(&self) -> bool {
        self.missing_on_disk.is_empty()
            && self.unexpected_on_disk.is_empty()
            && self.expected_count == self.disk_count
            && self.expected_usage == self.disk_usage
    }
}

/// Compare `expected` (the index's on-disk entries) against `db`.
pub fn check<E, I>(expected: I, db: &MempoolTxDb<E>) -> TxDbResult<ConsistencyReport>
where
    E: KeyValueEngine,
    I: IntoIterator<Item = TxData>,
{
    let expected: BTreeMap<TxId, u64> = expected
        .into_iter()
        .map(|data| (data.id, data.size))
        .collect();
    let mut on_disk = db.keys()?;

    let mut report = ConsistencyReport {
        expected_count: expected.len() as u64,
        expected_usage: expected.values().sum(),
        disk_count: db.tx_count(),
        disk_usage: db.disk_usage(),
        ..Default::default()
    };

    for id in expected.keys() {
        if !on_disk.remove(id) {
            report.missing_on_disk.push(*id);
        }
    }
    report.unexpected_on_disk.extend(on_disk);

    if !report.is_consistent() {
        warn!(
            missing = report.missing_on_disk.len(),
            unexpected = report.unexpected_on_disk.len(),
            expected_count = report.expected_count,
            disk_count = report.disk_count,
            "Transaction store out of step with index"
        );
    }
    Ok(report)
}
