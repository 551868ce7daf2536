//! Transaction store metrics.

use metrics::{Counter, Gauge};

/// Transaction store metrics.
#[derive(Clone, Debug)]
pub(crate) struct TxDbMetrics {
    /// Number of batches written to the engine
    commits_total: Counter,
    /// Number of failed batch writes
    commit_failures_total: Counter,
    /// Number of records newly inserted
    records_added_total: Counter,
    /// Number of records removed
    records_removed_total: Counter,
    /// Number of clears
    clears_total: Counter,
    /// Accounted bytes currently stored
    disk_usage_bytes: Gauge,
    /// Records currently stored
    disk_tx_count: Gauge,
}

impl Default for TxDbMetrics {
    fn default() -> Self {
        Self {
            commits_total: metrics::counter!("txdb.commits_total"),
            commit_failures_total: metrics::counter!("txdb.commit_failures_total"),
            records_added_total: metrics::counter!("txdb.records_added_total"),
            records_removed_total: metrics::counter!("txdb.records_removed_total"),
            clears_total: metrics::counter!("txdb.clears_total"),
            disk_usage_bytes: metrics::gauge!("txdb.disk_usage_bytes"),
            disk_tx_count: metrics::gauge!("txdb.disk_tx_count"),
        }
    }
}

impl TxDbMetrics {
    /// Records a successful batch write and the resulting totals.
    pub(crate) fn on_commit(&self, added: u64, removed: u64, usage: u64, count: u64) {
        self.commits_total.increment(1);
        self.records_added_total.increment(added);
        self.records_removed_total.increment(removed);
        self.set_totals(usage, count);
    }

    pub(crate) fn on_commit_failure(&self) {
        self.commit_failures_total.increment(1);
    }

    pub(crate) fn on_clear(&self) {
        self.clears_total.increment(1);
        self.set_totals(0, 0);
    }

    pub(crate) fn set_totals(&self, usage: u64, count: u64) {
        self.disk_usage_bytes.set(usage as f64);
        self.disk_tx_count.set(count as f64);
    }
}

/// Background writer metrics.
#[derive(Clone, Debug)]
pub(crate) struct WriterMetrics {
    /// Number of add/remove intents accepted from callers
    intents_queued_total: Counter,
    /// Number of intents dropped because their payload could not be loaded
    unresolved_wrappers_total: Counter,
    /// Number of commit attempts retried
    commit_retries_total: Counter,
}

impl Default for WriterMetrics {
    fn default() -> Self {
        Self {
            intents_queued_total: metrics::counter!("txdb.writer.intents_queued_total"),
            unresolved_wrappers_total: metrics::counter!(
                "txdb.writer.unresolved_wrappers_total"
            ),
            commit_retries_total: metrics::counter!("txdb.writer.commit_retries_total"),
        }
    }
}

impl WriterMetrics {
    pub(crate) fn on_queued(&self, n: usize) {
        self.intents_queued_total.increment(n as u64);
    }

    pub(crate) fn on_unresolved_wrapper(&self) {
        self.unresolved_wrappers_total.increment(1);
    }

    pub(crate) fn on_retry(&self) {
        self.commit_retries_total.increment(1);
    }
}
