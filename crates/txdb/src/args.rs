//! Transaction store CLI arguments.

use std::path::PathBuf;
use std::time::Duration;

use clap::Args;
use serde::{Deserialize, Serialize};

use crate::WriterConfig;

/// Default engine cache size in bytes.
pub const DEFAULT_CACHE_SIZE: usize = 64 * 1024 * 1024;

/// Default upper bound on intents per physical commit.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 10_000;

/// Default number of retries before a commit failure is fatal.
pub const DEFAULT_COMMIT_RETRIES: u32 = 3;

/// Default delay between commit retries, multiplied by the attempt number.
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 50;

/// Transaction store configuration arguments.
#[derive(Debug, Args, Clone, Serialize, Deserialize)]
#[command(next_help_heading = "Transaction Store")]
#[serde(default)]
pub struct TxDbArgs {
    /// Path of the store file.
    #[arg(long = "txdb.path", value_name = "PATH", default_value = "mempool-txdb.redb")]
    pub path: PathBuf,

    /// Size budget in bytes, used to size the engine cache.
    #[arg(long = "txdb.cache-size", value_name = "BYTES", default_value_t = DEFAULT_CACHE_SIZE)]
    pub cache_size: usize,

    /// Maximum number of intents folded into one commit.
    #[arg(long = "txdb.max-batch-size", default_value_t = DEFAULT_MAX_BATCH_SIZE)]
    pub max_batch_size: usize,

    /// Retries of a failed commit before the writer gives up.
    #[arg(long = "txdb.commit-retries", default_value_t = DEFAULT_COMMIT_RETRIES)]
    pub commit_retries: u32,

    /// Base delay between commit retries in milliseconds.
    #[arg(
        long = "txdb.retry-backoff",
        value_name = "MS",
        default_value_t = DEFAULT_RETRY_BACKOFF_MS
    )]
    pub retry_backoff_ms: u64,
}

impl Default for TxDbArgs {
    fn default() -> Self {
        Self {
            path: PathBuf::from("mempool-txdb.redb"),
            cache_size: DEFAULT_CACHE_SIZE,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            commit_retries: DEFAULT_COMMIT_RETRIES,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
        }
    }
}

impl TxDbArgs {
    /// Background writer settings.
    pub fn writer_config(&self) -> WriterConfig {
        WriterConfig {
            max_batch_size: self.max_batch_size.max(1),
            commit_retries: self.commit_retries,
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }

    /// Open the redb-backed store these arguments describe.
    #[cfg(feature = "redb")]
    pub fn open(
        &self,
    ) -> crate::TxDbResult<crate::MempoolTxDb<txdb_storage_redb::RedbEngine>> {
        crate::MempoolTxDb::open_path(&self.path, self.cache_size)
    }
}
