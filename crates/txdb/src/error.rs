//! Transaction store error types.

use std::any::Any;

use txdb_storage::DatabaseError;

use crate::TxId;

/// Errors from transaction store operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TxDbError {
    /// The underlying engine failed; nothing from the failed call was applied.
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// The background writer stopped after a persistent commit failure.
    #[error("background writer faulted: {0}")]
    WorkerFaulted(String),

    /// Accounting the given record would overflow the usage counter. Nothing was applied.
    #[error("accounted size of {0} overflows disk usage")]
    SizeOverflow(TxId),

    /// The background writer thread could not be started.
    #[error("failed to spawn background writer: {0}")]
    Spawn(String),
}

/// Human readable reason carried by a panic payload.
pub(crate) fn panic_reason(payload: &(dyn Any + Send)) -> String {
    if let Some(reason) = payload.downcast_ref::<&str>() {
        reason.to_string()
    } else if let Some(reason) = payload.downcast_ref::<String>() {
        reason.clone()
    } else {
        "unknown panic".to_string()
    }
}
