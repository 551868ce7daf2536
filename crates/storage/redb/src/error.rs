//! redb engine error types.

use txdb_storage::DatabaseError;

/// Errors raised by the redb backend.
#[derive(Debug, thiserror::Error)]
pub enum RedbEngineError {
    /// Database open or creation failed.
    #[error("database error: {0}")]
    Database(#[from] redb::DatabaseError),

    /// Could not start a transaction.
    #[error("transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    /// Could not open the entries table.
    #[error("table error: {0}")]
    Table(#[from] redb::TableError),

    /// Read or write on the underlying file failed.
    #[error("storage error: {0}")]
    Storage(#[from] redb::StorageError),

    /// The write transaction could not be committed.
    #[error("commit error: {0}")]
    Commit(#[from] redb::CommitError),
}

impl From<RedbEngineError> for DatabaseError {
    fn from(err: RedbEngineError) -> Self {
        match err {
            RedbEngineError::Database(e) => DatabaseError::Open(e.to_string()),
            RedbEngineError::Commit(e) => DatabaseError::Commit(e.to_string()),
            other => DatabaseError::Other(other.to_string()),
        }
    }
}
