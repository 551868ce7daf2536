//! Storage contract for the mempool transaction store.
//!
//! Keys and values cross the engine boundary as raw bytes. Typed data is
//! turned into bytes through [`Encode`] (keys) and [`Compress`] (values), and
//! back through [`Decode`] and [`Decompress`].
//!
//! The [`KeyValueEngine`] trait is the only thing a backend has to provide:
//! point reads, ordered prefix enumeration and an atomic batch write.

use std::fmt::Debug;

mod engine;
mod memory;

pub use engine::{KeyValueEngine, WriteOp};
pub use memory::{FaultInjector, MemoryEngine};

/// Trait that will transform the data to be saved in the DB in a (ideally) compressed format
pub trait Compress: Send + Sync + Sized + Debug {
    /// Compressed type.
    type Compressed: bytes::BufMut
        + AsRef<[u8]>
        + AsMut<[u8]>
        + Into<Vec<u8>>
        + Default
        + Send
        + Sync
        + Debug;

    /// Compresses data going into the database.
    fn compress(self) -> Self::Compressed {
        let mut buf = Self::Compressed::default();
        self.compress_to_buf(&mut buf);
        buf
    }

    /// Compresses data to a given buffer.
    fn compress_to_buf<B: bytes::BufMut>(&self, buf: &mut B);
}

/// Trait that will transform the data to be read from the DB.
pub trait Decompress: Send + Sync + Sized + Debug {
    /// Decompresses data coming from the database.
    fn decompress(value: &[u8]) -> Result<Self, DatabaseError>;

    /// Decompresses owned data coming from the database.
    fn decompress_owned(value: Vec<u8>) -> Result<Self, DatabaseError> {
        Self::decompress(&value)
    }
}

/// Trait that will transform the data to be saved in the DB.
pub trait Encode: Send + Sync + Sized + Debug {
    /// Encoded type.
    type Encoded: AsRef<[u8]> + Into<Vec<u8>> + Send + Sync + Ord + Debug;

    /// Encodes data going into the database.
    fn encode(self) -> Self::Encoded;
}

/// Trait that will transform the data to be read from the DB.
pub trait Decode: Send + Sync + Sized + Debug {
    /// Decodes data coming from the database.
    fn decode(value: &[u8]) -> Result<Self, DatabaseError>;

    /// Decodes owned data coming from the database.
    fn decode_owned(value: Vec<u8>) -> Result<Self, DatabaseError> {
        Self::decode(&value)
    }
}

/// Database error type.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DatabaseError {
    /// Failed to open the database.
    #[error("failed to open the database: {_0}")]
    Open(String),
    /// Failed to read a value from the database.
    #[error("failed to read from the database: {_0}")]
    Read(String),
    /// Failed to commit a write batch.
    #[error("failed to commit write batch: {_0}")]
    Commit(String),
    /// Failed to decode a key or value read from the database.
    #[error("failed to decode {_0}")]
    Decode(&'static str),
    /// Other unspecified error.
    #[error("{_0}")]
    Other(String),
}
