//! Keyspace layout.
//!
//! All data lives in one ordered keyspace so content, counters and the
//! cross-reference marker change in the same atomic batch:
//!
//! ```text
//! 't' ++ txid (33 bytes)  -> size (u64 LE) ++ payload
//! "m:stats"               -> usage (u64 LE) ++ count (u64 LE)
//! "m:xref"                -> uuid (16 bytes)
//! ```
//!
//! Meta keys never have the record prefix, so they cannot collide with a
//! transaction id.

use bytes::{Buf, BufMut, Bytes};
use txdb_storage::{Compress, DatabaseError, Decode, Decompress, Encode};

use crate::{TxId, XrefKey};

/// First byte of every record key.
pub(crate) const RECORD_PREFIX: &[u8] = b"t";

/// Key of a stored transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct RecordKey(pub(crate) TxId);

impl Encode for RecordKey {
    type Encoded = Vec<u8>;

    fn encode(self) -> Self::Encoded {
        let mut key = Vec::with_capacity(RECORD_PREFIX.len() + TxId::LEN);
        key.extend_from_slice(RECORD_PREFIX);
        key.extend_from_slice(self.0.as_bytes());
        key
    }
}

impl Decode for RecordKey {
    fn decode(value: &[u8]) -> Result<Self, DatabaseError> {
        value
            .strip_prefix(RECORD_PREFIX)
            .and_then(TxId::from_slice)
            .map(Self)
            .ok_or(DatabaseError::Decode("record key"))
    }
}

/// Reserved keys outside the record keyspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum MetaKey {
    Stats,
    Xref,
}

impl Encode for MetaKey {
    type Encoded = &'static [u8];

    fn encode(self) -> Self::Encoded {
        match self {
            Self::Stats => b"m:stats",
            Self::Xref => b"m:xref",
        }
    }
}

/// Stored form of a transaction: accounted size plus payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct StoredTx {
    pub(crate) size: u64,
    pub(crate) bytes: Bytes,
}

impl Compress for StoredTx {
    type Compressed = Vec<u8>;

    fn compress_to_buf<B: BufMut>(&self, buf: &mut B) {
        buf.put_u64_le(self.size);
        buf.put_slice(&self.bytes);
    }
}

impl Decompress for StoredTx {
    fn decompress(value: &[u8]) -> Result<Self, DatabaseError> {
        Self::decompress_owned(value.to_vec())
    }

    fn decompress_owned(value: Vec<u8>) -> Result<Self, DatabaseError> {
        if value.len() < 8 {
            return Err(DatabaseError::Decode("stored transaction"));
        }
        let mut bytes = Bytes::from(value);
        let size = bytes.get_u64_le();
        Ok(Self { size, bytes })
    }
}

/// Aggregate accounting persisted under [`MetaKey::Stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct DiskStats {
    /// Sum of accounted sizes of stored records.
    pub(crate) usage: u64,
    /// Number of stored records.
    pub(crate) count: u64,
}

impl Compress for DiskStats {
    type Compressed = Vec<u8>;

    fn compress_to_buf<B: BufMut>(&self, buf: &mut B) {
        buf.put_u64_le(self.usage);
        buf.put_u64_le(self.count);
    }
}

impl Decompress for DiskStats {
    fn decompress(mut value: &[u8]) -> Result<Self, DatabaseError> {
        if value.len() != 16 {
            return Err(DatabaseError::Decode("disk stats"));
        }
        Ok(Self {
            usage: value.get_u64_le(),
            count: value.get_u64_le(),
        })
    }
}

/// Stored form of the cross-reference marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct StoredXref(pub(crate) XrefKey);

impl Compress for StoredXref {
    type Compressed = Vec<u8>;

    fn compress_to_buf<B: BufMut>(&self, buf: &mut B) {
        buf.put_slice(self.0.as_bytes());
    }
}

impl Decompress for StoredXref {
    fn decompress(value: &[u8]) -> Result<Self, DatabaseError> {
        XrefKey::from_slice(value)
            .map(Self)
            .map_err(|_| DatabaseError::Decode("xref marker"))
    }
}
