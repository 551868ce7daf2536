//! Transaction identifiers and records.

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;

/// Cross-reference marker stored next to the transactions.
///
/// Names the external state the store content was last validated against.
pub type XrefKey = uuid::Uuid;

/// 32-byte transaction identifier.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TxId([u8; 32]);

impl TxId {
    /// Length of an identifier in bytes.
    pub const LEN: usize = 32;

    /// Wrap raw identifier bytes.
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Build an identifier from a slice, `None` unless it is exactly 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        bytes.try_into().ok().map(Self)
    }

    /// Raw identifier bytes.
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl From<[u8; 32]> for TxId {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxId({self})")
    }
}

/// Error parsing a hex transaction id.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseTxIdError {
    /// Not valid hex.
    #[error("invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),
    /// Decoded to the wrong number of bytes.
    #[error("expected {expected} bytes, got {actual}")]
    Length { expected: usize, actual: usize },
}

impl FromStr for TxId {
    type Err = ParseTxIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = hex::decode(s.strip_prefix("0x").unwrap_or(s))?;
        Self::from_slice(&raw).ok_or(ParseTxIdError::Length {
            expected: Self::LEN,
            actual: raw.len(),
        })
    }
}

/// A transaction body to persist.
///
/// `size` is what the store accounts for. It normally equals the payload
/// length but callers tracking a different notion of size may set it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxRecord {
    pub id: TxId,
    pub bytes: Bytes,
    pub size: u64,
}

impl TxRecord {
    /// Record whose accounted size is the payload length.
    pub fn new(id: TxId, bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        let size = bytes.len() as u64;
        Self { id, bytes, size }
    }

    /// Record with an explicit accounted size.
    pub fn with_size(id: TxId, bytes: impl Into<Bytes>, size: u64) -> Self {
        Self {
            id,
            bytes: bytes.into(),
            size,
        }
    }

    /// Removal handle for this record.
    pub fn tx_data(&self) -> TxData {
        TxData::new(self.id, self.size)
    }
}

/// Removal handle: id and accounted size, no payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TxData {
    pub id: TxId,
    pub size: u64,
}

impl TxData {
    pub const fn new(id: TxId, size: u64) -> Self {
        Self { id, size }
    }
}
