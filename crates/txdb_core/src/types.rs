//! Core type definitions for the transaction store.

use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// Length of a transaction identifier in bytes.
pub const TXID_LEN: usize = 32;

/// The checkpoint reference kept beside the transaction keyspace.
pub type XrefKey = uuid::Uuid;

/// Content-hash identifier of a transaction; the key of the store.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TxId([u8; TXID_LEN]);

impl TxId {
    /// Wraps raw identifier bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; TXID_LEN]) -> Self {
        Self(bytes)
    }

    /// Derives the identifier of a serialized transaction (double SHA-256).
    #[must_use]
    pub fn hash_of(payload: &[u8]) -> Self {
        let first = Sha256::digest(payload);
        let second = Sha256::digest(first);
        Self(second.into())
    }

    /// Returns the raw identifier bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; TXID_LEN] {
        &self.0
    }

    /// Returns the identifier as lowercase hex.
    #[must_use]
    pub fn to_hex(&self) -> String {
        let mut out = String::with_capacity(TXID_LEN * 2);
        for byte in &self.0 {
            out.push_str(&format!("{byte:02x}"));
        }
        out
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxId({})", &self.to_hex()[..16])
    }
}

impl FromStr for TxId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != TXID_LEN * 2 || !s.is_ascii() {
            return Err(CoreError::invalid_operation(format!(
                "txid must be {} hex characters, got {:?}",
                TXID_LEN * 2,
                s
            )));
        }
        let mut bytes = [0u8; TXID_LEN];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16)
                .map_err(|_| CoreError::invalid_operation(format!("invalid hex in txid {s:?}")))?;
        }
        Ok(Self(bytes))
    }
}

/// A transaction as stored: identifier plus serialized payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxRecord {
    /// Transaction identifier.
    pub txid: TxId,
    /// Serialized transaction bytes.
    pub payload: Bytes,
}

impl TxRecord {
    /// Creates a record with an explicit identifier.
    pub fn new(txid: TxId, payload: impl Into<Bytes>) -> Self {
        Self {
            txid,
            payload: payload.into(),
        }
    }

    /// Creates a record keyed by the hash of its payload.
    pub fn from_payload(payload: impl Into<Bytes>) -> Self {
        let payload = payload.into();
        Self {
            txid: TxId::hash_of(&payload),
            payload,
        }
    }

    /// Returns the payload length, the unit of disk accounting.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.payload.len() as u64
    }

    /// Returns the (identifier, length) pair used to delete this record.
    #[must_use]
    pub fn tx_data(&self) -> TxData {
        TxData::new(self.txid, self.size())
    }
}

/// Identifier and length of a stored transaction, as used for deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TxData {
    /// Transaction identifier.
    pub txid: TxId,
    /// Payload length in bytes.
    pub size: u64,
}

impl TxData {
    /// Creates a new (identifier, length) pair.
    #[must_use]
    pub const fn new(txid: TxId, size: u64) -> Self {
        Self { txid, size }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_of_is_double_sha256() {
        // sha256d("") is a well known constant.
        let txid = TxId::hash_of(b"");
        assert_eq!(
            txid.to_hex(),
            "5df6e0e2761359d30a8275058e299fcc0381534545f55cf43e41983f5d4c9456"
        );
    }

    #[test]
    fn hex_parse_roundtrip() {
        let txid = TxId::hash_of(b"some transaction");
        let parsed: TxId = txid.to_string().parse().unwrap();
        assert_eq!(parsed, txid);
    }

    #[test]
    fn hex_parse_rejects_garbage() {
        assert!("abc".parse::<TxId>().is_err());
        assert!("zz".repeat(TXID_LEN).parse::<TxId>().is_err());
    }

    #[test]
    fn record_size_and_tx_data() {
        let record = TxRecord::from_payload(vec![7u8; 42]);
        assert_eq!(record.size(), 42);
        assert_eq!(record.tx_data(), TxData::new(record.txid, 42));
        assert_eq!(record.txid, TxId::hash_of(&[7u8; 42]));
    }
}
