//! Log record types and serialization.

use bytes::Bytes;

use crate::error::{CoreError, CoreResult};
use crate::types::{TxId, XrefKey, TXID_LEN};

/// Magic bytes identifying a log record.
pub const LOG_MAGIC: [u8; 4] = *b"MTXL";

/// Current log format version.
pub const LOG_VERSION: u16 = 1;

/// Header size: magic (4) + version (2) + type (1) + length (4).
pub const HEADER_SIZE: usize = 11;

/// Trailing CRC size.
pub const CRC_SIZE: usize = 4;

/// Type of log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LogRecordType {
    /// An atomically committed set of writes and deletes.
    Commit = 1,
    /// Checkpoint reference set.
    SetXref = 2,
    /// Checkpoint reference cleared.
    ClearXref = 3,
}

impl LogRecordType {
    /// Converts a byte to a record type.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Commit),
            2 => Some(Self::SetXref),
            3 => Some(Self::ClearXref),
            _ => None,
        }
    }

    /// Converts the record type to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

/// A record of the transaction log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogRecord {
    /// Writes and deletes applied together. Replaying a commit also clears
    /// the checkpoint reference.
    Commit {
        /// New records, in batch order.
        writes: Vec<(TxId, Bytes)>,
        /// Removed identifiers.
        deletes: Vec<TxId>,
    },

    /// Sets the checkpoint reference.
    SetXref {
        /// The new reference.
        key: XrefKey,
    },

    /// Clears the checkpoint reference.
    ClearXref,
}

impl LogRecord {
    /// Largest payload a single write may carry (4-byte length field).
    pub const MAX_TX_SIZE: usize = u32::MAX as usize;

    /// Returns the record type.
    #[must_use]
    pub fn record_type(&self) -> LogRecordType {
        match self {
            Self::Commit { .. } => LogRecordType::Commit,
            Self::SetXref { .. } => LogRecordType::SetXref,
            Self::ClearXref => LogRecordType::ClearXref,
        }
    }

    /// For a commit, the position of each write's payload bytes relative to
    /// the start of the encoded record payload, in `writes` order.
    ///
    /// The engine adds the record's payload offset to these to locate
    /// transaction bytes inside the log without keeping them in memory.
    #[must_use]
    pub fn write_positions(&self) -> Vec<u64> {
        let Self::Commit { writes, .. } = self else {
            return Vec::new();
        };
        let mut positions = Vec::with_capacity(writes.len());
        let mut cursor = 4u64;
        for (_, payload) in writes {
            cursor += (TXID_LEN + 4) as u64;
            positions.push(cursor);
            cursor += payload.len() as u64;
        }
        positions
    }

    /// Serializes the record payload (without envelope).
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::PayloadTooLarge`] if a written transaction does
    /// not fit the 32-bit length field.
    pub fn encode_payload(&self) -> CoreResult<Vec<u8>> {
        let mut buf = Vec::new();

        match self {
            Self::Commit { writes, deletes } => {
                let payload_bytes: usize = writes.iter().map(|(_, p)| p.len()).sum();
                buf.reserve(8 + writes.len() * (TXID_LEN + 4) + payload_bytes + deletes.len() * TXID_LEN);

                buf.extend_from_slice(&count_u32(writes.len())?.to_le_bytes());
                for (txid, payload) in writes {
                    if payload.len() > Self::MAX_TX_SIZE {
                        return Err(CoreError::PayloadTooLarge {
                            size: payload.len(),
                            max: Self::MAX_TX_SIZE,
                        });
                    }
                    buf.extend_from_slice(txid.as_bytes());
                    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
                    buf.extend_from_slice(payload);
                }

                buf.extend_from_slice(&count_u32(deletes.len())?.to_le_bytes());
                for txid in deletes {
                    buf.extend_from_slice(txid.as_bytes());
                }
            }

            Self::SetXref { key } => {
                buf.extend_from_slice(key.as_bytes());
            }

            Self::ClearXref => {}
        }

        Ok(buf)
    }

    /// Deserializes a record from its type and payload.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::LogCorruption`] if the payload is short or has
    /// trailing bytes.
    pub fn decode_payload(record_type: LogRecordType, payload: &[u8]) -> CoreResult<Self> {
        let mut reader = PayloadReader::new(payload);

        let record = match record_type {
            LogRecordType::Commit => {
                let write_count = reader.read_u32()? as usize;
                let mut writes = Vec::with_capacity(write_count.min(payload.len() / (TXID_LEN + 4)));
                for _ in 0..write_count {
                    let txid = reader.read_txid()?;
                    let len = reader.read_u32()? as usize;
                    let bytes = reader.read_slice(len)?;
                    writes.push((txid, Bytes::copy_from_slice(bytes)));
                }

                let delete_count = reader.read_u32()? as usize;
                let mut deletes = Vec::with_capacity(delete_count.min(payload.len() / TXID_LEN));
                for _ in 0..delete_count {
                    deletes.push(reader.read_txid()?);
                }

                Self::Commit { writes, deletes }
            }

            LogRecordType::SetXref => {
                let bytes: [u8; 16] = reader
                    .read_slice(16)?
                    .try_into()
                    .map_err(|_| CoreError::log_corruption("invalid xref key"))?;
                Self::SetXref {
                    key: XrefKey::from_bytes(bytes),
                }
            }

            LogRecordType::ClearXref => Self::ClearXref,
        };

        reader.finish(record_type)?;
        Ok(record)
    }
}

fn count_u32(count: usize) -> CoreResult<u32> {
    u32::try_from(count).map_err(|_| CoreError::invalid_operation("too many operations in one commit"))
}

struct PayloadReader<'a> {
    payload: &'a [u8],
    cursor: usize,
}

impl<'a> PayloadReader<'a> {
    fn new(payload: &'a [u8]) -> Self {
        Self { payload, cursor: 0 }
    }

    fn read_slice(&mut self, len: usize) -> CoreResult<&'a [u8]> {
        let end = self
            .cursor
            .checked_add(len)
            .filter(|end| *end <= self.payload.len())
            .ok_or_else(|| CoreError::log_corruption("unexpected end of payload"))?;
        let slice = &self.payload[self.cursor..end];
        self.cursor = end;
        Ok(slice)
    }

    fn read_u32(&mut self) -> CoreResult<u32> {
        let bytes: [u8; 4] = self
            .read_slice(4)?
            .try_into()
            .map_err(|_| CoreError::log_corruption("invalid u32"))?;
        Ok(u32::from_le_bytes(bytes))
    }

    fn read_txid(&mut self) -> CoreResult<TxId> {
        let bytes: [u8; TXID_LEN] = self
            .read_slice(TXID_LEN)?
            .try_into()
            .map_err(|_| CoreError::log_corruption("invalid txid"))?;
        Ok(TxId::from_bytes(bytes))
    }

    fn finish(&self, record_type: LogRecordType) -> CoreResult<()> {
        if self.cursor != self.payload.len() {
            return Err(CoreError::log_corruption(format!(
                "trailing bytes in {:?} record: expected {} bytes, got {}",
                record_type,
                self.cursor,
                self.payload.len()
            )));
        }
        Ok(())
    }
}

/// Builds the full framed record: header, payload, CRC32.
///
/// # Errors
///
/// Returns an error if the payload cannot be encoded or exceeds 4 GiB.
pub fn encode_frame(record: &LogRecord) -> CoreResult<Vec<u8>> {
    let payload = record.encode_payload()?;
    let len = u32::try_from(payload.len())
        .map_err(|_| CoreError::invalid_operation("log record payload too large"))?;

    let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
    frame.extend_from_slice(&LOG_MAGIC);
    frame.extend_from_slice(&LOG_VERSION.to_le_bytes());
    frame.push(record.record_type().as_byte());
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(&payload);

    let crc = crc32fast::hash(&frame);
    frame.extend_from_slice(&crc.to_le_bytes());
    Ok(frame)
}
