//! Streaming log record iterator.
//!
//! Reads records front to back through a bounded buffer, so replaying a
//! large log never holds more than one record (plus read-ahead) in memory.

use crate::error::{CoreError, CoreResult};
use crate::log::record::{LogRecord, LogRecordType, CRC_SIZE, HEADER_SIZE, LOG_MAGIC, LOG_VERSION};
use txdb_storage::StorageBackend;

/// Read-ahead size for streaming iteration.
const READ_BUFFER_SIZE: usize = 64 * 1024; // 64 KB

/// A complete, checksum-verified log record and where it lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// Offset of the record header.
    pub offset: u64,
    /// Total framed length (header, payload and CRC).
    pub len: u64,
    /// The decoded record.
    pub record: LogRecord,
}

impl LogEntry {
    /// Offset of the first payload byte.
    #[must_use]
    pub fn payload_offset(&self) -> u64 {
        self.offset + HEADER_SIZE as u64
    }

    /// Offset just past this record.
    #[must_use]
    pub fn end(&self) -> u64 {
        self.offset + self.len
    }
}

/// A streaming iterator over log records.
///
/// # Error Handling
///
/// - An incomplete header or payload at the end of the log is a torn write
///   and ends iteration cleanly
/// - CRC mismatches, bad magic, unknown types and newer versions yield one
///   error and end iteration
///
/// After iteration stops, [`LogRecordIterator::valid_end`] is the offset
/// just past the last good record, which is where a damaged tail starts.
pub struct LogRecordIterator<'a> {
    backend: &'a dyn StorageBackend,
    total_size: u64,
    /// Offset of the next unread record.
    offset: u64,
    /// Bytes read ahead, starting at `offset`.
    buffer: Vec<u8>,
    finished: bool,
}

impl<'a> LogRecordIterator<'a> {
    /// Creates an iterator starting at `start_offset` (usually 0).
    ///
    /// # Errors
    ///
    /// Returns an error if the backend size cannot be determined.
    pub fn new(backend: &'a dyn StorageBackend, start_offset: u64) -> CoreResult<Self> {
        let total_size = backend.size()?;
        Ok(Self {
            backend,
            total_size,
            offset: start_offset,
            buffer: Vec::new(),
            finished: false,
        })
    }

    /// Offset just past the last record returned.
    #[must_use]
    pub fn valid_end(&self) -> u64 {
        self.offset
    }

    /// Total log size seen when the iterator was created.
    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Makes at least `min_bytes` available at the front of the buffer.
    /// Returns `false` when the log ends first.
    fn ensure_buffered(&mut self, min_bytes: usize) -> CoreResult<bool> {
        if self.buffer.len() >= min_bytes {
            return Ok(true);
        }

        let remaining = self.total_size.saturating_sub(self.offset);
        if remaining < min_bytes as u64 {
            return Ok(false);
        }

        let have = self.buffer.len() as u64;
        let want = (min_bytes.max(READ_BUFFER_SIZE) as u64).min(remaining);
        let more = self
            .backend
            .read_at(self.offset + have, (want - have) as usize)?;
        self.buffer.extend_from_slice(&more);
        Ok(self.buffer.len() >= min_bytes)
    }

    fn read_next(&mut self) -> CoreResult<Option<LogEntry>> {
        let offset = self.offset;

        if !self.ensure_buffered(HEADER_SIZE)? {
            return Ok(None);
        }

        let header = &self.buffer[..HEADER_SIZE];
        if header[0..4] != LOG_MAGIC {
            return Err(CoreError::log_corruption(format!(
                "invalid magic at offset {offset}"
            )));
        }

        let version = u16::from_le_bytes([header[4], header[5]]);
        if version > LOG_VERSION {
            return Err(CoreError::log_corruption(format!(
                "unsupported version {version} at offset {offset}"
            )));
        }

        let type_byte = header[6];
        let record_type = LogRecordType::from_byte(type_byte).ok_or_else(|| {
            CoreError::log_corruption(format!(
                "unknown record type {type_byte} at offset {offset}"
            ))
        })?;

        let payload_len = u32::from_le_bytes([header[7], header[8], header[9], header[10]]) as usize;
        let total_len = HEADER_SIZE + payload_len + CRC_SIZE;

        if !self.ensure_buffered(total_len)? {
            return Ok(None);
        }

        let payload_end = HEADER_SIZE + payload_len;
        let stored_crc = u32::from_le_bytes([
            self.buffer[payload_end],
            self.buffer[payload_end + 1],
            self.buffer[payload_end + 2],
            self.buffer[payload_end + 3],
        ]);
        let computed_crc = crc32fast::hash(&self.buffer[..payload_end]);
        if stored_crc != computed_crc {
            return Err(CoreError::ChecksumMismatch {
                offset,
                expected: stored_crc,
                actual: computed_crc,
            });
        }

        let record = LogRecord::decode_payload(record_type, &self.buffer[HEADER_SIZE..payload_end])?;

        self.buffer.drain(..total_len);
        self.offset += total_len as u64;

        Ok(Some(LogEntry {
            offset,
            len: total_len as u64,
            record,
        }))
    }
}

impl Iterator for LogRecordIterator<'_> {
    type Item = CoreResult<LogEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        match self.read_next() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::record::encode_frame;
    use crate::types::{TxId, XrefKey};
    use bytes::Bytes;
    use txdb_storage::InMemoryBackend;

    fn commit(n: u8, len: usize) -> LogRecord {
        LogRecord::Commit {
            writes: vec![(TxId::from_bytes([n; 32]), Bytes::from(vec![n; len]))],
            deletes: vec![],
        }
    }

    fn backend_with(records: &[LogRecord]) -> InMemoryBackend {
        let mut backend = InMemoryBackend::new();
        for record in records {
            backend.append(&encode_frame(record).unwrap()).unwrap();
        }
        backend
    }

    #[test]
    fn empty_log_yields_nothing() {
        let backend = InMemoryBackend::new();
        let mut iter = LogRecordIterator::new(&backend, 0).unwrap();
        assert!(iter.next().is_none());
        assert_eq!(iter.valid_end(), 0);
    }

    #[test]
    fn reads_records_in_order_with_offsets() {
        let records = vec![
            commit(1, 10),
            LogRecord::SetXref {
                key: XrefKey::from_bytes([7; 16]),
            },
            LogRecord::ClearXref,
        ];
        let backend = backend_with(&records);

        let entries: Vec<LogEntry> = LogRecordIterator::new(&backend, 0)
            .unwrap()
            .collect::<CoreResult<_>>()
            .unwrap();

        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].offset, 0);
        assert_eq!(entries[1].offset, entries[0].end());
        assert_eq!(entries[2].end(), backend.size().unwrap());
        let decoded: Vec<LogRecord> = entries.into_iter().map(|e| e.record).collect();
        assert_eq!(decoded, records);
    }

    #[test]
    fn records_larger_than_read_buffer() {
        let records = vec![commit(1, READ_BUFFER_SIZE * 2 + 17), commit(2, 3)];
        let backend = backend_with(&records);

        let decoded: Vec<LogRecord> = LogRecordIterator::new(&backend, 0)
            .unwrap()
            .map(|r| r.unwrap().record)
            .collect();
        assert_eq!(decoded, records);
    }

    #[test]
    fn torn_tail_ends_cleanly() {
        let mut backend = backend_with(&[commit(1, 8)]);
        let good_end = backend.size().unwrap();
        let frame = encode_frame(&commit(2, 8)).unwrap();
        backend.append(&frame[..frame.len() - 5]).unwrap();

        let mut iter = LogRecordIterator::new(&backend, 0).unwrap();
        assert!(iter.next().unwrap().is_ok());
        assert!(iter.next().is_none());
        assert_eq!(iter.valid_end(), good_end);
    }

    #[test]
    fn flipped_bit_is_checksum_mismatch() {
        let backend = backend_with(&[commit(1, 8), commit(2, 8)]);
        let mut data = backend.data();
        let first_len = encode_frame(&commit(1, 8)).unwrap().len();
        data[first_len + HEADER_SIZE + 40] ^= 0x01;
        let damaged = InMemoryBackend::with_data(data);

        let mut iter = LogRecordIterator::new(&damaged, 0).unwrap();
        assert!(iter.next().unwrap().is_ok());
        let err = iter.next().unwrap().unwrap_err();
        assert!(matches!(err, CoreError::ChecksumMismatch { offset, .. } if offset == first_len as u64));
        assert!(iter.next().is_none());
        assert_eq!(iter.valid_end(), first_len as u64);
    }

    #[test]
    fn garbage_is_invalid_magic() {
        let damaged = InMemoryBackend::with_data(vec![0xEE; 64]);
        let mut iter = LogRecordIterator::new(&damaged, 0).unwrap();
        let err = iter.next().unwrap().unwrap_err();
        assert!(matches!(err, CoreError::LogCorruption { .. }));
    }
}
