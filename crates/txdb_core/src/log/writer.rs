//! Log writer.

use crate::error::{CoreError, CoreResult};
use crate::log::iterator::LogRecordIterator;
use crate::log::record::{encode_frame, LogRecord};
use txdb_storage::StorageBackend;

/// Appends framed records to a storage backend.
///
/// Appends are all-or-nothing from the caller's point of view: if writing or
/// syncing a record fails, the backend is cut back to its previous size so
/// a later append never lands behind half a record.
pub struct LogWriter {
    backend: Box<dyn StorageBackend>,
    sync_on_write: bool,
}

impl LogWriter {
    /// Creates a new writer over `backend`.
    pub fn new(backend: Box<dyn StorageBackend>, sync_on_write: bool) -> Self {
        Self {
            backend,
            sync_on_write,
        }
    }

    /// Appends a record and returns the offset of its header.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be encoded or written. The log
    /// is left exactly as it was before the call.
    pub fn append(&mut self, record: &LogRecord) -> CoreResult<u64> {
        let frame = encode_frame(record)?;
        let before = self.backend.size()?;

        let result = self.backend.append(&frame).and_then(|offset| {
            if self.sync_on_write {
                self.backend.sync()?;
            } else {
                self.backend.flush()?;
            }
            Ok(offset)
        });

        match result {
            Ok(offset) => Ok(offset),
            Err(e) => {
                if let Err(rollback) = self.backend.truncate(before) {
                    tracing::error!(error = %rollback, size = before, "failed to roll back partial log append");
                }
                Err(CoreError::from(e))
            }
        }
    }

    /// Reads `len` bytes at `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if the range is not inside the log.
    pub fn read_at(&self, offset: u64, len: usize) -> CoreResult<Vec<u8>> {
        Ok(self.backend.read_at(offset, len)?)
    }

    /// Returns the current log size.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend size cannot be read.
    pub fn size(&self) -> CoreResult<u64> {
        Ok(self.backend.size()?)
    }

    /// Returns a streaming iterator over the log from the start.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be accessed.
    pub fn iter(&self) -> CoreResult<LogRecordIterator<'_>> {
        LogRecordIterator::new(self.backend.as_ref(), 0)
    }

    /// Cuts the log to `size` bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if truncation fails.
    pub fn truncate(&mut self, size: u64) -> CoreResult<()> {
        self.backend.truncate(size)?;
        Ok(())
    }

    /// Empties the log.
    ///
    /// # Errors
    ///
    /// Returns an error if truncation fails.
    pub fn clear(&mut self) -> CoreResult<()> {
        self.truncate(0)
    }

    /// Forces everything written so far to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails.
    pub fn sync(&mut self) -> CoreResult<()> {
        self.backend.sync()?;
        Ok(())
    }

    /// Swaps in a new backend and returns the old one.
    pub fn replace_backend(&mut self, backend: Box<dyn StorageBackend>) -> Box<dyn StorageBackend> {
        std::mem::replace(&mut self.backend, backend)
    }

    /// Returns whether every append is synced.
    #[must_use]
    pub fn sync_on_write(&self) -> bool {
        self.sync_on_write
    }
}

impl std::fmt::Debug for LogWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogWriter")
            .field("size", &self.backend.size().ok())
            .field("sync_on_write", &self.sync_on_write)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TxId;
    use bytes::Bytes;
    use txdb_storage::{FaultInjector, FaultPoint, InMemoryBackend};

    fn commit(n: u8) -> LogRecord {
        LogRecord::Commit {
            writes: vec![(TxId::from_bytes([n; 32]), Bytes::from(vec![n; 16]))],
            deletes: vec![],
        }
    }

    #[test]
    fn append_returns_offsets() {
        let mut writer = LogWriter::new(Box::new(InMemoryBackend::new()), true);
        let first = writer.append(&commit(1)).unwrap();
        let second = writer.append(&commit(2)).unwrap();
        assert_eq!(first, 0);
        assert!(second > first);

        let records: Vec<LogRecord> = writer.iter().unwrap().map(|r| r.unwrap().record).collect();
        assert_eq!(records, vec![commit(1), commit(2)]);
    }

    #[test]
    fn failed_append_leaves_no_partial_record() {
        let faults = FaultInjector::new();
        let mut writer = LogWriter::new(Box::new(InMemoryBackend::with_faults(faults.clone())), true);
        writer.append(&commit(1)).unwrap();
        let size = writer.size().unwrap();

        faults.fail_next(FaultPoint::Append, 1);
        assert!(writer.append(&commit(2)).is_err());
        assert_eq!(writer.size().unwrap(), size);

        writer.append(&commit(3)).unwrap();
        let records: Vec<LogRecord> = writer.iter().unwrap().map(|r| r.unwrap().record).collect();
        assert_eq!(records, vec![commit(1), commit(3)]);
    }

    #[test]
    fn failed_sync_rolls_back() {
        let faults = FaultInjector::new();
        let mut writer = LogWriter::new(Box::new(InMemoryBackend::with_faults(faults.clone())), true);
        faults.fail_next(FaultPoint::Sync, 1);
        assert!(writer.append(&commit(1)).is_err());
        assert_eq!(writer.size().unwrap(), 0);
    }

    #[test]
    fn clear_empties_log() {
        let mut writer = LogWriter::new(Box::new(InMemoryBackend::new()), false);
        writer.append(&commit(1)).unwrap();
        writer.clear().unwrap();
        assert_eq!(writer.size().unwrap(), 0);
        assert!(writer.iter().unwrap().next().is_none());
    }

    #[test]
    fn replace_backend_swaps_contents() {
        let mut writer = LogWriter::new(Box::new(InMemoryBackend::new()), false);
        writer.append(&commit(1)).unwrap();
        let old = writer.replace_backend(Box::new(InMemoryBackend::new()));
        assert!(old.size().unwrap() > 0);
        assert_eq!(writer.size().unwrap(), 0);
    }
}
