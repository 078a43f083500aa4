//! In-memory storage backend.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use crate::fault::{FaultInjector, FaultPoint};
use parking_lot::RwLock;

/// A storage backend holding the log in a growable buffer.
///
/// Used for ephemeral stores and tests. Attach a [`FaultInjector`] with
/// [`InMemoryBackend::with_faults`] to make appends, syncs, reads or
/// truncations fail on demand; an injected append failure writes the first
/// half of the data before returning the error, like a torn disk write.
///
/// # Example
///
/// ```rust
/// use txdb_storage::{StorageBackend, InMemoryBackend};
///
/// let mut backend = InMemoryBackend::new();
/// assert_eq!(backend.append(b"tx").unwrap(), 0);
/// assert_eq!(backend.size().unwrap(), 2);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    data: RwLock<Vec<u8>>,
    faults: FaultInjector,
}

impl InMemoryBackend {
    /// Creates a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty backend whose operations consult `faults`.
    #[must_use]
    pub fn with_faults(faults: FaultInjector) -> Self {
        Self {
            data: RwLock::new(Vec::new()),
            faults,
        }
    }

    /// Creates a backend preloaded with `data`, e.g. a log image captured
    /// from another backend.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            data: RwLock::new(data),
            faults: FaultInjector::new(),
        }
    }

    /// Returns a copy of the stored bytes.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.data.read().clone()
    }

    /// Returns the injector consulted by this backend.
    #[must_use]
    pub fn faults(&self) -> &FaultInjector {
        &self.faults
    }
}

impl StorageBackend for InMemoryBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.faults.check(FaultPoint::Read)?;

        let data = self.data.read();
        let size = data.len() as u64;
        let end = offset.saturating_add(len as u64);
        if end > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }

        let start = offset as usize;
        Ok(data[start..start + len].to_vec())
    }

    fn append(&mut self, new_data: &[u8]) -> StorageResult<u64> {
        let mut data = self.data.write();
        let offset = data.len() as u64;

        if let Err(e) = self.faults.check(FaultPoint::Append) {
            data.extend_from_slice(&new_data[..new_data.len() / 2]);
            return Err(e);
        }

        data.extend_from_slice(new_data);
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.faults.check(FaultPoint::Sync)
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.data.read().len() as u64)
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        self.faults.check(FaultPoint::Truncate)?;

        let mut data = self.data.write();
        let size = data.len() as u64;
        if new_size > size {
            return Err(StorageError::TruncateBeyondEnd {
                requested: new_size,
                size,
            });
        }

        data.truncate(new_size as usize);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_backend_is_empty() {
        let backend = InMemoryBackend::new();
        assert_eq!(backend.size().unwrap(), 0);
        assert!(backend.data().is_empty());
    }

    #[test]
    fn append_returns_running_offset() {
        let mut backend = InMemoryBackend::new();
        assert_eq!(backend.append(b"hello").unwrap(), 0);
        assert_eq!(backend.append(b" world").unwrap(), 5);
        assert_eq!(backend.size().unwrap(), 11);
        assert_eq!(backend.read_at(6, 5).unwrap(), b"world");
    }

    #[test]
    fn read_past_end_fails() {
        let mut backend = InMemoryBackend::new();
        backend.append(b"hello").unwrap();

        assert!(matches!(
            backend.read_at(10, 5),
            Err(StorageError::ReadPastEnd { .. })
        ));
        assert!(matches!(
            backend.read_at(3, 10),
            Err(StorageError::ReadPastEnd { .. })
        ));
        assert!(backend.read_at(5, 0).unwrap().is_empty());
    }

    #[test]
    fn read_all_returns_everything() {
        let backend = InMemoryBackend::with_data(b"preloaded".to_vec());
        assert_eq!(backend.read_all().unwrap(), b"preloaded");
    }

    #[test]
    fn truncate_shrinks_only() {
        let mut backend = InMemoryBackend::new();
        backend.append(b"hello world").unwrap();

        backend.truncate(5).unwrap();
        assert_eq!(backend.data(), b"hello");

        assert!(matches!(
            backend.truncate(100),
            Err(StorageError::TruncateBeyondEnd { requested: 100, size: 5 })
        ));
    }

    #[test]
    fn injected_append_leaves_torn_tail() {
        let faults = FaultInjector::new();
        let mut backend = InMemoryBackend::with_faults(faults.clone());
        backend.append(b"ok").unwrap();

        faults.fail_next(FaultPoint::Append, 1);
        let err = backend.append(b"12345678").unwrap_err();
        assert!(matches!(err, StorageError::Injected(FaultPoint::Append)));
        assert_eq!(backend.data(), b"ok1234");

        backend.truncate(2).unwrap();
        assert_eq!(backend.append(b"!").unwrap(), 2);
    }

    #[test]
    fn injected_read_and_sync_fail_once() {
        let faults = FaultInjector::new();
        let mut backend = InMemoryBackend::with_faults(faults.clone());
        backend.append(b"data").unwrap();

        faults.fail_next(FaultPoint::Read, 1);
        faults.fail_next(FaultPoint::Sync, 1);
        assert!(backend.read_at(0, 4).is_err());
        assert!(backend.sync().is_err());
        assert_eq!(backend.read_at(0, 4).unwrap(), b"data");
        assert!(backend.sync().is_ok());
    }
}
