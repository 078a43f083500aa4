//! Failure injection for exercising I/O error paths.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{StorageError, StorageResult};

const ALWAYS: u64 = u64::MAX;

/// An operation a [`FaultInjector`] can make fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultPoint {
    /// `StorageBackend::append`. The in-memory backend writes half of the
    /// data before failing, leaving a torn tail.
    Append,
    /// `StorageBackend::sync`.
    Sync,
    /// `StorageBackend::read_at`.
    Read,
    /// `StorageBackend::truncate`.
    Truncate,
}

#[derive(Debug, Default)]
struct Armed {
    append: AtomicU64,
    sync: AtomicU64,
    read: AtomicU64,
    truncate: AtomicU64,
}

impl Armed {
    fn slot(&self, point: FaultPoint) -> &AtomicU64 {
        match point {
            FaultPoint::Append => &self.append,
            FaultPoint::Sync => &self.sync,
            FaultPoint::Read => &self.read,
            FaultPoint::Truncate => &self.truncate,
        }
    }
}

/// Shared switchboard of pending failures.
///
/// Clones share state, so a test can keep one handle while the backend it
/// was attached to is owned by a store.
///
/// ```rust
/// use txdb_storage::{FaultInjector, FaultPoint, InMemoryBackend, StorageBackend};
///
/// let faults = FaultInjector::new();
/// let mut backend = InMemoryBackend::with_faults(faults.clone());
/// faults.fail_next(FaultPoint::Sync, 1);
/// assert!(backend.sync().is_err());
/// assert!(backend.sync().is_ok());
/// ```
#[derive(Debug, Clone, Default)]
pub struct FaultInjector {
    armed: Arc<Armed>,
}

impl FaultInjector {
    /// Creates an injector with nothing armed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `times` calls at `point` fail.
    pub fn fail_next(&self, point: FaultPoint, times: u64) {
        self.armed.slot(point).store(times, Ordering::SeqCst);
    }

    /// Makes every call at `point` fail until [`FaultInjector::heal`].
    pub fn fail_always(&self, point: FaultPoint) {
        self.armed.slot(point).store(ALWAYS, Ordering::SeqCst);
    }

    /// Disarms every fault point.
    pub fn heal(&self) {
        for point in [
            FaultPoint::Append,
            FaultPoint::Sync,
            FaultPoint::Read,
            FaultPoint::Truncate,
        ] {
            self.armed.slot(point).store(0, Ordering::SeqCst);
        }
    }

    /// Consumes one armed failure at `point`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Injected`] when a failure was armed.
    pub fn check(&self, point: FaultPoint) -> StorageResult<()> {
        let slot = self.armed.slot(point);
        let consumed = slot
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| match remaining {
                0 => None,
                ALWAYS => Some(ALWAYS),
                n => Some(n - 1),
            })
            .is_ok();
        if consumed {
            Err(StorageError::Injected(point))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unarmed_points_pass() {
        let faults = FaultInjector::new();
        assert!(faults.check(FaultPoint::Append).is_ok());
        assert!(faults.check(FaultPoint::Read).is_ok());
    }

    #[test]
    fn fail_next_counts_down() {
        let faults = FaultInjector::new();
        faults.fail_next(FaultPoint::Append, 2);
        assert!(faults.check(FaultPoint::Append).is_err());
        assert!(faults.check(FaultPoint::Append).is_err());
        assert!(faults.check(FaultPoint::Append).is_ok());
    }

    #[test]
    fn fail_always_until_healed() {
        let faults = FaultInjector::new();
        faults.fail_always(FaultPoint::Sync);
        for _ in 0..5 {
            assert!(matches!(
                faults.check(FaultPoint::Sync),
                Err(StorageError::Injected(FaultPoint::Sync))
            ));
        }
        faults.heal();
        assert!(faults.check(FaultPoint::Sync).is_ok());
    }

    #[test]
    fn clones_share_state() {
        let faults = FaultInjector::new();
        let other = faults.clone();
        other.fail_next(FaultPoint::Truncate, 1);
        assert!(faults.check(FaultPoint::Truncate).is_err());
        assert!(other.check(FaultPoint::Truncate).is_ok());
    }
}
