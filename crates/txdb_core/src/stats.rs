//! Store statistics.
//!
//! Counters cover what happened since the store was opened; they are not
//! persisted.
//!
//! ```rust,ignore
//! let stats = db.stats();
//! println!("commits: {}", stats.commits);
//! println!("written: {}", stats.records_written);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

/// Store statistics.
///
/// All counters are atomic and can be read while commits are in progress.
#[derive(Debug, Default)]
pub struct TxDbStats {
    commits: AtomicU64,
    failed_commits: AtomicU64,
    records_written: AtomicU64,
    records_deleted: AtomicU64,
    bytes_written: AtomicU64,
    callbacks_fired: AtomicU64,
    compactions: AtomicU64,
}

impl TxDbStats {
    /// Creates a new stats instance.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_commit(&self, written: u64, deleted: u64, bytes: u64) {
        self.commits.fetch_add(1, Ordering::Relaxed);
        self.records_written.fetch_add(written, Ordering::Relaxed);
        self.records_deleted.fetch_add(deleted, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_failed_commit(&self) {
        self.failed_commits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_callbacks(&self, count: u64) {
        self.callbacks_fired.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn record_compaction(&self) {
        self.compactions.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the number of successful commits.
    pub fn commits(&self) -> u64 {
        self.commits.load(Ordering::Relaxed)
    }

    /// Returns the number of commits that returned an error.
    pub fn failed_commits(&self) -> u64 {
        self.failed_commits.load(Ordering::Relaxed)
    }

    /// Returns a snapshot of all stats.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            commits: self.commits(),
            failed_commits: self.failed_commits(),
            records_written: self.records_written.load(Ordering::Relaxed),
            records_deleted: self.records_deleted.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            callbacks_fired: self.callbacks_fired.load(Ordering::Relaxed),
            compactions: self.compactions.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of [`TxDbStats`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Successful commits.
    pub commits: u64,
    /// Commits that returned an error.
    pub failed_commits: u64,
    /// Transactions written to the log.
    pub records_written: u64,
    /// Transactions removed from the log.
    pub records_deleted: u64,
    /// Transaction payload bytes written.
    pub bytes_written: u64,
    /// Persisted-callbacks invoked.
    pub callbacks_fired: u64,
    /// Log compactions performed.
    pub compactions: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_stats_are_zero() {
        let stats = TxDbStats::new();
        assert_eq!(stats.snapshot(), StatsSnapshot::default());
    }

    #[test]
    fn record_commits() {
        let stats = TxDbStats::new();
        stats.record_commit(3, 1, 300);
        stats.record_commit(1, 0, 50);
        stats.record_failed_commit();
        stats.record_callbacks(4);

        let snap = stats.snapshot();
        assert_eq!(snap.commits, 2);
        assert_eq!(snap.failed_commits, 1);
        assert_eq!(snap.records_written, 4);
        assert_eq!(snap.records_deleted, 1);
        assert_eq!(snap.bytes_written, 350);
        assert_eq!(snap.callbacks_fired, 4);
    }

    #[test]
    fn concurrent_updates() {
        use std::sync::Arc;
        use std::thread;

        let stats = Arc::new(TxDbStats::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let s = Arc::clone(&stats);
                thread::spawn(move || {
                    for _ in 0..100 {
                        s.record_commit(1, 0, 1);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(stats.commits(), 800);
    }
}
