//! Crash recovery testing for the transaction store.
//!
//! [`CrashableBackend`] wraps a real backend and stops accepting writes
//! once a byte budget is spent, leaving whatever partial frame was in
//! flight on disk. [`CrashRecoveryHarness`] drives a store into such a
//! crash and checks what survives a reopen.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use txdb_testkit::crash::CrashRecoveryHarness;
//!
//! let mut harness = CrashRecoveryHarness::with_temp_dir().unwrap();
//! assert!(harness.run_all());
//! ```

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tempfile::TempDir;
use txdb_core::{Config, CoreResult, MempoolTxDb, StoreDir, TxData};
use txdb_storage::{FileBackend, StorageBackend, StorageError, StorageResult};

use crate::fixtures::make_entries;

/// Shared switch controlling a [`CrashableBackend`].
///
/// Clones share state, so a test keeps one while the store owns the
/// backend.
#[derive(Debug, Clone)]
pub struct CrashControl {
    state: Arc<CrashState>,
}

#[derive(Debug)]
struct CrashState {
    budget: AtomicU64,
    written: AtomicU64,
    crashed: AtomicBool,
}

impl Default for CrashControl {
    fn default() -> Self {
        Self {
            state: Arc::new(CrashState {
                budget: AtomicU64::new(u64::MAX),
                written: AtomicU64::new(0),
                crashed: AtomicBool::new(false),
            }),
        }
    }
}

impl CrashControl {
    /// Creates a control that never crashes until armed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Crashes once `bytes` more bytes have been appended.
    pub fn crash_after(&self, bytes: u64) {
        let written = self.state.written.load(Ordering::SeqCst);
        self.state.budget.store(written.saturating_add(bytes), Ordering::SeqCst);
    }

    /// Crashes immediately.
    pub fn crash_now(&self) {
        self.state.crashed.store(true, Ordering::SeqCst);
    }

    /// Whether the backend has crashed.
    pub fn has_crashed(&self) -> bool {
        self.state.crashed.load(Ordering::SeqCst)
    }

    /// Bytes appended through the backend so far.
    pub fn bytes_written(&self) -> u64 {
        self.state.written.load(Ordering::SeqCst)
    }

    fn check(&self) -> StorageResult<()> {
        if self.has_crashed() {
            Err(crashed_error())
        } else {
            Ok(())
        }
    }
}

fn crashed_error() -> StorageError {
    StorageError::Io(io::Error::other("simulated crash"))
}

/// A storage backend wrapper that can simulate crashes.
///
/// After the crash every mutating call fails, including `truncate`, so a
/// torn frame stays on disk exactly as a killed process would leave it.
/// Reads keep working.
pub struct CrashableBackend {
    inner: Box<dyn StorageBackend>,
    control: CrashControl,
}

impl CrashableBackend {
    /// Wraps `inner`, returning the backend and its control handle.
    pub fn new(inner: Box<dyn StorageBackend>) -> (Self, CrashControl) {
        let control = CrashControl::new();
        (
            Self {
                inner,
                control: control.clone(),
            },
            control,
        )
    }
}

impl std::fmt::Debug for CrashableBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrashableBackend")
            .field("control", &self.control)
            .finish_non_exhaustive()
    }
}

impl StorageBackend for CrashableBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.inner.read_at(offset, len)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        self.control.check()?;

        let state = &self.control.state;
        let written = state.written.load(Ordering::SeqCst);
        let budget = state.budget.load(Ordering::SeqCst);
        let len = data.len() as u64;

        if written.saturating_add(len) > budget {
            state.crashed.store(true, Ordering::SeqCst);
            let partial = usize::try_from(budget.saturating_sub(written)).unwrap_or(data.len());
            if partial > 0 {
                self.inner.append(&data[..partial])?;
                self.inner.flush()?;
                state.written.fetch_add(partial as u64, Ordering::SeqCst);
            }
            return Err(crashed_error());
        }

        let offset = self.inner.append(data)?;
        state.written.fetch_add(len, Ordering::SeqCst);
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.control.check()?;
        self.inner.flush()
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.control.check()?;
        self.inner.sync()
    }

    fn size(&self) -> StorageResult<u64> {
        self.inner.size()
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        self.control.check()?;
        self.inner.truncate(new_size)
    }
}

/// A store opened over a crashable log file, holding the directory lock.
pub struct CrashSession {
    /// The store.
    pub db: MempoolTxDb,
    /// Crash switch for the store's log.
    pub control: CrashControl,
    _dir: StoreDir,
}

impl CrashSession {
    /// Opens the store in `path` with its log behind a [`CrashableBackend`].
    ///
    /// # Errors
    ///
    /// Returns an error if the directory is locked or the log cannot be
    /// replayed.
    pub fn open(path: &Path, config: Config) -> CoreResult<Self> {
        let dir = StoreDir::open(path, true)?;
        let file = FileBackend::open(&dir.log_path())?;
        let (backend, control) = CrashableBackend::new(Box::new(file));
        let db = MempoolTxDb::open_with_backend(Box::new(backend), config)?;
        Ok(Self { db, control, _dir: dir })
    }
}

/// Result of a crash recovery scenario.
#[derive(Debug, Clone)]
pub struct CrashRecoveryResult {
    /// Whether the scenario passed.
    pub passed: bool,
    /// What was tested.
    pub description: String,
    /// Transactions expected after recovery.
    pub expected_txs: u64,
    /// Transactions found after recovery.
    pub actual_txs: u64,
    /// Failure detail.
    pub error: Option<String>,
}

impl CrashRecoveryResult {
    /// Creates a passing result.
    pub fn pass(description: &str, txs: u64) -> Self {
        Self {
            passed: true,
            description: description.to_string(),
            expected_txs: txs,
            actual_txs: txs,
            error: None,
        }
    }

    /// Creates a failing result.
    pub fn fail(description: &str, expected: u64, actual: u64, error: &str) -> Self {
        Self {
            passed: false,
            description: description.to_string(),
            expected_txs: expected,
            actual_txs: actual,
            error: Some(error.to_string()),
        }
    }

    fn check(description: &str, expected: u64, actual: u64, ok: bool, error: &str) -> Self {
        if ok && expected == actual {
            Self::pass(description, actual)
        } else {
            Self::fail(description, expected, actual, error)
        }
    }
}

/// Test harness for crash recovery scenarios.
pub struct CrashRecoveryHarness {
    /// Store directory used by every scenario.
    pub db_path: PathBuf,
    /// Results of the scenarios run so far.
    pub results: Vec<CrashRecoveryResult>,
    _temp_dir: Option<TempDir>,
}

impl CrashRecoveryHarness {
    /// Creates a harness using `db_path`. The directory is wiped before
    /// each scenario.
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
            results: Vec::new(),
            _temp_dir: None,
        }
    }

    /// Creates a harness in a temporary directory removed on drop.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn with_temp_dir() -> io::Result<Self> {
        let temp_dir = TempDir::new()?;
        let mut harness = Self::new(temp_dir.path().join("txdb"));
        harness._temp_dir = Some(temp_dir);
        Ok(harness)
    }

    fn fresh(&self) -> io::Result<()> {
        match std::fs::remove_dir_all(&self.db_path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }

    fn reopen(&self) -> CoreResult<MempoolTxDb> {
        MempoolTxDb::open(&self.db_path, Config::default())
    }

    fn record(&mut self, description: &str, expected: u64, run: CoreResult<CrashRecoveryResult>) -> CrashRecoveryResult {
        let result = run.unwrap_or_else(|e| CrashRecoveryResult::fail(description, expected, 0, &e.to_string()));
        self.results.push(result.clone());
        result
    }

    /// Committed batches survive a crash that happens between commits.
    pub fn test_committed_data_survives(&mut self) -> CrashRecoveryResult {
        const DESC: &str = "committed transactions survive a crash";
        let entries = make_entries(10);

        let run = (|| -> CoreResult<CrashRecoveryResult> {
            self.fresh()?;
            let session = CrashSession::open(&self.db_path, Config::default())?;
            session.db.add_transactions(&entries)?;
            session.control.crash_now();
            drop(session);

            let db = self.reopen()?;
            let intact = entries
                .iter()
                .all(|e| db.get_transaction(&e.txid).as_ref() == Some(&e.payload));
            Ok(CrashRecoveryResult::check(
                DESC,
                10,
                db.tx_count(),
                intact,
                "payloads differ after reopen",
            ))
        })();
        self.record(DESC, 10, run)
    }

    /// A commit torn halfway through its frame is dropped on reopen while
    /// earlier commits are kept.
    pub fn test_torn_commit_discarded(&mut self) -> CrashRecoveryResult {
        const DESC: &str = "torn commit is discarded";
        let entries = make_entries(8);
        let (first, second) = entries.split_at(5);

        let run = (|| -> CoreResult<CrashRecoveryResult> {
            self.fresh()?;
            let session = CrashSession::open(&self.db_path, Config::default())?;
            session.db.add_transactions(first)?;
            session.control.crash_after(40);
            let torn = session.db.add_transactions(second).is_err();
            drop(session);

            let db = self.reopen()?;
            let cut = db.recovery().truncated_bytes > 0;
            let none_of_second = second.iter().all(|e| !db.contains(&e.txid));
            Ok(CrashRecoveryResult::check(
                DESC,
                5,
                db.tx_count(),
                torn && cut && none_of_second,
                "torn frame was not dropped cleanly",
            ))
        })();
        self.record(DESC, 5, run)
    }

    /// Deletes and a compaction survive a reopen.
    pub fn test_compaction_survives(&mut self) -> CrashRecoveryResult {
        const DESC: &str = "compacted log replays to the same contents";
        let entries = make_entries(12);

        let run = (|| -> CoreResult<CrashRecoveryResult> {
            self.fresh()?;
            let db = self.reopen()?;
            db.add_transactions(&entries)?;
            let removed: Vec<TxData> = entries[..7].iter().map(|e| e.tx_data()).collect();
            db.remove_transactions(&removed)?;
            let usage = db.disk_usage();
            let log_before = db.log_size();
            db.compact()?;
            drop(db);

            let db = self.reopen()?;
            Ok(CrashRecoveryResult::check(
                DESC,
                5,
                db.tx_count(),
                db.disk_usage() == usage && db.log_size() < log_before,
                "usage changed or log did not shrink",
            ))
        })();
        self.record(DESC, 5, run)
    }

    /// Runs every scenario and reports whether all passed.
    pub fn run_all(&mut self) -> bool {
        self.test_committed_data_survives();
        self.test_torn_commit_discarded();
        self.test_compaction_survives();
        self.results.iter().all(|r| r.passed)
    }

    /// Prints a summary of the results.
    pub fn print_summary(&self) {
        let passed = self.results.iter().filter(|r| r.passed).count();
        println!("crash recovery: {passed}/{} passed", self.results.len());
        for result in self.results.iter().filter(|r| !r.passed) {
            println!(
                "  FAILED {}: expected {} txs, found {} ({})",
                result.description,
                result.expected_txs,
                result.actual_txs,
                result.error.as_deref().unwrap_or("no detail")
            );
        }
    }
}
