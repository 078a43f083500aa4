//! Test fixtures and store helpers.
//!
//! Provides deterministic transactions and temporary stores that clean up
//! after themselves.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tempfile::TempDir;
use txdb_core::{AsyncMempoolTxDb, Config, MempoolTxDb, PersistedCallback, TxId, TxRecord};

const OP_11: u8 = 0x5b;
const OP_EQUAL: u8 = 0x87;

/// Builds `count` distinct transactions.
///
/// Each one spends a single input with a trivial script and pays
/// `33000 + i` to an `OP_11 OP_EQUAL` output, serialized the way a
/// transaction is on the wire. All entries have the same size.
pub fn make_entries(count: usize) -> Vec<TxRecord> {
    (0..count).map(|i| TxRecord::from_payload(serialize_tx(33_000 + i as u64))).collect()
}

fn serialize_tx(value: u64) -> Vec<u8> {
    let mut tx = Vec::with_capacity(64);
    tx.extend_from_slice(&1u32.to_le_bytes()); // version
    tx.push(1); // input count
    tx.extend_from_slice(&[0u8; 32]); // previous txid
    tx.extend_from_slice(&0xffff_ffffu32.to_le_bytes()); // previous index
    tx.push(1); // scriptSig length
    tx.push(OP_11);
    tx.extend_from_slice(&0xffff_ffffu32.to_le_bytes()); // sequence
    tx.push(1); // output count
    tx.extend_from_slice(&value.to_le_bytes());
    tx.push(2); // scriptPubKey length
    tx.push(OP_11);
    tx.push(OP_EQUAL);
    tx.extend_from_slice(&0u32.to_le_bytes()); // lock time
    tx
}

/// Sum of the sizes of `entries`.
pub fn total_size(entries: &[TxRecord]) -> u64 {
    entries.iter().map(TxRecord::size).sum()
}

/// A persisted callback that counts its invocations.
#[derive(Debug, Clone, Default)]
pub struct CallbackCounter {
    hits: Arc<AtomicUsize>,
}

impl CallbackCounter {
    /// Creates a counter at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a callback that increments this counter.
    pub fn callback(&self) -> PersistedCallback {
        let hits = Arc::clone(&self.hits);
        Box::new(move |_: &TxId| {
            hits.fetch_add(1, Ordering::SeqCst);
        })
    }

    /// Returns a callback that asserts it is fired for `expected`.
    pub fn callback_for(&self, expected: TxId) -> PersistedCallback {
        let hits = Arc::clone(&self.hits);
        Box::new(move |txid: &TxId| {
            assert_eq!(*txid, expected);
            hits.fetch_add(1, Ordering::SeqCst);
        })
    }

    /// Number of invocations so far.
    pub fn count(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

/// A test store with automatic cleanup.
pub struct TestStore {
    /// The store instance.
    pub db: MempoolTxDb,
    /// The temporary directory (kept alive to prevent cleanup).
    temp_dir: Option<TempDir>,
}

impl TestStore {
    /// Creates a new in-memory test store.
    pub fn memory() -> Self {
        Self {
            db: MempoolTxDb::open_in_memory().expect("Failed to open in-memory store"),
            temp_dir: None,
        }
    }

    /// Creates a new file-backed test store in a temporary directory.
    pub fn file() -> Self {
        Self::file_with_config(Config::default())
    }

    /// Creates a new file-backed test store with `config`.
    pub fn file_with_config(config: Config) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let db = MempoolTxDb::open(&store_path(temp_dir.path()), config).expect("Failed to open file store");
        Self {
            db,
            temp_dir: Some(temp_dir),
        }
    }

    /// Returns the store directory if file-backed.
    pub fn path(&self) -> Option<PathBuf> {
        self.temp_dir.as_ref().map(|d| store_path(d.path()))
    }

    /// Closes and reopens a file-backed store, replaying its log.
    ///
    /// # Panics
    ///
    /// Panics for in-memory stores.
    pub fn reopen(self) -> Self {
        self.reopen_with_config(Config::default())
    }

    /// Closes and reopens a file-backed store with `config`.
    ///
    /// # Panics
    ///
    /// Panics for in-memory stores.
    pub fn reopen_with_config(self, config: Config) -> Self {
        let path = self.path().expect("Only file stores can be reopened");
        let Self { db, temp_dir } = self;
        drop(db);
        let db = MempoolTxDb::open(&path, config).expect("Failed to reopen file store");
        Self { db, temp_dir }
    }

    /// Moves the store behind a background writer.
    pub fn into_async(self) -> (AsyncMempoolTxDb, Option<TempDir>) {
        let async_db = AsyncMempoolTxDb::new(self.db).expect("Failed to start writer");
        (async_db, self.temp_dir)
    }
}

fn store_path(root: &Path) -> PathBuf {
    root.join("txdb")
}

impl std::ops::Deref for TestStore {
    type Target = MempoolTxDb;

    fn deref(&self) -> &Self::Target {
        &self.db
    }
}

/// Runs a test with a temporary in-memory store.
pub fn with_temp_store<F, R>(f: F) -> R
where
    F: FnOnce(&MempoolTxDb) -> R,
{
    let store = TestStore::memory();
    f(&store.db)
}

/// Runs a test with a temporary file-backed store.
pub fn with_file_store<F, R>(f: F) -> R
where
    F: FnOnce(&MempoolTxDb, &Path) -> R,
{
    let store = TestStore::file();
    let path = store.path().expect("File store should have a path");
    f(&store.db, &path)
}
