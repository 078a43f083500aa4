//! The transaction store.
//!
//! [`MempoolTxDb`] maps transaction identifiers to serialized transactions,
//! keeps a checkpoint reference beside them, and maintains the disk usage and
//! count of what it holds.
//!
//! # Batch Resolution
//!
//! A [`Batch`] may contain several operations for one identifier. On commit
//! the last one decides:
//!
//! - **Delete** removes the record if present. No callback fires.
//! - **Write** stores the payload only if the identifier was absent before
//!   the commit, then fires the callback of that last write. A write for an
//!   identifier that is already stored does nothing.
//!
//! The whole commit, including clearing the checkpoint, is one log record.
//!
//! # Example
//!
//! ```rust,ignore
//! use txdb_core::{Batch, MempoolTxDb, TxRecord};
//!
//! let db = MempoolTxDb::open_in_memory()?;
//! let tx = TxRecord::from_payload(raw_bytes);
//!
//! let mut batch = Batch::new();
//! batch.add_record(&tx);
//! db.commit(&mut batch)?;
//!
//! assert_eq!(db.get_transaction(&tx.txid), Some(tx.payload));
//! ```

use std::collections::HashSet;
use std::path::Path;

use bytes::Bytes;
use parking_lot::RwLock;
use txdb_storage::{FileBackend, InMemoryBackend, StorageBackend};

use crate::batch::{Batch, PersistedCallback, ResolvedKind};
use crate::config::Config;
use crate::dir::StoreDir;
use crate::engine::{RecoveryReport, TxLogEngine};
use crate::error::CoreResult;
use crate::stats::{StatsSnapshot, TxDbStats};
use crate::types::{TxData, TxId, TxRecord, XrefKey};

/// What a successful commit did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitSummary {
    /// Transactions newly stored.
    pub written: usize,
    /// Transactions removed.
    pub deleted: usize,
    /// Payload bytes newly stored.
    pub bytes_written: u64,
    /// Writes skipped because the identifier was already stored.
    pub already_present: usize,
    /// Persisted callbacks invoked.
    pub callbacks_fired: usize,
}

/// Persistent store of pending-transaction payloads.
///
/// Readers may call any method from any thread. Mutations serialize on an
/// internal lock; callers that need a single writer (see
/// [`crate::AsyncMempoolTxDb`]) enforce it themselves.
pub struct MempoolTxDb {
    config: Config,
    /// Holds the directory lock. `None` for in-memory stores.
    dir: Option<StoreDir>,
    engine: RwLock<TxLogEngine>,
    recovery: RecoveryReport,
    stats: TxDbStats,
}

impl MempoolTxDb {
    /// Opens a file-backed store in directory `path`.
    ///
    /// The log is replayed, a damaged tail dropped, and the log compacted if
    /// garbage outweighs live data.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Another process has the store open (`DatabaseLocked`)
    /// - The directory is missing and `create_if_missing` is false
    /// - The log is corrupt and `truncate_corrupt_tail` is false
    /// - I/O errors occur
    pub fn open(path: &Path, config: Config) -> CoreResult<Self> {
        let dir = StoreDir::open(path, config.create_if_missing)?;
        let backend = FileBackend::open(&dir.log_path())?;
        let db = Self::open_inner(Box::new(backend), Some(dir), config)?;

        if db.engine.read().needs_compaction(db.config.compact_min_bytes) {
            db.compact()?;
        }
        Ok(db)
    }

    /// Opens an empty in-memory store.
    ///
    /// # Errors
    ///
    /// Does not fail in practice; the signature matches the other constructors.
    pub fn open_in_memory() -> CoreResult<Self> {
        Self::open_with_backend(Box::new(InMemoryBackend::new()), Config::default())
    }

    /// Opens a store over an arbitrary backend holding a log.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be replayed.
    pub fn open_with_backend(backend: Box<dyn StorageBackend>, config: Config) -> CoreResult<Self> {
        Self::open_inner(backend, None, config)
    }

    fn open_inner(backend: Box<dyn StorageBackend>, dir: Option<StoreDir>, config: Config) -> CoreResult<Self> {
        let (engine, recovery) = TxLogEngine::open(backend, &config)?;

        tracing::info!(
            path = ?dir.as_ref().map(StoreDir::path),
            records = recovery.records,
            tx_count = engine.tx_count(),
            disk_usage = engine.disk_usage(),
            truncated_bytes = recovery.truncated_bytes,
            "opened transaction store"
        );

        Ok(Self {
            config,
            dir,
            engine: RwLock::new(engine),
            recovery,
            stats: TxDbStats::new(),
        })
    }

    /// Stores one transaction. Same as committing a one-write batch.
    ///
    /// # Errors
    ///
    /// Returns an error if the commit fails; nothing is changed.
    pub fn write(&self, txid: TxId, payload: impl Into<Bytes>) -> CoreResult<CommitSummary> {
        let mut batch = Batch::new();
        batch.add_write(txid, payload.into(), None);
        self.commit(&mut batch)
    }

    /// Removes one transaction. Same as committing a one-delete batch.
    ///
    /// # Errors
    ///
    /// Returns an error if the commit fails; nothing is changed.
    pub fn delete(&self, txid: TxId, size: u64) -> CoreResult<CommitSummary> {
        let mut batch = Batch::new();
        batch.remove(TxData::new(txid, size));
        self.commit(&mut batch)
    }

    /// Stores several transactions in one commit.
    ///
    /// # Errors
    ///
    /// Returns an error if the commit fails; nothing is changed.
    pub fn add_transactions(&self, records: &[TxRecord]) -> CoreResult<CommitSummary> {
        let mut batch = Batch::new();
        for record in records {
            batch.add_record(record);
        }
        self.commit(&mut batch)
    }

    /// Removes several transactions in one commit.
    ///
    /// # Errors
    ///
    /// Returns an error if the commit fails; nothing is changed.
    pub fn remove_transactions(&self, data: &[TxData]) -> CoreResult<CommitSummary> {
        let mut batch = Batch::new();
        for item in data {
            batch.remove(*item);
        }
        self.commit(&mut batch)
    }

    /// Commits `batch` atomically.
    ///
    /// On success the batch is emptied and persisted callbacks run on this
    /// thread after the store lock is released. On failure the store, its
    /// counters and the checkpoint are unchanged, no callback runs, and the
    /// batch is left intact for a retry.
    ///
    /// # Errors
    ///
    /// Returns an error if the log record cannot be written.
    pub fn commit(&self, batch: &mut Batch) -> CoreResult<CommitSummary> {
        if batch.is_empty() {
            return Ok(CommitSummary::default());
        }

        let resolved = batch.resolve();
        let mut summary = CommitSummary::default();
        let mut persisted: Vec<(TxId, usize)> = Vec::new();

        {
            let mut engine = self.engine.write();
            let mut writes = Vec::new();
            let mut deletes = Vec::new();

            for item in &resolved {
                let present = engine.contains(&item.txid);
                match item.kind {
                    ResolvedKind::Write if present => summary.already_present += 1,
                    ResolvedKind::Write => {
                        if let Some(payload) = batch.payload_at(item.op_index) {
                            summary.bytes_written += payload.len() as u64;
                            writes.push((item.txid, payload.clone()));
                            persisted.push((item.txid, item.op_index));
                        }
                    }
                    ResolvedKind::Delete if present => {
                        let stored = engine.size_of(&item.txid);
                        let claimed = batch.delete_size_at(item.op_index);
                        if stored != claimed {
                            tracing::debug!(txid = %item.txid, ?stored, ?claimed, "delete size differs from stored size");
                        }
                        deletes.push(item.txid);
                    }
                    ResolvedKind::Delete => {}
                }
            }

            summary.written = writes.len();
            summary.deleted = deletes.len();

            if writes.is_empty() && deletes.is_empty() && engine.xref().is_none() {
                batch.clear();
                return Ok(summary);
            }

            if let Err(e) = engine.apply(writes, deletes) {
                self.stats.record_failed_commit();
                return Err(e);
            }
        }

        self.stats
            .record_commit(summary.written as u64, summary.deleted as u64, summary.bytes_written);
        tracing::debug!(
            ops = batch.len(),
            written = summary.written,
            deleted = summary.deleted,
            already_present = summary.already_present,
            "committed batch"
        );

        let callbacks: Vec<(TxId, PersistedCallback)> = persisted
            .into_iter()
            .filter_map(|(txid, op_index)| batch.take_callback(op_index).map(|cb| (txid, cb)))
            .collect();
        batch.clear();

        summary.callbacks_fired = callbacks.len();
        self.stats.record_callbacks(callbacks.len() as u64);
        for (txid, callback) in callbacks {
            callback(&txid);
        }

        Ok(summary)
    }

    /// Returns a stored payload, or `None` if it is absent or unreadable.
    #[must_use]
    pub fn get_transaction(&self, txid: &TxId) -> Option<Bytes> {
        match self.engine.read().get(txid) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(%txid, error = %e, "failed to read stored transaction");
                None
            }
        }
    }

    /// Whether `txid` is stored.
    #[must_use]
    pub fn contains(&self, txid: &TxId) -> bool {
        self.engine.read().contains(txid)
    }

    /// Snapshot of the stored identifiers.
    #[must_use]
    pub fn keys(&self) -> HashSet<TxId> {
        self.engine.read().keys().copied().collect()
    }

    /// Sum of stored payload lengths.
    #[must_use]
    pub fn disk_usage(&self) -> u64 {
        self.engine.read().disk_usage()
    }

    /// Number of stored transactions.
    #[must_use]
    pub fn tx_count(&self) -> u64 {
        self.engine.read().tx_count()
    }

    /// Total log size in bytes.
    #[must_use]
    pub fn log_size(&self) -> u64 {
        self.engine.read().log_size()
    }

    /// Log bytes not holding a live payload.
    #[must_use]
    pub fn garbage_bytes(&self) -> u64 {
        self.engine.read().garbage_bytes()
    }

    /// Sets the checkpoint reference.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be written.
    pub fn set_xref_key(&self, key: XrefKey) -> CoreResult<()> {
        self.engine.write().set_xref(key)
    }

    /// Returns the checkpoint reference.
    #[must_use]
    pub fn get_xref_key(&self) -> Option<XrefKey> {
        self.engine.read().xref()
    }

    /// Clears the checkpoint reference.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be written.
    pub fn remove_xref_key(&self) -> CoreResult<()> {
        self.engine.write().clear_xref()
    }

    /// Removes every record, resets the counters and clears the checkpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be emptied; nothing is changed.
    pub fn clear(&self) -> CoreResult<()> {
        let mut engine = self.engine.write();
        let count = engine.tx_count();
        engine.clear()?;
        tracing::info!(removed = count, "cleared transaction store");
        Ok(())
    }

    /// Rewrites the log to hold only live records and the checkpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the compacted log cannot be written or swapped
    /// in. The store keeps using the old log in that case.
    pub fn compact(&self) -> CoreResult<()> {
        let mut engine = self.engine.write();
        let before = engine.log_size();

        match &self.dir {
            Some(dir) => {
                let compact_path = dir.compact_path();
                let mut target = FileBackend::open(&compact_path)?;
                target.truncate(0)?;
                let compacted = match engine.write_compacted(&mut target) {
                    Ok(compacted) => compacted,
                    Err(e) => {
                        drop(target);
                        if let Err(remove) = std::fs::remove_file(&compact_path) {
                            tracing::warn!(error = %remove, "failed to remove partial compaction output");
                        }
                        return Err(e);
                    }
                };
                drop(target);
                dir.install_compacted()?;
                let backend = FileBackend::open(&dir.log_path())?;
                engine.install_compacted(Box::new(backend), compacted)?;
            }
            None => {
                let mut fresh = InMemoryBackend::new();
                let compacted = engine.write_compacted(&mut fresh)?;
                engine.install_compacted(Box::new(fresh), compacted)?;
            }
        }

        self.stats.record_compaction();
        tracing::info!(before, after = engine.log_size(), "compacted transaction log");
        Ok(())
    }

    /// Diagnostic counters since open.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// What replay found on open.
    #[must_use]
    pub fn recovery(&self) -> &RecoveryReport {
        &self.recovery
    }

    /// The store directory, `None` for in-memory stores.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.dir.as_ref().map(StoreDir::path)
    }

    /// The configuration the store was opened with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }
}

impl std::fmt::Debug for MempoolTxDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MempoolTxDb")
            .field("path", &self.path())
            .field("tx_count", &self.tx_count())
            .field("disk_usage", &self.disk_usage())
            .finish()
    }
}
