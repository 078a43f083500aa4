//! Background writer in front of the transaction store.
//!
//! [`AsyncMempoolTxDb`] owns a [`MempoolTxDb`] and a single worker thread.
//! Producers enqueue adds and removes without blocking; the worker folds
//! whatever is queued into one [`Batch`] and commits it, so the number of
//! physical commits grows slower than the number of requests.
//!
//! The channel is FIFO, so operations on one identifier reach the batch in
//! the order they were submitted.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::batch::Batch;
use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::store::MempoolTxDb;
use crate::types::{TxData, XrefKey};
use crate::wrapper::TransactionWrapperRef;

enum Request {
    Add(Vec<TransactionWrapperRef>),
    Remove(Vec<TxData>),
    Sync(SyncSender<()>),
    Clear(SyncSender<CoreResult<()>>),
    Shutdown,
}

/// Asynchronous, write-coalescing front end of a [`MempoolTxDb`].
///
/// The worker thread is the only thread that commits through this manager.
/// Counters read through it may lag the queue until [`Self::sync`] returns.
pub struct AsyncMempoolTxDb {
    db: Arc<MempoolTxDb>,
    sender: Sender<Request>,
    write_count: Arc<AtomicU64>,
    worker: Option<JoinHandle<()>>,
}

impl AsyncMempoolTxDb {
    /// Starts a worker for `db`, using the store's configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker thread cannot be spawned.
    pub fn new(db: MempoolTxDb) -> CoreResult<Self> {
        let db = Arc::new(db);
        let (sender, receiver) = mpsc::channel();
        let write_count = Arc::new(AtomicU64::new(0));

        let worker = Worker {
            db: Arc::clone(&db),
            receiver,
            write_count: Arc::clone(&write_count),
            max_coalesced: db.config().max_coalesced_requests.max(1),
            commit_retries: db.config().commit_retries,
        };
        let handle = thread::Builder::new()
            .name("txdb-writer".to_string())
            .spawn(move || worker.run())?;

        Ok(Self {
            db,
            sender,
            write_count,
            worker: Some(handle),
        })
    }

    /// Opens a file-backed store and starts its worker.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be opened or the worker started.
    pub fn open(path: &Path, config: Config) -> CoreResult<Self> {
        Self::new(MempoolTxDb::open(path, config)?)
    }

    /// Opens an in-memory store and starts its worker.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker cannot be started.
    pub fn open_in_memory() -> CoreResult<Self> {
        Self::new(MempoolTxDb::open_in_memory()?)
    }

    /// Queues wrappers for persistence. A wrapper already on disk is
    /// re-queued from its stored copy, which keeps it stored without a
    /// physical rewrite.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::WorkerStopped`] if the worker is gone.
    pub fn add(&self, wrappers: Vec<TransactionWrapperRef>) -> CoreResult<()> {
        self.invalidate_xref();
        self.send(Request::Add(wrappers))
    }

    /// Queues deletions.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::WorkerStopped`] if the worker is gone.
    pub fn remove(&self, data: Vec<TxData>) -> CoreResult<()> {
        self.invalidate_xref();
        self.send(Request::Remove(data))
    }

    /// Blocks until everything queued before this call is committed.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::WorkerStopped`] if the worker is gone.
    pub fn sync(&self) -> CoreResult<()> {
        let (ack, done) = mpsc::sync_channel(0);
        self.send(Request::Sync(ack))?;
        done.recv().map_err(|_| CoreError::WorkerStopped)
    }

    /// Drops queued, uncommitted work and empties the store.
    ///
    /// # Errors
    ///
    /// Returns the store's error if clearing fails, or
    /// [`CoreError::WorkerStopped`] if the worker is gone.
    pub fn clear(&self) -> CoreResult<()> {
        let (ack, done) = mpsc::sync_channel(0);
        self.send(Request::Clear(ack))?;
        done.recv().map_err(|_| CoreError::WorkerStopped)?
    }

    /// Sum of stored payload lengths.
    #[must_use]
    pub fn disk_usage(&self) -> u64 {
        self.db.disk_usage()
    }

    /// Number of stored transactions.
    #[must_use]
    pub fn tx_count(&self) -> u64 {
        self.db.tx_count()
    }

    /// Physical commit attempts made by the worker.
    #[must_use]
    pub fn write_count(&self) -> u64 {
        self.write_count.load(Ordering::Relaxed)
    }

    /// The underlying store, for reads. Do not write through it while the
    /// worker is running.
    #[must_use]
    pub fn database(&self) -> Arc<MempoolTxDb> {
        Arc::clone(&self.db)
    }

    /// Sets the checkpoint reference.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be written.
    pub fn set_xref_key(&self, key: XrefKey) -> CoreResult<()> {
        self.db.set_xref_key(key)
    }

    /// Returns the checkpoint reference.
    #[must_use]
    pub fn get_xref_key(&self) -> Option<XrefKey> {
        self.db.get_xref_key()
    }

    /// Clears the checkpoint reference.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be written.
    pub fn remove_xref_key(&self) -> CoreResult<()> {
        self.db.remove_xref_key()
    }

    fn invalidate_xref(&self) {
        if self.db.get_xref_key().is_some() {
            if let Err(e) = self.db.remove_xref_key() {
                tracing::warn!(error = %e, "failed to clear checkpoint reference");
            }
        }
    }

    fn send(&self, request: Request) -> CoreResult<()> {
        self.sender.send(request).map_err(|_| CoreError::WorkerStopped)
    }
}

impl Drop for AsyncMempoolTxDb {
    fn drop(&mut self) {
        let _ = self.sender.send(Request::Shutdown);
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                tracing::error!("transaction store writer panicked");
            }
        }
    }
}

impl std::fmt::Debug for AsyncMempoolTxDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncMempoolTxDb")
            .field("db", &self.db)
            .field("write_count", &self.write_count())
            .finish()
    }
}

struct Worker {
    db: Arc<MempoolTxDb>,
    receiver: Receiver<Request>,
    write_count: Arc<AtomicU64>,
    max_coalesced: usize,
    commit_retries: u32,
}

impl Worker {
    fn run(self) {
        // Ends on Shutdown or once every sender is gone.
        while let Ok(first) = self.receiver.recv() {
            let (mut batch, requests, control) = self.drain(first);
            tracing::debug!(requests, ops = batch.len(), "drained writer queue");

            match control {
                Some(Request::Clear(ack)) => {
                    if !batch.is_empty() {
                        tracing::debug!(ops = batch.len(), "dropping queued work before clear");
                    }
                    let _ = ack.send(self.db.clear());
                }
                Some(Request::Sync(ack)) => {
                    self.commit(&mut batch);
                    let _ = ack.send(());
                }
                Some(Request::Shutdown) => {
                    self.commit(&mut batch);
                    return;
                }
                _ => self.commit(&mut batch),
            }
        }
    }

    /// Folds `first` and whatever is already queued into one batch, stopping
    /// at the first control request.
    fn drain(&self, first: Request) -> (Batch, usize, Option<Request>) {
        let mut batch = Batch::new();
        let mut requests = 0;
        let mut next = Some(first);

        while let Some(request) = next.take() {
            requests += 1;
            match request {
                Request::Add(wrappers) => {
                    for wrapper in &wrappers {
                        if !batch.add(wrapper) {
                            tracing::warn!(txid = %wrapper.txid(), "wrapper payload is neither in memory nor stored");
                        }
                    }
                }
                Request::Remove(data) => {
                    for item in data {
                        batch.remove(item);
                    }
                }
                control => return (batch, requests, Some(control)),
            }
            if requests >= self.max_coalesced {
                break;
            }
            next = self.receiver.try_recv().ok();
        }

        (batch, requests, None)
    }

    fn commit(&self, batch: &mut Batch) {
        if batch.is_empty() {
            return;
        }

        for attempt in 0..=self.commit_retries {
            self.write_count.fetch_add(1, Ordering::Relaxed);
            match self.db.commit(batch) {
                Ok(summary) => {
                    tracing::debug!(
                        written = summary.written,
                        deleted = summary.deleted,
                        "writer committed batch"
                    );
                    return;
                }
                Err(e) => {
                    tracing::warn!(attempt, error = %e, ops = batch.len(), "writer commit failed");
                }
            }
        }

        tracing::error!(ops = batch.len(), "dropping batch after repeated commit failures");
        batch.clear();
    }
}
