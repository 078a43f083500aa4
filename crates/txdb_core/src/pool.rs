//! Minimal transaction pool driving the disk store.
//!
//! `TxPool` holds wrappers in arrival order and uses the two hooks a real
//! pool needs: spill payloads to disk when memory is tight, and delete the
//! disk copy when an entry leaves the pool. Selection is oldest first.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use bytes::Bytes;

use crate::async_db::AsyncMempoolTxDb;
use crate::error::CoreResult;
use crate::types::{TxData, TxId, TxRecord};
use crate::wrapper::{TransactionWrapper, TransactionWrapperRef};

#[derive(Debug)]
struct PoolEntry {
    wrapper: TransactionWrapperRef,
    seq: u64,
}

/// An owning pool of transaction wrappers backed by an [`AsyncMempoolTxDb`].
#[derive(Debug)]
pub struct TxPool {
    txdb: AsyncMempoolTxDb,
    entries: HashMap<TxId, PoolEntry>,
    /// Arrival order: sequence number to identifier.
    order: BTreeMap<u64, TxId>,
    next_seq: u64,
}

impl TxPool {
    /// Creates an empty pool over `txdb`.
    pub fn new(txdb: AsyncMempoolTxDb) -> Self {
        Self {
            txdb,
            entries: HashMap::new(),
            order: BTreeMap::new(),
            next_seq: 0,
        }
    }

    /// Creates an empty pool over a fresh in-memory store.
    ///
    /// # Errors
    ///
    /// Returns an error if the store's worker cannot be started.
    pub fn open_in_memory() -> CoreResult<Self> {
        Ok(Self::new(AsyncMempoolTxDb::open_in_memory()?))
    }

    /// Adds a memory-resident entry, or returns the existing one.
    pub fn add_unchecked(&mut self, record: TxRecord) -> TransactionWrapperRef {
        if let Some(entry) = self.entries.get(&record.txid) {
            return Arc::clone(&entry.wrapper);
        }

        let txid = record.txid;
        let wrapper = Arc::new(TransactionWrapper::new(record, &self.txdb.database()));
        let seq = self.next_seq;
        self.next_seq += 1;
        self.order.insert(seq, txid);
        self.entries.insert(
            txid,
            PoolEntry {
                wrapper: Arc::clone(&wrapper),
                seq,
            },
        );
        wrapper
    }

    /// Whether `txid` is in the pool.
    #[must_use]
    pub fn contains(&self, txid: &TxId) -> bool {
        self.entries.contains_key(txid)
    }

    /// Number of entries.
    #[must_use]
    pub fn size(&self) -> usize {
        self.entries.len()
    }

    /// Sum of payload sizes of every entry, wherever it resides.
    #[must_use]
    pub fn total_tx_size(&self) -> u64 {
        self.entries.values().map(|e| e.wrapper.size()).sum()
    }

    /// Sum of payload sizes still held in memory.
    #[must_use]
    pub fn memory_usage(&self) -> u64 {
        self.entries
            .values()
            .filter(|e| e.wrapper.is_in_memory())
            .map(|e| e.wrapper.size())
            .sum()
    }

    /// The payload of `txid`, from memory or disk.
    #[must_use]
    pub fn get_transaction(&self, txid: &TxId) -> Option<Bytes> {
        self.entries.get(txid)?.wrapper.get_tx()
    }

    /// The wrapper of `txid`.
    #[must_use]
    pub fn wrapper(&self, txid: &TxId) -> Option<TransactionWrapperRef> {
        self.entries.get(txid).map(|e| Arc::clone(&e.wrapper))
    }

    /// Queues the oldest memory-resident entries for disk until at least
    /// `required_bytes` are selected or none are left. Returns the bytes
    /// selected.
    ///
    /// Entries stay in the pool; each becomes disk-resident once the worker
    /// commits it.
    ///
    /// # Errors
    ///
    /// Returns an error if the store's worker is gone.
    pub fn save_txs_to_disk(&mut self, required_bytes: u64) -> CoreResult<u64> {
        let mut selected = Vec::new();
        let mut bytes = 0u64;

        for txid in self.order.values() {
            if bytes >= required_bytes {
                break;
            }
            let Some(entry) = self.entries.get(txid) else {
                continue;
            };
            if entry.wrapper.is_in_memory() {
                bytes += entry.wrapper.size();
                selected.push(Arc::clone(&entry.wrapper));
            }
        }

        if !selected.is_empty() {
            tracing::debug!(count = selected.len(), bytes, "spilling transactions to disk");
            self.txdb.add(selected)?;
        }
        Ok(bytes)
    }

    /// Evicts `txid` and deletes its disk copy. Returns whether it was in
    /// the pool.
    ///
    /// # Errors
    ///
    /// Returns an error if the store's worker is gone.
    pub fn remove(&mut self, txid: &TxId) -> CoreResult<bool> {
        Ok(self.remove_many(std::slice::from_ref(txid))? == 1)
    }

    /// Evicts several entries. Returns how many were in the pool.
    ///
    /// # Errors
    ///
    /// Returns an error if the store's worker is gone.
    pub fn remove_many(&mut self, txids: &[TxId]) -> CoreResult<usize> {
        let removed: Vec<TxData> = txids
            .iter()
            .filter_map(|txid| self.detach(txid))
            .map(|wrapper| wrapper.tx_data())
            .collect();

        let count = removed.len();
        if count > 0 {
            self.txdb.remove(removed)?;
        }
        Ok(count)
    }

    /// Evicts the oldest entries until the total payload size is at most
    /// `max_bytes`. Returns how many were evicted.
    ///
    /// # Errors
    ///
    /// Returns an error if the store's worker is gone.
    pub fn trim_to_size(&mut self, max_bytes: u64) -> CoreResult<usize> {
        let mut total = self.total_tx_size();
        let mut victims = Vec::new();

        for txid in self.order.values() {
            if total <= max_bytes {
                break;
            }
            if let Some(entry) = self.entries.get(txid) {
                total -= entry.wrapper.size();
                victims.push(*txid);
            }
        }

        self.remove_many(&victims)
    }

    /// Evicts everything and empties the disk store.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be cleared.
    pub fn clear(&mut self) -> CoreResult<()> {
        self.entries.clear();
        self.order.clear();
        self.txdb.clear()
    }

    /// Sum of payload lengths on disk.
    #[must_use]
    pub fn disk_usage(&self) -> u64 {
        self.txdb.disk_usage()
    }

    /// Number of transactions on disk.
    #[must_use]
    pub fn disk_tx_count(&self) -> u64 {
        self.txdb.tx_count()
    }

    /// Waits for the store's worker to commit everything queued so far.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker is gone.
    pub fn sync_with_txdb(&self) -> CoreResult<()> {
        self.txdb.sync()
    }

    /// Checks that the disk store holds exactly the disk-resident entries:
    /// same identifiers, same count, same summed size.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker is gone.
    pub fn check_txdb(&self) -> CoreResult<bool> {
        self.txdb.sync()?;
        let db = self.txdb.database();

        let on_disk: Vec<&TransactionWrapperRef> = self
            .entries
            .values()
            .map(|e| &e.wrapper)
            .filter(|w| !w.is_in_memory())
            .collect();
        let expected_keys: HashSet<TxId> = on_disk.iter().map(|w| w.txid()).collect();
        let expected_usage: u64 = on_disk.iter().map(|w| w.size()).sum();

        let consistent = db.keys() == expected_keys
            && db.tx_count() == on_disk.len() as u64
            && db.disk_usage() == expected_usage;
        if !consistent {
            tracing::warn!(
                expected_count = on_disk.len(),
                stored_count = db.tx_count(),
                expected_usage,
                stored_usage = db.disk_usage(),
                "pool and disk store disagree"
            );
        }
        Ok(consistent)
    }

    /// The disk store.
    #[must_use]
    pub fn txdb(&self) -> &AsyncMempoolTxDb {
        &self.txdb
    }

    fn detach(&mut self, txid: &TxId) -> Option<TransactionWrapperRef> {
        let entry = self.entries.remove(txid)?;
        self.order.remove(&entry.seq);
        Some(entry.wrapper)
    }
}
