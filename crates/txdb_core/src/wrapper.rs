//! Pool-side handle to one transaction.

use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::Mutex;

use crate::store::MempoolTxDb;
use crate::types::{TxData, TxId, TxRecord};

/// Shared handle to a [`TransactionWrapper`].
pub type TransactionWrapperRef = Arc<TransactionWrapper>;

/// A transaction that is either memory-resident (holds its payload) or
/// disk-resident (payload dropped, reloaded from the store on demand).
///
/// A wrapper becomes disk-resident when a commit that actually wrote its
/// payload fires the persisted callback.
#[derive(Debug)]
pub struct TransactionWrapper {
    txid: TxId,
    size: u64,
    payload: Mutex<Option<Bytes>>,
    store: Weak<MempoolTxDb>,
}

impl TransactionWrapper {
    /// Wraps a memory-resident transaction that can reload from `store`.
    pub fn new(record: TxRecord, store: &Arc<MempoolTxDb>) -> Self {
        Self::with_store(record, Arc::downgrade(store))
    }

    /// Wraps a transaction with no store to reload from.
    pub fn detached(record: TxRecord) -> Self {
        Self::with_store(record, Weak::new())
    }

    fn with_store(record: TxRecord, store: Weak<MempoolTxDb>) -> Self {
        Self {
            txid: record.txid,
            size: record.size(),
            payload: Mutex::new(Some(record.payload)),
            store,
        }
    }

    /// Transaction identifier.
    #[must_use]
    pub fn txid(&self) -> TxId {
        self.txid
    }

    /// Payload length in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// The (identifier, length) pair used to delete the disk copy.
    #[must_use]
    pub fn tx_data(&self) -> TxData {
        TxData::new(self.txid, self.size)
    }

    /// Whether the payload is held in memory.
    #[must_use]
    pub fn is_in_memory(&self) -> bool {
        self.payload.lock().is_some()
    }

    /// The payload to persist, or `None` if already disk-resident.
    #[must_use]
    pub fn payload_for_persistence(&self) -> Option<Bytes> {
        self.payload.lock().clone()
    }

    /// Drops the in-memory payload; the store now holds it.
    pub fn update_moved_to_disk(&self) {
        self.payload.lock().take();
    }

    /// Returns the payload from memory, or reloads it from the store.
    ///
    /// `None` if the payload is on disk and the store is gone or no longer
    /// has it.
    #[must_use]
    pub fn get_tx(&self) -> Option<Bytes> {
        if let Some(payload) = self.payload.lock().as_ref() {
            return Some(payload.clone());
        }
        self.store.upgrade()?.get_transaction(&self.txid)
    }
}

impl Clone for TransactionWrapper {
    fn clone(&self) -> Self {
        Self {
            txid: self.txid,
            size: self.size,
            payload: Mutex::new(self.payload.lock().clone()),
            store: Weak::clone(&self.store),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> TxRecord {
        TxRecord::from_payload(vec![7u8; 40])
    }

    #[test]
    fn starts_in_memory() {
        let wrapper = TransactionWrapper::detached(record());
        assert!(wrapper.is_in_memory());
        assert_eq!(wrapper.size(), 40);
        assert_eq!(wrapper.payload_for_persistence().map(|p| p.len()), Some(40));
    }

    #[test]
    fn moved_to_disk_reloads_from_store() {
        let store = Arc::new(MempoolTxDb::open_in_memory().unwrap());
        let rec = record();
        store.write(rec.txid, rec.payload.clone()).unwrap();

        let wrapper = TransactionWrapper::new(rec.clone(), &store);
        wrapper.update_moved_to_disk();

        assert!(!wrapper.is_in_memory());
        assert!(wrapper.payload_for_persistence().is_none());
        assert_eq!(wrapper.get_tx(), Some(rec.payload));
    }

    #[test]
    fn detached_wrapper_on_disk_has_no_payload() {
        let wrapper = TransactionWrapper::detached(record());
        wrapper.update_moved_to_disk();
        assert_eq!(wrapper.get_tx(), None);
    }

    #[test]
    fn clone_is_independent() {
        let wrapper = TransactionWrapper::detached(record());
        let copy = wrapper.clone();
        wrapper.update_moved_to_disk();

        assert!(!wrapper.is_in_memory());
        assert!(copy.is_in_memory());
        assert_eq!(copy.txid(), wrapper.txid());
    }
}
