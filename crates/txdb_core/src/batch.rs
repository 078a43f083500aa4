//! Pending mutations committed as one unit.

use std::collections::HashMap;
use std::fmt;

use bytes::Bytes;

use crate::types::{TxData, TxId, TxRecord};
use crate::wrapper::TransactionWrapperRef;

/// Invoked once when a write first makes a transaction durable.
pub type PersistedCallback = Box<dyn FnOnce(&TxId) + Send>;

/// One queued mutation.
pub enum BatchOp {
    /// Store a transaction.
    Write {
        /// Transaction identifier.
        txid: TxId,
        /// Serialized transaction.
        payload: Bytes,
        /// Fired if this write is the one that makes the transaction durable.
        on_persisted: Option<PersistedCallback>,
    },
    /// Remove a transaction.
    Delete {
        /// Transaction identifier.
        txid: TxId,
        /// Length the caller believes is stored.
        size: u64,
    },
}

impl BatchOp {
    /// Returns the identifier this operation targets.
    #[must_use]
    pub fn txid(&self) -> TxId {
        match self {
            Self::Write { txid, .. } | Self::Delete { txid, .. } => *txid,
        }
    }
}

impl fmt::Debug for BatchOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Write {
                txid,
                payload,
                on_persisted,
            } => f
                .debug_struct("Write")
                .field("txid", txid)
                .field("len", &payload.len())
                .field("has_callback", &on_persisted.is_some())
                .finish(),
            Self::Delete { txid, size } => f
                .debug_struct("Delete")
                .field("txid", txid)
                .field("size", size)
                .finish(),
        }
    }
}

/// Final intended state of one identifier in a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedKind {
    /// The last operation was a write.
    Write,
    /// The last operation was a delete.
    Delete,
}

/// The winning operation for one identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolved {
    /// Identifier.
    pub txid: TxId,
    /// Index of the last operation for `txid` in [`Batch::ops`].
    pub op_index: usize,
    /// Whether that operation writes or deletes.
    pub kind: ResolvedKind,
}

/// An ordered list of pending writes and deletes.
///
/// Several operations may target the same identifier; the last one decides.
/// A batch is owned by one caller until it is passed to
/// [`crate::MempoolTxDb::commit`].
#[derive(Debug, Default)]
pub struct Batch {
    ops: Vec<BatchOp>,
}

impl Batch {
    /// Creates an empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a write for a wrapper.
    ///
    /// A memory-resident wrapper gets a persisted callback that moves it to
    /// disk. A disk-resident wrapper is queued with its payload reloaded from
    /// the store and no callback, so it still overrides an earlier delete of
    /// the same identifier.
    ///
    /// Returns `false`, queuing nothing, if the payload is neither in memory
    /// nor in the store.
    pub fn add(&mut self, wrapper: &TransactionWrapperRef) -> bool {
        if let Some(payload) = wrapper.payload_for_persistence() {
            let target = TransactionWrapperRef::clone(wrapper);
            self.add_write(
                wrapper.txid(),
                payload,
                Some(Box::new(move |_: &TxId| target.update_moved_to_disk())),
            );
            return true;
        }
        match wrapper.get_tx() {
            Some(payload) => {
                self.add_write(wrapper.txid(), payload, None);
                true
            }
            None => false,
        }
    }

    /// Queues a write with no callback.
    pub fn add_record(&mut self, record: &TxRecord) {
        self.add_write(record.txid, record.payload.clone(), None);
    }

    /// Queues a write.
    pub fn add_write(&mut self, txid: TxId, payload: Bytes, on_persisted: Option<PersistedCallback>) {
        self.ops.push(BatchOp::Write {
            txid,
            payload,
            on_persisted,
        });
    }

    /// Queues a delete.
    pub fn remove(&mut self, data: TxData) {
        self.ops.push(BatchOp::Delete {
            txid: data.txid,
            size: data.size,
        });
    }

    /// Number of queued operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Whether nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// The queued operations in submission order.
    #[must_use]
    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    /// Drops every queued operation without firing callbacks.
    pub fn clear(&mut self) {
        self.ops.clear();
    }

    /// Appends all of `other`'s operations after this batch's.
    pub fn extend(&mut self, other: Batch) {
        self.ops.extend(other.ops);
    }

    /// Reduces the batch to one winning operation per identifier, listed in
    /// the order identifiers first appear.
    #[must_use]
    pub fn resolve(&self) -> Vec<Resolved> {
        let mut position: HashMap<TxId, usize> = HashMap::new();
        let mut resolved: Vec<Resolved> = Vec::new();

        for (op_index, op) in self.ops.iter().enumerate() {
            let kind = match op {
                BatchOp::Write { .. } => ResolvedKind::Write,
                BatchOp::Delete { .. } => ResolvedKind::Delete,
            };
            let txid = op.txid();
            match position.get(&txid) {
                Some(&slot) => {
                    resolved[slot].op_index = op_index;
                    resolved[slot].kind = kind;
                }
                None => {
                    position.insert(txid, resolved.len());
                    resolved.push(Resolved {
                        txid,
                        op_index,
                        kind,
                    });
                }
            }
        }

        resolved
    }

    /// Returns the payload of the write at `op_index`.
    pub(crate) fn payload_at(&self, op_index: usize) -> Option<&Bytes> {
        match self.ops.get(op_index) {
            Some(BatchOp::Write { payload, .. }) => Some(payload),
            _ => None,
        }
    }

    /// Returns the size a delete at `op_index` claims.
    pub(crate) fn delete_size_at(&self, op_index: usize) -> Option<u64> {
        match self.ops.get(op_index) {
            Some(BatchOp::Delete { size, .. }) => Some(*size),
            _ => None,
        }
    }

    /// Takes the callback of the write at `op_index`.
    pub(crate) fn take_callback(&mut self, op_index: usize) -> Option<PersistedCallback> {
        match self.ops.get_mut(op_index) {
            Some(BatchOp::Write { on_persisted, .. }) => on_persisted.take(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn txid(n: u8) -> TxId {
        TxId::from_bytes([n; 32])
    }

    fn write(batch: &mut Batch, n: u8) {
        batch.add_write(txid(n), Bytes::from(vec![n; 4]), None);
    }

    #[test]
    fn empty_batch() {
        let batch = Batch::new();
        assert!(batch.is_empty());
        assert!(batch.resolve().is_empty());
    }

    #[test]
    fn last_operation_wins() {
        let mut batch = Batch::new();
        write(&mut batch, 1);
        batch.remove(TxData::new(txid(1), 4));
        write(&mut batch, 2);
        write(&mut batch, 1);
        batch.remove(TxData::new(txid(2), 4));

        let resolved = batch.resolve();
        assert_eq!(
            resolved,
            vec![
                Resolved {
                    txid: txid(1),
                    op_index: 3,
                    kind: ResolvedKind::Write
                },
                Resolved {
                    txid: txid(2),
                    op_index: 4,
                    kind: ResolvedKind::Delete
                },
            ]
        );
    }

    #[test]
    fn callback_is_taken_once() {
        let mut batch = Batch::new();
        batch.add_write(txid(1), Bytes::from_static(b"x"), Some(Box::new(|_: &TxId| {})));
        assert!(batch.take_callback(0).is_some());
        assert!(batch.take_callback(0).is_none());
        assert!(batch.take_callback(5).is_none());
    }

    #[test]
    fn accessors_check_operation_kind() {
        let mut batch = Batch::new();
        write(&mut batch, 1);
        batch.remove(TxData::new(txid(2), 9));

        assert_eq!(batch.payload_at(0).map(Bytes::len), Some(4));
        assert!(batch.payload_at(1).is_none());
        assert_eq!(batch.delete_size_at(1), Some(9));
        assert_eq!(batch.delete_size_at(0), None);
    }

    #[test]
    fn extend_keeps_order() {
        let mut first = Batch::new();
        write(&mut first, 1);
        let mut second = Batch::new();
        second.remove(TxData::new(txid(1), 4));

        first.extend(second);
        assert_eq!(first.len(), 2);
        assert_eq!(first.resolve()[0].kind, ResolvedKind::Delete);
    }

    #[test]
    fn debug_hides_payload() {
        let mut batch = Batch::new();
        batch.add_write(txid(1), Bytes::from(vec![0xAB; 1000]), None);
        let text = format!("{:?}", batch.ops()[0]);
        assert!(text.contains("len: 1000"));
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn resolve_picks_last_op_per_txid(ops in prop::collection::vec((0u8..6, any::<bool>()), 0..40)) {
                let mut batch = Batch::new();
                for &(n, is_write) in &ops {
                    if is_write {
                        write(&mut batch, n);
                    } else {
                        batch.remove(TxData::new(txid(n), 4));
                    }
                }

                let resolved = batch.resolve();
                let mut first_seen: Vec<u8> = Vec::new();
                for &(n, _) in &ops {
                    if !first_seen.contains(&n) {
                        first_seen.push(n);
                    }
                }
                prop_assert_eq!(resolved.len(), first_seen.len());

                for (item, n) in resolved.iter().zip(&first_seen) {
                    let last = ops.iter().rposition(|&(m, _)| m == *n).unwrap();
                    prop_assert_eq!(item.txid, txid(*n));
                    prop_assert_eq!(item.op_index, last);
                    let kind = if ops[last].1 { ResolvedKind::Write } else { ResolvedKind::Delete };
                    prop_assert_eq!(item.kind, kind);
                }
            }
        }
    }
}
