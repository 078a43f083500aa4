//! Property-based test generators using proptest.
//!
//! Batch operations are generated over a small key space so that sequences
//! hit the same identifier repeatedly. [`StoreModel`] is the reference the
//! real store is checked against.

use std::collections::{BTreeMap, BTreeSet};

use bytes::Bytes;
use proptest::prelude::*;
use txdb_core::{Batch, TxData, TxId, TxRecord};

use crate::fixtures::CallbackCounter;

/// Strategy for arbitrary transaction identifiers.
pub fn txid_strategy() -> impl Strategy<Value = TxId> {
    prop::array::uniform32(any::<u8>()).prop_map(TxId::from_bytes)
}

/// Strategy for transaction payloads.
pub fn payload_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..512)
}

/// Strategy for transaction records keyed by their payload hash.
pub fn tx_record_strategy() -> impl Strategy<Value = TxRecord> {
    payload_strategy().prop_map(TxRecord::from_payload)
}

/// One operation on a small key space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelOp {
    /// Write the record for `key`.
    Write(u8),
    /// Delete the record for `key`.
    Delete(u8),
}

impl ModelOp {
    /// The key this operation targets.
    pub fn key(self) -> u8 {
        match self {
            Self::Write(k) | Self::Delete(k) => k,
        }
    }
}

/// Strategy for a single operation over `keys` distinct keys.
pub fn model_op_strategy(keys: u8) -> impl Strategy<Value = ModelOp> {
    prop_oneof![
        (0..keys).prop_map(ModelOp::Write),
        (0..keys).prop_map(ModelOp::Delete),
    ]
}

/// Strategy for one batch of up to `max_len` operations.
pub fn batch_ops_strategy(keys: u8, max_len: usize) -> impl Strategy<Value = Vec<ModelOp>> {
    prop::collection::vec(model_op_strategy(keys), 0..=max_len)
}

/// Strategy for a sequence of batches.
pub fn commit_sequence_strategy(
    keys: u8,
    max_len: usize,
    max_commits: usize,
) -> impl Strategy<Value = Vec<Vec<ModelOp>>> {
    prop::collection::vec(batch_ops_strategy(keys, max_len), 1..=max_commits)
}

/// The fixed record used for `key`. Sizes differ between keys so that
/// usage mistakes show up.
pub fn key_record(key: u8) -> TxRecord {
    let mut payload = vec![key; 16 + key as usize * 3];
    payload.push(0xA5);
    TxRecord::from_payload(Bytes::from(payload))
}

/// Builds a real batch from model operations. Every write carries a
/// callback counting into the counter for its key.
pub fn build_batch(ops: &[ModelOp]) -> (Batch, BTreeMap<u8, CallbackCounter>) {
    let mut batch = Batch::new();
    let mut counters: BTreeMap<u8, CallbackCounter> = BTreeMap::new();

    for op in ops {
        let record = key_record(op.key());
        match op {
            ModelOp::Write(key) => {
                let counter = counters.entry(*key).or_default();
                batch.add_write(record.txid, record.payload.clone(), Some(counter.callback()));
            }
            ModelOp::Delete(_) => batch.remove(TxData::new(record.txid, record.size())),
        }
    }

    (batch, counters)
}

/// Reference model of the store's keyspace and batch resolution.
#[derive(Debug, Clone, Default)]
pub struct StoreModel {
    present: BTreeSet<u8>,
}

impl StoreModel {
    /// Creates an empty model.
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one batch and returns the keys whose callback must fire.
    pub fn commit(&mut self, ops: &[ModelOp]) -> BTreeSet<u8> {
        let mut last: BTreeMap<u8, ModelOp> = BTreeMap::new();
        for op in ops {
            last.insert(op.key(), *op);
        }

        let mut fired = BTreeSet::new();
        for (key, op) in last {
            match op {
                ModelOp::Write(_) => {
                    if self.present.insert(key) {
                        fired.insert(key);
                    }
                }
                ModelOp::Delete(_) => {
                    self.present.remove(&key);
                }
            }
        }
        fired
    }

    /// Keys currently stored.
    pub fn keys(&self) -> impl Iterator<Item = u8> + '_ {
        self.present.iter().copied()
    }

    /// Expected stored identifiers.
    pub fn txids(&self) -> std::collections::HashSet<TxId> {
        self.keys().map(|k| key_record(k).txid).collect()
    }

    /// Expected entry count.
    pub fn tx_count(&self) -> u64 {
        self.present.len() as u64
    }

    /// Expected disk usage.
    pub fn disk_usage(&self) -> u64 {
        self.keys().map(|k| key_record(k).size()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_matches_resolution_table() {
        let mut model = StoreModel::new();
        assert_eq!(
            model.commit(&[ModelOp::Write(1), ModelOp::Write(1)]),
            BTreeSet::from([1])
        );
        assert_eq!(
            model.commit(&[ModelOp::Delete(1), ModelOp::Write(1)]),
            BTreeSet::new()
        );
        assert_eq!(
            model.commit(&[ModelOp::Write(2), ModelOp::Delete(2)]),
            BTreeSet::new()
        );
        assert_eq!(model.tx_count(), 1);
    }

    #[test]
    fn key_records_are_distinct() {
        let ids: BTreeSet<TxId> = (0..20).map(|k| key_record(k).txid).collect();
        assert_eq!(ids.len(), 20);
    }

    proptest! {
        #[test]
        fn build_batch_keeps_op_count(ops in batch_ops_strategy(6, 20)) {
            let (batch, counters) = build_batch(&ops);
            prop_assert_eq!(batch.len(), ops.len());
            let written: BTreeSet<u8> = ops
                .iter()
                .filter_map(|op| match op {
                    ModelOp::Write(k) => Some(*k),
                    ModelOp::Delete(_) => None,
                })
                .collect();
            prop_assert_eq!(counters.keys().copied().collect::<BTreeSet<u8>>(), written);
        }
    }
}
