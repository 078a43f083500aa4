//! Transaction log engine.
//!
//! Owns the log and the in-memory index rebuilt from it. The engine is not
//! synchronized; [`crate::MempoolTxDb`] guards it with a lock.

use std::collections::{HashMap, HashSet};

use bytes::Bytes;
use txdb_storage::StorageBackend;

use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::log::{encode_frame, LogRecord, LogWriter, HEADER_SIZE};
use crate::types::{TxId, XrefKey};

/// Size of the write chunks compaction emits, in payload bytes.
const COMPACT_CHUNK_BYTES: usize = 8 * 1024 * 1024; // 8 MB

/// Where a transaction's payload lives inside the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadLocation {
    /// Absolute offset of the first payload byte.
    pub offset: u64,
    /// Payload length.
    pub len: u32,
}

/// What replay found when the engine was opened.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Records replayed.
    pub records: u64,
    /// Bytes cut from the end of the log (torn or corrupt tail).
    pub truncated_bytes: u64,
    /// Description of the corruption that ended replay, if any.
    pub corruption: Option<String>,
}

/// The result of [`TxLogEngine::write_compacted`], ready to be installed.
#[derive(Debug)]
pub struct Compacted {
    index: HashMap<TxId, PayloadLocation>,
    log_size: u64,
}

impl Compacted {
    /// Size of the compacted log.
    #[must_use]
    pub fn log_size(&self) -> u64 {
        self.log_size
    }
}

/// In-memory view of the log plus the writer that extends it.
#[derive(Debug)]
pub struct TxLogEngine {
    log: LogWriter,
    index: HashMap<TxId, PayloadLocation>,
    disk_usage: u64,
    xref: Option<XrefKey>,
    log_size: u64,
}

impl TxLogEngine {
    /// Opens the engine over `backend`, replaying every record.
    ///
    /// A torn tail is always cut off. Corruption is cut off when
    /// `config.truncate_corrupt_tail` is set and returned otherwise.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure, or on corruption when truncation is
    /// disabled.
    pub fn open(backend: Box<dyn StorageBackend>, config: &Config) -> CoreResult<(Self, RecoveryReport)> {
        let mut engine = Self {
            log: LogWriter::new(backend, config.sync_on_commit),
            index: HashMap::new(),
            disk_usage: 0,
            xref: None,
            log_size: 0,
        };
        let report = engine.replay(config.truncate_corrupt_tail)?;
        Ok((engine, report))
    }

    fn replay(&mut self, truncate_corrupt_tail: bool) -> CoreResult<RecoveryReport> {
        let mut report = RecoveryReport::default();
        let mut index = HashMap::new();
        let mut xref = None;

        let (valid_end, total_size) = {
            let mut iter = self.log.iter()?;
            while let Some(result) = iter.next() {
                match result {
                    Ok(entry) => {
                        let payload_offset = entry.payload_offset();
                        apply_record(&mut index, &mut xref, &entry.record, payload_offset);
                        report.records += 1;
                    }
                    Err(e) if e.is_corruption() => {
                        if !truncate_corrupt_tail {
                            return Err(e);
                        }
                        tracing::warn!(error = %e, offset = iter.valid_end(), "corrupt log record, truncating tail");
                        report.corruption = Some(e.to_string());
                    }
                    Err(e) => return Err(e),
                }
            }
            (iter.valid_end(), iter.total_size())
        };

        if valid_end < total_size {
            report.truncated_bytes = total_size - valid_end;
            if report.corruption.is_none() {
                tracing::warn!(
                    offset = valid_end,
                    bytes = report.truncated_bytes,
                    "incomplete record at end of log, truncating"
                );
            }
            self.log.truncate(valid_end)?;
        }

        self.disk_usage = index.values().map(|loc: &PayloadLocation| u64::from(loc.len)).sum();
        self.index = index;
        self.xref = xref;
        self.log_size = valid_end;
        Ok(report)
    }

    /// Returns whether `txid` is stored.
    #[must_use]
    pub fn contains(&self, txid: &TxId) -> bool {
        self.index.contains_key(txid)
    }

    /// Reads a stored payload back from the log.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be read.
    pub fn get(&self, txid: &TxId) -> CoreResult<Option<Bytes>> {
        match self.index.get(txid) {
            Some(loc) => Ok(Some(Bytes::from(self.log.read_at(loc.offset, loc.len as usize)?))),
            None => Ok(None),
        }
    }

    /// Returns the stored size of `txid`.
    #[must_use]
    pub fn size_of(&self, txid: &TxId) -> Option<u64> {
        self.index.get(txid).map(|loc| u64::from(loc.len))
    }

    /// Iterates over stored identifiers.
    pub fn keys(&self) -> impl Iterator<Item = &TxId> {
        self.index.keys()
    }

    /// Number of stored transactions.
    #[must_use]
    pub fn tx_count(&self) -> u64 {
        self.index.len() as u64
    }

    /// Sum of stored payload lengths.
    #[must_use]
    pub fn disk_usage(&self) -> u64 {
        self.disk_usage
    }

    /// The checkpoint reference.
    #[must_use]
    pub fn xref(&self) -> Option<XrefKey> {
        self.xref
    }

    /// Total log size in bytes.
    #[must_use]
    pub fn log_size(&self) -> u64 {
        self.log_size
    }

    /// Log bytes not holding a live payload.
    #[must_use]
    pub fn garbage_bytes(&self) -> u64 {
        self.log_size.saturating_sub(self.disk_usage)
    }

    /// Whether garbage exceeds both `min_bytes` and the live bytes.
    #[must_use]
    pub fn needs_compaction(&self, min_bytes: u64) -> bool {
        let garbage = self.garbage_bytes();
        garbage > min_bytes && garbage > self.disk_usage
    }

    /// Appends one commit record and applies it: writes, then deletes, then
    /// the checkpoint is cleared.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be written; the engine is
    /// unchanged.
    pub fn apply(&mut self, writes: Vec<(TxId, Bytes)>, deletes: Vec<TxId>) -> CoreResult<()> {
        let record = LogRecord::Commit { writes, deletes };
        self.append(&record)
    }

    /// Sets the checkpoint reference.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be written.
    pub fn set_xref(&mut self, key: XrefKey) -> CoreResult<()> {
        self.append(&LogRecord::SetXref { key })
    }

    /// Clears the checkpoint reference. Writes nothing if none is set.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be written.
    pub fn clear_xref(&mut self) -> CoreResult<()> {
        if self.xref.is_none() {
            return Ok(());
        }
        self.append(&LogRecord::ClearXref)
    }

    fn append(&mut self, record: &LogRecord) -> CoreResult<()> {
        let offset = self.log.append(record)?;
        let payload_offset = offset + HEADER_SIZE as u64;
        let log_size = self.log.size()?;

        let touched: HashSet<TxId> = match record {
            LogRecord::Commit { writes, deletes } => writes
                .iter()
                .map(|(txid, _)| *txid)
                .chain(deletes.iter().copied())
                .collect(),
            _ => HashSet::new(),
        };
        let before: u64 = touched.iter().filter_map(|t| self.size_of(t)).sum();
        apply_record(&mut self.index, &mut self.xref, record, payload_offset);
        let after: u64 = touched.iter().filter_map(|t| self.size_of(t)).sum();

        self.disk_usage = self.disk_usage - before + after;
        self.log_size = log_size;
        Ok(())
    }

    /// Empties the log and resets all state.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be truncated; the engine is
    /// unchanged. If the truncation succeeds but cannot be synced, the
    /// engine is emptied to match the log and the sync error is returned.
    pub fn clear(&mut self) -> CoreResult<()> {
        self.log.clear()?;
        self.index.clear();
        self.disk_usage = 0;
        self.xref = None;
        self.log_size = 0;
        self.log.sync()
    }

    /// Writes the live transactions and the checkpoint into `target` as a
    /// fresh log, then syncs it. The engine itself is not modified.
    ///
    /// # Errors
    ///
    /// Returns an error if a payload cannot be read or `target` cannot be
    /// written.
    pub fn write_compacted(&self, target: &mut dyn StorageBackend) -> CoreResult<Compacted> {
        if target.size()? != 0 {
            return Err(CoreError::invalid_operation("compaction target is not empty"));
        }

        let mut live: Vec<(&TxId, &PayloadLocation)> = self.index.iter().collect();
        live.sort_by_key(|(_, loc)| loc.offset);

        let mut index = HashMap::with_capacity(live.len());
        let mut chunk: Vec<(TxId, Bytes)> = Vec::new();
        let mut chunk_bytes = 0usize;

        for (txid, loc) in live {
            let payload = Bytes::from(self.log.read_at(loc.offset, loc.len as usize)?);
            chunk_bytes += payload.len();
            chunk.push((*txid, payload));
            if chunk_bytes >= COMPACT_CHUNK_BYTES {
                flush_chunk(target, &mut index, std::mem::take(&mut chunk))?;
                chunk_bytes = 0;
            }
        }
        if !chunk.is_empty() {
            flush_chunk(target, &mut index, chunk)?;
        }

        if let Some(key) = self.xref {
            target.append(&encode_frame(&LogRecord::SetXref { key })?)?;
        }
        target.sync()?;

        Ok(Compacted {
            index,
            log_size: target.size()?,
        })
    }

    /// Switches the engine to a compacted log.
    ///
    /// `backend` must hold exactly the bytes [`Self::write_compacted`]
    /// produced. Returns the previous backend.
    ///
    /// # Errors
    ///
    /// Returns an error if `backend` does not have the compacted size.
    pub fn install_compacted(
        &mut self,
        backend: Box<dyn StorageBackend>,
        compacted: Compacted,
    ) -> CoreResult<Box<dyn StorageBackend>> {
        let size = backend.size()?;
        if size != compacted.log_size {
            return Err(CoreError::invalid_operation(format!(
                "compacted log is {size} bytes, expected {}",
                compacted.log_size
            )));
        }
        let old = self.log.replace_backend(backend);
        self.index = compacted.index;
        self.log_size = compacted.log_size;
        Ok(old)
    }

    /// Forces the log to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails.
    pub fn sync(&mut self) -> CoreResult<()> {
        self.log.sync()
    }
}

fn flush_chunk(
    target: &mut dyn StorageBackend,
    index: &mut HashMap<TxId, PayloadLocation>,
    writes: Vec<(TxId, Bytes)>,
) -> CoreResult<()> {
    let record = LogRecord::Commit {
        writes,
        deletes: Vec::new(),
    };
    let offset = target.append(&encode_frame(&record)?)?;
    apply_record(index, &mut None, &record, offset + HEADER_SIZE as u64);
    Ok(())
}

/// Applies a replayed or freshly appended record to the index.
fn apply_record(
    index: &mut HashMap<TxId, PayloadLocation>,
    xref: &mut Option<XrefKey>,
    record: &LogRecord,
    payload_offset: u64,
) {
    match record {
        LogRecord::Commit { writes, deletes } => {
            for ((txid, payload), position) in writes.iter().zip(record.write_positions()) {
                index.insert(
                    *txid,
                    PayloadLocation {
                        offset: payload_offset + position,
                        len: payload.len() as u32,
                    },
                );
            }
            for txid in deletes {
                index.remove(txid);
            }
            *xref = None;
        }
        LogRecord::SetXref { key } => *xref = Some(*key),
        LogRecord::ClearXref => *xref = None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use txdb_storage::{FaultInjector, FaultPoint, InMemoryBackend};
    use uuid::Uuid;

    fn txid(n: u8) -> TxId {
        TxId::from_bytes([n; 32])
    }

    fn payload(n: u8, len: usize) -> Bytes {
        Bytes::from(vec![n; len])
    }

    fn open(backend: InMemoryBackend) -> (TxLogEngine, RecoveryReport) {
        TxLogEngine::open(Box::new(backend), &Config::default()).unwrap()
    }

    fn reopen(engine: &TxLogEngine) -> TxLogEngine {
        let data = engine.log.read_at(0, engine.log_size() as usize).unwrap();
        open(InMemoryBackend::with_data(data)).0
    }

    #[test]
    fn apply_and_read_back() {
        let (mut engine, _) = open(InMemoryBackend::new());
        engine
            .apply(vec![(txid(1), payload(1, 10)), (txid(2), payload(2, 20))], vec![])
            .unwrap();

        assert_eq!(engine.tx_count(), 2);
        assert_eq!(engine.disk_usage(), 30);
        assert_eq!(engine.get(&txid(2)).unwrap(), Some(payload(2, 20)));
        assert_eq!(engine.get(&txid(3)).unwrap(), None);
        assert_eq!(engine.size_of(&txid(1)), Some(10));
    }

    #[test]
    fn deletes_reduce_usage() {
        let (mut engine, _) = open(InMemoryBackend::new());
        engine.apply(vec![(txid(1), payload(1, 10))], vec![]).unwrap();
        engine.apply(vec![], vec![txid(1), txid(9)]).unwrap();

        assert_eq!(engine.tx_count(), 0);
        assert_eq!(engine.disk_usage(), 0);
        assert!(!engine.contains(&txid(1)));
    }

    #[test]
    fn commit_clears_xref() {
        let (mut engine, _) = open(InMemoryBackend::new());
        let key = Uuid::new_v4();
        engine.set_xref(key).unwrap();
        assert_eq!(engine.xref(), Some(key));

        engine.apply(vec![], vec![]).unwrap();
        assert_eq!(engine.xref(), None);
    }

    #[test]
    fn clear_xref_without_key_writes_nothing() {
        let (mut engine, _) = open(InMemoryBackend::new());
        engine.clear_xref().unwrap();
        assert_eq!(engine.log_size(), 0);
    }

    #[test]
    fn replay_restores_state() {
        let (mut engine, _) = open(InMemoryBackend::new());
        engine
            .apply(vec![(txid(1), payload(1, 5)), (txid(2), payload(2, 7))], vec![])
            .unwrap();
        engine.apply(vec![(txid(3), payload(3, 9))], vec![txid(1)]).unwrap();
        let key = Uuid::new_v4();
        engine.set_xref(key).unwrap();

        let reopened = reopen(&engine);
        assert_eq!(reopened.tx_count(), 2);
        assert_eq!(reopened.disk_usage(), 16);
        assert_eq!(reopened.xref(), Some(key));
        assert_eq!(reopened.get(&txid(3)).unwrap(), Some(payload(3, 9)));
        assert!(!reopened.contains(&txid(1)));
    }

    #[test]
    fn torn_tail_is_truncated() {
        let (mut engine, _) = open(InMemoryBackend::new());
        engine.apply(vec![(txid(1), payload(1, 5))], vec![]).unwrap();
        let good = engine.log_size();

        let mut data = engine.log.read_at(0, good as usize).unwrap();
        let frame = encode_frame(&LogRecord::Commit {
            writes: vec![(txid(2), payload(2, 5))],
            deletes: vec![],
        })
        .unwrap();
        data.extend_from_slice(&frame[..frame.len() - 3]);

        let (engine, report) = open(InMemoryBackend::with_data(data));
        assert_eq!(report.records, 1);
        assert_eq!(report.truncated_bytes, frame.len() as u64 - 3);
        assert!(report.corruption.is_none());
        assert_eq!(engine.tx_count(), 1);
        assert_eq!(engine.log_size(), good);
    }

    #[test]
    fn corruption_fails_open_when_truncation_disabled() {
        let (mut engine, _) = open(InMemoryBackend::new());
        engine.apply(vec![(txid(1), payload(1, 5))], vec![]).unwrap();
        let mut data = engine.log.read_at(0, engine.log_size() as usize).unwrap();
        data[HEADER_SIZE + 2] ^= 0xFF;

        let config = Config::default().truncate_corrupt_tail(false);
        let result = TxLogEngine::open(Box::new(InMemoryBackend::with_data(data.clone())), &config);
        assert!(matches!(result, Err(CoreError::ChecksumMismatch { .. })));

        let (engine, report) = open(InMemoryBackend::with_data(data));
        assert!(report.corruption.is_some());
        assert_eq!(engine.tx_count(), 0);
        assert_eq!(engine.log_size(), 0);
    }

    #[test]
    fn failed_append_leaves_state_unchanged() {
        let faults = FaultInjector::new();
        let (mut engine, _) = open(InMemoryBackend::with_faults(faults.clone()));
        engine.apply(vec![(txid(1), payload(1, 5))], vec![]).unwrap();
        let key = Uuid::new_v4();
        engine.set_xref(key).unwrap();
        let size = engine.log_size();

        faults.fail_next(FaultPoint::Append, 1);
        assert!(engine.apply(vec![(txid(2), payload(2, 5))], vec![txid(1)]).is_err());

        assert_eq!(engine.tx_count(), 1);
        assert_eq!(engine.disk_usage(), 5);
        assert_eq!(engine.xref(), Some(key));
        assert_eq!(engine.log_size(), size);
        assert_eq!(reopen(&engine).tx_count(), 1);
    }

    #[test]
    fn clear_resets_everything() {
        let (mut engine, _) = open(InMemoryBackend::new());
        engine.apply(vec![(txid(1), payload(1, 5))], vec![]).unwrap();
        engine.set_xref(Uuid::new_v4()).unwrap();

        engine.clear().unwrap();
        assert_eq!(engine.tx_count(), 0);
        assert_eq!(engine.disk_usage(), 0);
        assert_eq!(engine.xref(), None);
        assert_eq!(engine.log_size(), 0);
        assert_eq!(engine.keys().count(), 0);
    }

    #[test]
    fn clear_syncs_the_truncated_log() {
        let faults = FaultInjector::new();
        let (mut engine, _) = open(InMemoryBackend::with_faults(faults.clone()));
        engine.apply(vec![(txid(1), payload(1, 5))], vec![]).unwrap();

        faults.fail_next(FaultPoint::Sync, 1);
        assert!(engine.clear().is_err());
        assert_eq!(engine.tx_count(), 0);
        assert_eq!(engine.disk_usage(), 0);
        assert_eq!(engine.log.size().unwrap(), 0);
        assert_eq!(engine.log_size(), 0);
    }

    #[test]
    fn failed_truncate_leaves_state_unchanged() {
        let faults = FaultInjector::new();
        let (mut engine, _) = open(InMemoryBackend::with_faults(faults.clone()));
        engine.apply(vec![(txid(1), payload(1, 5))], vec![]).unwrap();
        let key = Uuid::new_v4();
        engine.set_xref(key).unwrap();
        let size = engine.log_size();

        faults.fail_next(FaultPoint::Truncate, 1);
        assert!(engine.clear().is_err());
        assert_eq!(engine.tx_count(), 1);
        assert_eq!(engine.disk_usage(), 5);
        assert_eq!(engine.xref(), Some(key));
        assert_eq!(engine.log_size(), size);
        assert_eq!(engine.get(&txid(1)).unwrap(), Some(payload(1, 5)));
    }

    #[test]
    fn compaction_keeps_live_data_and_shrinks_log() {
        let (mut engine, _) = open(InMemoryBackend::new());
        for n in 0..20u8 {
            engine.apply(vec![(txid(n), payload(n, 100))], vec![]).unwrap();
        }
        engine.apply(vec![], (0..18u8).map(txid).collect()).unwrap();
        let key = Uuid::new_v4();
        engine.set_xref(key).unwrap();
        let before = engine.log_size();
        assert!(engine.needs_compaction(0));

        let mut fresh = InMemoryBackend::new();
        let compacted = engine.write_compacted(&mut fresh).unwrap();
        engine.install_compacted(Box::new(fresh), compacted).unwrap();

        assert!(engine.log_size() < before);
        assert_eq!(engine.tx_count(), 2);
        assert_eq!(engine.disk_usage(), 200);
        assert_eq!(engine.xref(), Some(key));
        assert_eq!(engine.get(&txid(19)).unwrap(), Some(payload(19, 100)));
        assert!(!engine.needs_compaction(0));

        let reopened = reopen(&engine);
        assert_eq!(reopened.tx_count(), 2);
        assert_eq!(reopened.xref(), Some(key));
    }

    #[test]
    fn install_rejects_wrong_size() {
        let (mut engine, _) = open(InMemoryBackend::new());
        engine.apply(vec![(txid(1), payload(1, 5))], vec![]).unwrap();
        let mut fresh = InMemoryBackend::new();
        let compacted = engine.write_compacted(&mut fresh).unwrap();

        let result = engine.install_compacted(Box::new(InMemoryBackend::new()), compacted);
        assert!(result.is_err());
        assert_eq!(engine.get(&txid(1)).unwrap(), Some(payload(1, 5)));
    }
}
