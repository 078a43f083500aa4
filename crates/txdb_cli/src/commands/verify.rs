//! Verify command implementation.

use std::path::Path;

use txdb_core::log::{LogRecord, LogRecordIterator};
use txdb_core::StoreDir;
use txdb_storage::{FileBackend, StorageBackend};

/// Verification result.
#[derive(Debug, Default)]
pub struct VerifyResult {
    /// Valid records read.
    pub records: usize,
    /// Commit records.
    pub commits: usize,
    /// Checkpoint set and clear records.
    pub xref_records: usize,
    /// Writes across all commits.
    pub writes: usize,
    /// Deletes across all commits.
    pub deletes: usize,
    /// Bytes covered by valid records.
    pub valid_bytes: u64,
    /// Log size.
    pub total_bytes: u64,
    /// First corruption found.
    pub error: Option<String>,
}

impl VerifyResult {
    fn is_ok(&self) -> bool {
        self.error.is_none() && self.valid_bytes == self.total_bytes
    }
}

/// Runs the verify command.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    // Holding the lock keeps a running store from appending mid-walk.
    let dir = StoreDir::open(path, false)?;
    let log_path = dir.log_path();
    if !log_path.exists() {
        println!("Log file not found (this may be normal for a new store)");
        return Ok(());
    }

    println!("Verifying log at {}", log_path.display());
    let backend = FileBackend::open(&log_path)?;
    let result = verify_log(&backend)?;
    print_result(&result);

    println!();
    if result.is_ok() {
        println!("✓ Log verification passed");
        Ok(())
    } else {
        println!("✗ Log verification failed");
        Err("Verification failed".into())
    }
}

/// Walks every record of the log, stopping at the first bad one.
pub fn verify_log(backend: &dyn StorageBackend) -> Result<VerifyResult, Box<dyn std::error::Error>> {
    let mut result = VerifyResult::default();
    let mut iter = LogRecordIterator::new(backend, 0)?;

    while let Some(entry) = iter.next() {
        match entry {
            Ok(entry) => {
                result.records += 1;
                match entry.record {
                    LogRecord::Commit { writes, deletes } => {
                        result.commits += 1;
                        result.writes += writes.len();
                        result.deletes += deletes.len();
                    }
                    LogRecord::SetXref { .. } | LogRecord::ClearXref => result.xref_records += 1,
                }
            }
            Err(e) => {
                result.error = Some(format!("at offset {}: {e}", iter.valid_end()));
                break;
            }
        }
    }

    result.valid_bytes = iter.valid_end();
    result.total_bytes = iter.total_size();
    if result.error.is_none() && result.valid_bytes < result.total_bytes {
        result.error = Some(format!(
            "incomplete record at offset {} ({} trailing bytes)",
            result.valid_bytes,
            result.total_bytes - result.valid_bytes
        ));
    }
    Ok(result)
}

fn print_result(result: &VerifyResult) {
    println!("  Records:         {}", result.records);
    println!("    Commits:       {}", result.commits);
    println!("    Checkpoint:    {}", result.xref_records);
    println!("  Writes:          {}", result.writes);
    println!("  Deletes:         {}", result.deletes);
    println!("  Valid bytes:     {} of {}", result.valid_bytes, result.total_bytes);
    if let Some(error) = &result.error {
        println!("  First error:     {error}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use txdb_core::log::encode_frame;
    use txdb_core::TxId;
    use txdb_storage::InMemoryBackend;

    fn commit_frame(n: u8) -> Vec<u8> {
        encode_frame(&LogRecord::Commit {
            writes: vec![(TxId::from_bytes([n; 32]), Bytes::from(vec![n; 10]))],
            deletes: vec![TxId::from_bytes([n + 1; 32])],
        })
        .unwrap()
    }

    #[test]
    fn clean_log_passes() {
        let mut data = commit_frame(1);
        data.extend(commit_frame(2));
        data.extend(encode_frame(&LogRecord::ClearXref).unwrap());
        let backend = InMemoryBackend::with_data(data);

        let result = verify_log(&backend).unwrap();
        assert!(result.is_ok());
        assert_eq!(result.records, 3);
        assert_eq!(result.commits, 2);
        assert_eq!(result.writes, 2);
        assert_eq!(result.deletes, 2);
    }

    #[test]
    fn reports_first_corruption() {
        let mut data = commit_frame(1);
        let mut bad = commit_frame(2);
        let last = bad.len() - 1;
        bad[last] ^= 0xff;
        data.extend(bad);
        let backend = InMemoryBackend::with_data(data);

        let result = verify_log(&backend).unwrap();
        assert!(!result.is_ok());
        assert_eq!(result.records, 1);
        assert!(result.error.is_some());
    }

    #[test]
    fn reports_torn_tail() {
        let mut data = commit_frame(1);
        data.extend(&commit_frame(2)[..7]);
        let backend = InMemoryBackend::with_data(data);

        let result = verify_log(&backend).unwrap();
        assert!(!result.is_ok());
        assert!(result.error.unwrap().contains("incomplete"));
    }
}
