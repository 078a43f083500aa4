//! Store directory management.
//!
//! A file-backed store is a directory:
//!
//! ```text
//! <store_path>/
//! ├─ LOCK              # Advisory lock for single-writer
//! ├─ txdb.log          # Transaction log
//! └─ txdb.log.compact  # Compaction output, present only mid-compaction
//! ```

use crate::error::{CoreError, CoreResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";
const LOG_FILE: &str = "txdb.log";
const COMPACT_FILE: &str = "txdb.log.compact";

/// Holds the store directory and its exclusive lock.
///
/// Only one `StoreDir` can exist per directory at a time, across processes.
/// The lock is released when the value is dropped.
#[derive(Debug)]
pub struct StoreDir {
    path: PathBuf,
    _lock_file: File,
}

impl StoreDir {
    /// Opens or creates a store directory and takes its lock.
    ///
    /// A leftover compaction file from an interrupted compaction is removed;
    /// the log it was built from is still complete.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory doesn't exist and `create_if_missing` is false
    /// - Another process holds the lock (`DatabaseLocked`)
    /// - I/O errors occur
    pub fn open(path: &Path, create_if_missing: bool) -> CoreResult<Self> {
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(CoreError::invalid_format(format!(
                    "store directory does not exist: {}",
                    path.display()
                )));
            }
        }

        if !path.is_dir() {
            return Err(CoreError::invalid_format(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(CoreError::DatabaseLocked);
        }

        let dir = Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        };

        let stale = dir.compact_path();
        if stale.exists() {
            tracing::warn!(path = %stale.display(), "removing interrupted compaction output");
            fs::remove_file(&stale)?;
        }

        Ok(dir)
    }

    /// Returns the store directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the path to the transaction log.
    #[must_use]
    pub fn log_path(&self) -> PathBuf {
        self.path.join(LOG_FILE)
    }

    /// Returns the path compaction writes to before it is swapped in.
    #[must_use]
    pub fn compact_path(&self) -> PathBuf {
        self.path.join(COMPACT_FILE)
    }

    /// Moves the compaction output over the log and makes the rename durable.
    ///
    /// # Errors
    ///
    /// Returns an error if the rename or directory sync fails.
    pub fn install_compacted(&self) -> CoreResult<()> {
        fs::rename(self.compact_path(), self.log_path())?;
        self.sync_directory()
    }

    #[cfg(unix)]
    fn sync_directory(&self) -> CoreResult<()> {
        File::open(&self.path)?.sync_all()?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_directory(&self) -> CoreResult<()> {
        Ok(())
    }
}
