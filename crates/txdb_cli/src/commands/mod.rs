//! CLI command implementations.

pub mod clear;
pub mod compact;
pub mod inspect;
pub mod keys;
pub mod verify;

use std::path::Path;

use txdb_core::{Config, MempoolTxDb};

/// Configuration for commands that only read: never create the directory,
/// never cut a damaged tail, never compact on open.
pub fn read_only_config() -> Config {
    Config::new()
        .create_if_missing(false)
        .truncate_corrupt_tail(false)
        .compact_min_bytes(u64::MAX)
}

/// Opens an existing store for a read-only command.
pub fn open_existing(path: &Path) -> Result<MempoolTxDb, Box<dyn std::error::Error>> {
    if !path.is_dir() {
        return Err(format!("No store found at {}", path.display()).into());
    }
    Ok(MempoolTxDb::open(path, read_only_config())?)
}
