//! Clear command implementation.

use std::path::Path;

use txdb_core::{Config, MempoolTxDb};

/// Runs the clear command.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    if !path.is_dir() {
        return Err(format!("No store found at {}", path.display()).into());
    }

    let db = MempoolTxDb::open(path, Config::new().create_if_missing(false))?;
    let count = db.tx_count();
    db.clear()?;
    println!("✓ Removed {count} transactions");
    Ok(())
}
