//! Compact command implementation.

use std::path::Path;

use txdb_core::{Config, MempoolTxDb};

/// Runs the compact command.
pub fn run(path: &Path, dry_run: bool) -> Result<(), Box<dyn std::error::Error>> {
    if !path.is_dir() {
        return Err(format!("No store found at {}", path.display()).into());
    }

    let config = Config::new()
        .create_if_missing(false)
        .compact_min_bytes(u64::MAX);
    let db = MempoolTxDb::open(path, config)?;

    let before = db.log_size();
    let garbage = db.garbage_bytes();
    println!("Compacting log at {}", path.display());
    if dry_run {
        println!("(dry run - no changes will be made)");
    }
    println!();
    println!("  Transactions: {}", db.tx_count());
    println!("  Live bytes:   {}", db.disk_usage());
    println!("  Log size:     {before} bytes");
    println!("  Garbage:      {garbage} bytes");

    if dry_run {
        return Ok(());
    }

    db.compact()?;
    let after = db.log_size();
    println!();
    println!("✓ Compaction complete");
    println!(
        "  Space saved: {} bytes ({:.1}%)",
        before.saturating_sub(after),
        if before > 0 {
            before.saturating_sub(after) as f64 / before as f64 * 100.0
        } else {
            0.0
        }
    );
    Ok(())
}
