//! Keys command implementation.

use std::path::Path;

use super::open_existing;

/// Runs the keys command, printing identifiers in sorted order.
pub fn run(path: &Path, limit: Option<usize>) -> Result<(), Box<dyn std::error::Error>> {
    let db = open_existing(path)?;
    let mut keys: Vec<_> = db.keys().into_iter().collect();
    keys.sort_unstable();

    let shown = limit.unwrap_or(keys.len()).min(keys.len());
    for txid in &keys[..shown] {
        println!("{txid}");
    }
    if shown < keys.len() {
        println!("... {} more", keys.len() - shown);
    }
    Ok(())
}
