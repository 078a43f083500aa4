//! Inspect command implementation.

use serde::Serialize;
use std::path::Path;

use super::open_existing;

/// Store inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Store path.
    pub path: String,
    /// Number of stored transactions.
    pub tx_count: u64,
    /// Sum of stored payload lengths.
    pub disk_usage: u64,
    /// Log file size in bytes.
    pub log_size: u64,
    /// Log bytes not holding a live payload.
    pub garbage_bytes: u64,
    /// Records replayed on open.
    pub log_records: u64,
    /// Checkpoint reference, if set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub xref: Option<String>,
}

/// Runs the inspect command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let db = open_existing(path)?;

    let result = InspectResult {
        path: path.display().to_string(),
        tx_count: db.tx_count(),
        disk_usage: db.disk_usage(),
        log_size: db.log_size(),
        garbage_bytes: db.garbage_bytes(),
        log_records: db.recovery().records,
        xref: db.get_xref_key().map(|k| k.to_string()),
    };

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

fn print_text_output(result: &InspectResult) {
    println!("Transaction store: {}", result.path);
    println!();
    println!("Contents:");
    println!("  Transactions: {}", result.tx_count);
    println!("  Disk usage:   {} bytes", result.disk_usage);
    println!(
        "  Checkpoint:   {}",
        result.xref.as_deref().unwrap_or("(none)")
    );
    println!();
    println!("Log:");
    println!("  Records: {}", result.log_records);
    println!("  Size:    {} bytes", result.log_size);
    println!(
        "  Garbage: {} bytes ({:.1}%)",
        result.garbage_bytes,
        if result.log_size > 0 {
            result.garbage_bytes as f64 / result.log_size as f64 * 100.0
        } else {
            0.0
        }
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_skips_missing_xref() {
        let result = InspectResult {
            path: "/tmp/txdb".to_string(),
            tx_count: 2,
            disk_usage: 100,
            log_size: 140,
            garbage_bytes: 40,
            log_records: 1,
            xref: None,
        };
        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains("\"tx_count\":2"));
        assert!(!json.contains("xref"));
    }
}
