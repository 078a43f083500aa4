//! Append-only transaction log.
//!
//! Every change to the store is one framed record at the end of the log.
//! The in-memory index is rebuilt by replaying the log on open, so the log
//! is the only persistent state.
//!
//! ## Record Format
//!
//! ```text
//! | magic "MTXL" (4) | version (2) | type (1) | length (4) | payload (N) | crc32 (4) |
//! ```
//!
//! The CRC covers the header and the payload.
//!
//! ## Recovery Policy
//!
//! ### Tolerated (clean end of log)
//!
//! - **Truncated header**: fewer than 11 bytes left at the end
//! - **Truncated payload**: the length runs past the end of the log
//!
//! Both are the remains of a write that never completed. The record was
//! never acknowledged, so it is discarded.
//!
//! ### Corruption
//!
//! - **CRC mismatch**: `Err(ChecksumMismatch)`
//! - **Invalid magic, unknown type or newer version**: `Err(LogCorruption)`
//!
//! The engine either cuts the log at the last good record or refuses to
//! open, depending on `Config::truncate_corrupt_tail`.
//!
//! ## Invariants
//!
//! - Records are never modified after they are written
//! - A record is durable before the commit that wrote it returns
//! - Replay is deterministic: the same log always yields the same state

mod iterator;
mod record;
mod writer;

pub use iterator::{LogEntry, LogRecordIterator};
pub use record::{encode_frame, LogRecord, LogRecordType, CRC_SIZE, HEADER_SIZE, LOG_MAGIC, LOG_VERSION};
pub use writer::LogWriter;
