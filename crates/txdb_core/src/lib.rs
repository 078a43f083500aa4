//! # txdb Core
//!
//! Disk offload for mempool transactions.
//!
//! This crate provides:
//! - An append-only, checksummed transaction log with crash recovery
//! - [`MempoolTxDb`], the store with atomic batch commits and per-key
//!   net-effect resolution
//! - [`AsyncMempoolTxDb`], a single background writer that coalesces queued
//!   adds and removes into few commits
//! - [`TransactionWrapper`] and [`TxPool`], the pool-side hooks that spill
//!   payloads to disk and evict them again

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod async_db;
mod batch;
mod config;
mod dir;
mod engine;
mod error;
pub mod log;
mod pool;
mod stats;
mod store;
mod types;
mod wrapper;

pub use async_db::AsyncMempoolTxDb;
pub use batch::{Batch, BatchOp, PersistedCallback, Resolved, ResolvedKind};
pub use config::Config;
pub use dir::StoreDir;
pub use engine::{Compacted, PayloadLocation, RecoveryReport, TxLogEngine};
pub use error::{CoreError, CoreResult};
pub use pool::TxPool;
pub use stats::{StatsSnapshot, TxDbStats};
pub use store::{CommitSummary, MempoolTxDb};
pub use types::{TxData, TxId, TxRecord, XrefKey, TXID_LEN};
pub use wrapper::{TransactionWrapper, TransactionWrapperRef};

/// Crate version, as recorded in `Cargo.toml`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
