//! # txdb storage
//!
//! Byte storage backends underneath the mempool transaction log.
//!
//! A backend is an append-only byte store with random reads. It knows
//! nothing about transactions, batches or log framing; `txdb_core` owns
//! the record format and replays it on open.
//!
//! ## Available Backends
//!
//! - [`FileBackend`] - a single OS file, used for the on-disk store
//! - [`InMemoryBackend`] - a growable buffer, used for tests and ephemeral
//!   stores; pairs with a [`FaultInjector`] to simulate I/O failures
//!
//! ## Example
//!
//! ```rust
//! use txdb_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"raw tx bytes").unwrap();
//! assert_eq!(backend.read_at(offset, 3).unwrap(), b"raw");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod fault;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use fault::{FaultInjector, FaultPoint};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
