//! # txdb Testkit
//!
//! Test utilities for txdb.
//!
//! This crate provides:
//! - Fixtures: deterministic transactions and temporary stores
//! - Property-based generators for batch operation sequences, with a
//!   reference model of batch resolution
//! - A crashable storage backend for recovery tests
//! - A backend that can hold the writer inside a commit
//! - Concurrent producer stress helpers
//!
//! ## Usage
//!
//! ```rust,ignore
//! use txdb_testkit::prelude::*;
//!
//! #[test]
//! fn adds_are_counted() {
//!     let store = TestStore::memory();
//!     store.add_transactions(&make_entries(3)).unwrap();
//!     assert_eq!(store.tx_count(), 3);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod gate;
pub mod generators;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::gate::*;
    pub use crate::generators::*;
    pub use crate::stress::*;
}

pub use crash::*;
pub use fixtures::*;
pub use gate::*;
pub use generators::*;
pub use stress::*;
