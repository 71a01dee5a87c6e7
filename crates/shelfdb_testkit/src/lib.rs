//! # ShelfDB Testkit
//!
//! Test utilities for ShelfDB.
//!
//! This crate provides:
//! - Test fixtures and collection helpers
//! - Property-based test generators using proptest
//! - Multi-instance stress helpers
//!
//! The integration suite lives in this crate's `tests/` directory.
//!
//! ## Usage
//!
//! ```rust
//! use shelfdb_testkit::prelude::*;
//! use shelfdb_core::document;
//!
//! let test = TestCollection::with_fields(&["a"]);
//! test.new(document([("a", 1)])).unwrap();
//! assert_eq!(test.count(&document([("a", 1)])).unwrap(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::stress::*;
}

pub use fixtures::*;
pub use generators::*;
pub use stress::*;
