//! Test fixtures and collection helpers.
//!
//! Provides convenience functions for setting up test collections
//! and common test scenarios.

use shelfdb_core::{Collection, CollectionConfig, Document, LockOwner, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

/// Configuration tuned for tests: few shards and fast lock polling.
pub fn test_config() -> CollectionConfig {
    CollectionConfig::new()
        .groups(3)
        .lock_poll_interval(Duration::from_millis(1))
}

/// A test collection with automatic cleanup.
pub struct TestCollection {
    /// The collection instance.
    pub collection: Collection,
    path: PathBuf,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: TempDir,
}

impl TestCollection {
    /// Creates a collection in a fresh temporary directory.
    pub fn new(config: CollectionConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("test");
        let collection = Collection::open(&path, config).expect("Failed to open collection");
        Self {
            collection,
            path,
            _temp_dir: temp_dir,
        }
    }

    /// Creates a collection indexing `fields`.
    pub fn with_fields(fields: &[&str]) -> Self {
        Self::new(test_config().index_fields(fields.iter().copied()))
    }

    /// Returns the collection directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Opens another instance on the same directory, with its own lock
    /// owner.
    pub fn instance(&self, config: CollectionConfig) -> Collection {
        Collection::open_with_owner(&self.path, config, LockOwner::new())
            .expect("Failed to open second instance")
    }
}

impl std::ops::Deref for TestCollection {
    type Target = Collection;

    fn deref(&self) -> &Self::Target {
        &self.collection
    }
}

/// Runs a test with a temporary collection indexing `fields`.
///
/// # Example
///
/// ```rust
/// use shelfdb_testkit::with_temp_collection;
/// use shelfdb_core::document;
///
/// with_temp_collection(&["a"], |collection| {
///     collection.new(document([("a", 1)])).unwrap();
///     assert_eq!(collection.len().unwrap(), 1);
/// });
/// ```
pub fn with_temp_collection<F, R>(fields: &[&str], f: F) -> R
where
    F: FnOnce(&Collection) -> R,
{
    let test = TestCollection::with_fields(fields);
    f(&test.collection)
}

/// Converts a JSON object into a document.
///
/// # Panics
///
/// Panics if `json` is not an object.
pub fn json_doc(json: serde_json::Value) -> Document {
    match Value::from(json) {
        Value::Map(doc) => doc,
        other => panic!("expected a JSON object, got {other}"),
    }
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;
    use shelfdb_core::document;

    /// Creates a collection indexing `a` and `b`, holding `count` records
    /// `{a: n % 5, b: n, c: "row n"}`.
    pub fn populated_collection(count: usize) -> TestCollection {
        let test = TestCollection::with_fields(&["a", "b"]);
        let docs: Vec<Document> = (0..count as i64).map(row).collect();
        if !docs.is_empty() {
            test.insert(docs).expect("Failed to insert rows");
        }
        test
    }

    /// The record `populated_collection` stores at id `n`.
    pub fn row(n: i64) -> Document {
        document([
            ("a", Value::from(n % 5)),
            ("b", Value::from(n)),
            ("c", Value::from(format!("row {n}"))),
        ])
    }
}
