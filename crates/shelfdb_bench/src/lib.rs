//! Benchmark utilities.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use rand::Rng;
use shelfdb_core::{document, CollectionConfig, Document, Value};
use std::time::Duration;

/// Configuration used by every benchmark collection.
pub fn bench_config() -> CollectionConfig {
    CollectionConfig::new()
        .groups(10)
        .index_fields(["kind", "score"])
        .lock_poll_interval(Duration::from_millis(1))
}

/// Generate a record with a random score and `payload` bytes of text.
pub fn random_document(payload: usize) -> Document {
    let mut rng = rand::thread_rng();
    let text: String = (0..payload)
        .map(|_| char::from(rng.gen_range(b'a'..=b'z')))
        .collect();
    document([
        ("kind", Value::from(rng.gen_range(0..8i64))),
        ("score", Value::from(rng.gen_range(0..1_000i64))),
        ("body", Value::from(text)),
    ])
}

/// Generate a batch of records.
pub fn generate_documents(count: usize, payload: usize) -> Vec<Document> {
    (0..count).map(|_| random_document(payload)).collect()
}
