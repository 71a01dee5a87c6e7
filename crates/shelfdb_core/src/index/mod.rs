//! Secondary indexes.
//!
//! Each indexed field has one index resource mapping a stringified field
//! value to the ids of the live records holding it. Indexes are:
//! - Declared per collection at creation
//! - Maintained by the write serializer, old entries removed before new ones
//!   are added
//! - Fully derivable from the shard files
//!
//! # Representations
//!
//! - [`HeavyIndex`]: one persistent map per field, supports ordering
//! - [`LightIndex`]: one directory tree per field, no ordering
//!
//! Unindexed fields cannot be queried.

mod heavy;
mod light;
mod traits;

pub use heavy::HeavyIndex;
pub use light::LightIndex;
pub use traits::{compare_keys, Entries, IndexDelta, IndexStore, OrderedLookup};

use crate::types::IndexKind;
use std::path::PathBuf;

/// Opens the index of `field` in the given representation.
pub fn open_index(kind: IndexKind, field: &str, path: PathBuf) -> Box<dyn IndexStore> {
    match kind {
        IndexKind::Heavy => Box::new(HeavyIndex::new(field, path)),
        IndexKind::Light => Box::new(LightIndex::new(field, path)),
    }
}
