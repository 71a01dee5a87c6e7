//! Core type definitions for ShelfDB.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a record within a collection.
///
/// Record IDs are assigned from the collection's `next` counter, are
/// monotonically increasing and are never reused, even after a drop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub u64);

impl RecordId {
    /// Creates a new record ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the shard holding this record for a collection split in `groups`.
    #[must_use]
    pub const fn shard(self, groups: u32) -> ShardId {
        ShardId((self.0 % groups as u64) as u32)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rec:{}", self.0)
    }
}

impl From<u64> for RecordId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Index of one shard file of a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ShardId(pub u32);

impl ShardId {
    /// Returns the raw shard number.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "data_{}", self.0)
    }
}

/// Representation used for a collection's secondary indexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum IndexKind {
    /// One persistent `value -> ids` map per field. Supports ordering.
    #[default]
    Heavy,
    /// One `field/value/id` directory tree per field. No ordering.
    Light,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_id_ordering() {
        assert!(RecordId::new(1) < RecordId::new(2));
    }

    #[test]
    fn record_id_shard() {
        assert_eq!(RecordId::new(7).shard(2), ShardId(1));
        assert_eq!(RecordId::new(10).shard(10), ShardId(0));
    }

    #[test]
    fn display() {
        assert_eq!(format!("{}", RecordId::new(42)), "rec:42");
        assert_eq!(format!("{}", ShardId(3)), "data_3");
    }
}
