//! Collection metadata record.

use crate::error::{CoreError, CoreResult};
use crate::shelf;
use crate::types::{IndexKind, RecordId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::ops::Range;
use std::path::Path;

/// Current metadata layout version.
pub const META_VERSION: u16 = 1;

/// The metadata record of a collection.
///
/// The metadata stores:
/// - Layout settings fixed at creation (groups, indexed fields, headers)
/// - The live id set, which is the universe of every filter
/// - `next`, the id the next created record receives
/// - `total`, kept equal to the size of the live set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meta {
    /// Layout version.
    pub version: u16,
    /// Collection name.
    pub name: String,
    /// Number of shard files.
    pub groups: u32,
    /// Indexed fields.
    pub index_fields: Vec<String>,
    /// Positional field order, if records are stored as tuples.
    pub headers: Option<Vec<String>>,
    /// Index representation.
    pub index_kind: IndexKind,
    /// Unique field.
    pub unique: Option<String>,
    /// Number of live records.
    pub total: u64,
    /// Next id to assign.
    pub next: u64,
    /// Ids of live records.
    pub live: BTreeSet<u64>,
}

impl Meta {
    /// Creates metadata for an empty collection.
    #[must_use]
    pub fn new(name: impl Into<String>, groups: u32) -> Self {
        Self {
            version: META_VERSION,
            name: name.into(),
            groups,
            index_fields: Vec::new(),
            headers: None,
            index_kind: IndexKind::Heavy,
            unique: None,
            total: 0,
            next: 0,
            live: BTreeSet::new(),
        }
    }

    /// Reads the metadata file, if the collection exists.
    pub fn load(path: &Path) -> CoreResult<Option<Self>> {
        let meta: Option<Self> = shelf::load(path)?;
        match meta {
            Some(meta) if meta.version > META_VERSION => Err(CoreError::invalid_format(format!(
                "metadata version {} is newer than supported {}",
                meta.version, META_VERSION
            ))),
            Some(meta) if meta.groups == 0 => {
                Err(CoreError::invalid_format("metadata declares zero groups"))
            }
            other => Ok(other),
        }
    }

    /// Writes the metadata file atomically.
    pub fn store(&self, path: &Path) -> CoreResult<()> {
        shelf::store(path, self)
    }

    /// Returns true if `id` names a live record.
    #[must_use]
    pub fn is_live(&self, id: RecordId) -> bool {
        self.live.contains(&id.as_u64())
    }

    /// Reserves `count` consecutive ids starting at `next`.
    ///
    /// Only the range is computed; `next` moves when records are marked
    /// created, so a failed write does not burn ids.
    #[must_use]
    pub fn reserve(&self, count: usize) -> Range<u64> {
        self.next..self.next + count as u64
    }

    /// Records that `id` now holds a live record.
    pub fn mark_created(&mut self, id: RecordId) {
        self.live.insert(id.as_u64());
        self.next = self.next.max(id.as_u64() + 1);
        self.total = self.live.len() as u64;
    }

    /// Records that `id` no longer holds a live record.
    pub fn mark_dropped(&mut self, id: RecordId) {
        self.live.remove(&id.as_u64());
        self.total = self.live.len() as u64;
    }

    /// Iterates the live ids in ascending order.
    pub fn live_ids(&self) -> impl Iterator<Item = RecordId> + '_ {
        self.live.iter().copied().map(RecordId::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn ids_are_never_reused() {
        let mut meta = Meta::new("users", 2);
        let range = meta.reserve(2);
        assert_eq!(range, 0..2);
        for id in range {
            meta.mark_created(RecordId::new(id));
        }
        meta.mark_dropped(RecordId::new(1));

        assert_eq!(meta.total, 1);
        assert_eq!(meta.next, 2);
        assert_eq!(meta.reserve(1), 2..3);
    }

    #[test]
    fn marking_is_idempotent() {
        let mut meta = Meta::new("users", 2);
        meta.mark_created(RecordId::new(0));
        meta.mark_created(RecordId::new(0));
        assert_eq!(meta.total, 1);

        meta.mark_dropped(RecordId::new(0));
        meta.mark_dropped(RecordId::new(0));
        assert_eq!(meta.total, 0);
        assert_eq!(meta.next, 1);
    }

    #[test]
    fn persist_and_reload() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("meta");
        assert!(Meta::load(&path).unwrap().is_none());

        let mut meta = Meta::new("users", 3);
        meta.index_fields = vec!["a".into()];
        meta.headers = Some(vec!["a".into(), "b".into()]);
        meta.mark_created(RecordId::new(0));
        meta.store(&path).unwrap();

        let loaded = Meta::load(&path).unwrap().unwrap();
        assert_eq!(loaded, meta);
        assert!(loaded.is_live(RecordId::new(0)));
    }

    #[test]
    fn rejects_newer_version() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("meta");
        let mut meta = Meta::new("users", 1);
        meta.version = META_VERSION + 1;
        meta.store(&path).unwrap();

        assert!(matches!(
            Meta::load(&path),
            Err(CoreError::InvalidFormat { .. })
        ));
    }
}
