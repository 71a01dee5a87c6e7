//! Map-per-field index representation.

use crate::error::CoreResult;
use crate::index::traits::{compare_keys, Entries, IndexDelta, IndexStore, OrderedLookup};
use crate::shelf;
use crate::types::RecordId;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Index stored as one shelf file holding `value -> ids`.
///
/// Every mutation is a read-modify-write of the whole map, which is why
/// writers hold the file's lock marker. In exchange the map can enumerate
/// values, so it supports ordering.
#[derive(Debug, Clone)]
pub struct HeavyIndex {
    field: String,
    path: PathBuf,
}

impl HeavyIndex {
    /// Creates a handle for `field` stored at `path`.
    pub fn new(field: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            field: field.into(),
            path: path.into(),
        }
    }

    fn load(&self) -> CoreResult<Entries> {
        shelf::load_or_default(&self.path)
    }
}

impl IndexStore for HeavyIndex {
    fn field(&self) -> &str {
        &self.field
    }

    fn resource(&self) -> &Path {
        &self.path
    }

    fn exists(&self) -> bool {
        shelf::exists(&self.path)
    }

    fn create(&self) -> CoreResult<()> {
        if !self.exists() {
            shelf::store(&self.path, &Entries::new())?;
        }
        Ok(())
    }

    fn clear(&self) -> CoreResult<()> {
        shelf::store(&self.path, &Entries::new())
    }

    fn apply(&self, delta: &IndexDelta) -> CoreResult<()> {
        if delta.is_empty() {
            return Ok(());
        }
        let mut entries = self.load()?;
        for (key, id) in delta.removals() {
            if let Some(ids) = entries.get_mut(key) {
                ids.remove(id);
                if ids.is_empty() {
                    entries.remove(key);
                }
            }
        }
        for (key, id) in delta.additions() {
            entries.entry(key.clone()).or_default().insert(*id);
        }
        shelf::store(&self.path, &entries)
    }

    fn lookup(&self, key: &str) -> CoreResult<BTreeSet<RecordId>> {
        Ok(self.load()?.remove(key).unwrap_or_default())
    }

    fn entries(&self) -> CoreResult<Entries> {
        self.load()
    }

    fn ordered(&self) -> Option<&dyn OrderedLookup> {
        Some(self)
    }
}

impl OrderedLookup for HeavyIndex {
    fn sort(&self, ids: &[RecordId], descending: bool) -> CoreResult<Vec<RecordId>> {
        let wanted: BTreeSet<RecordId> = ids.iter().copied().collect();
        let entries = self.load()?;

        let mut keys: Vec<&String> = entries.keys().collect();
        keys.sort_by(|a, b| compare_keys(a, b));
        if descending {
            keys.reverse();
        }

        let mut placed = BTreeSet::new();
        let mut sorted = Vec::with_capacity(ids.len());
        for key in keys {
            for id in &entries[key] {
                if wanted.contains(id) && placed.insert(*id) {
                    sorted.push(*id);
                }
            }
        }
        sorted.extend(wanted.into_iter().filter(|id| !placed.contains(id)));
        Ok(sorted)
    }
}
