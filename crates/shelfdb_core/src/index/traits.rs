//! Index traits and change sets.

use crate::error::CoreResult;
use crate::types::RecordId;
use crate::value::Document;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;

/// Forward entries of one field, `stringified value -> ids`.
pub type Entries = BTreeMap<String, BTreeSet<RecordId>>;

/// Pending changes to one field's index.
///
/// Removals are applied before additions, so a record whose value did not
/// change ends up indexed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexDelta {
    removals: Vec<(String, RecordId)>,
    additions: Vec<(String, RecordId)>,
}

impl IndexDelta {
    /// Creates an empty delta.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules removal of `id` under `key`.
    pub fn remove(&mut self, key: impl Into<String>, id: RecordId) {
        self.removals.push((key.into(), id));
    }

    /// Schedules addition of `id` under `key`.
    pub fn add(&mut self, key: impl Into<String>, id: RecordId) {
        self.additions.push((key.into(), id));
    }

    /// Returns the scheduled removals.
    pub fn removals(&self) -> &[(String, RecordId)] {
        &self.removals
    }

    /// Returns the scheduled additions.
    pub fn additions(&self) -> &[(String, RecordId)] {
        &self.additions
    }

    /// Returns true if nothing is scheduled.
    pub fn is_empty(&self) -> bool {
        self.removals.is_empty() && self.additions.is_empty()
    }
}

/// One field's secondary index.
///
/// Every mutation must be idempotent: removing an absent entry and adding
/// a present one are no-ops, so a retried batch converges.
pub trait IndexStore: Send + Sync + fmt::Debug {
    /// Returns the indexed field.
    fn field(&self) -> &str;

    /// Returns the resource guarded by this index's lock marker.
    fn resource(&self) -> &Path;

    /// Returns true if the index storage has been created.
    fn exists(&self) -> bool;

    /// Creates empty storage if none exists.
    fn create(&self) -> CoreResult<()>;

    /// Drops every entry, leaving empty storage.
    fn clear(&self) -> CoreResult<()>;

    /// Applies a batch of removals followed by additions.
    fn apply(&self, delta: &IndexDelta) -> CoreResult<()>;

    /// Returns the ids indexed under `key`.
    fn lookup(&self, key: &str) -> CoreResult<BTreeSet<RecordId>>;

    /// Returns every forward entry.
    fn entries(&self) -> CoreResult<Entries>;

    /// Returns the ordering capability, if this representation has one.
    fn ordered(&self) -> Option<&dyn OrderedLookup> {
        None
    }

    /// Writes entries for `doc` under `id`.
    fn set_index(&self, doc: &Document, id: RecordId) -> CoreResult<()> {
        let mut delta = IndexDelta::new();
        if let Some(value) = doc.get(self.field()) {
            delta.add(value.index_key(), id);
        }
        self.apply(&delta)
    }

    /// Removes the entries `doc` contributed under `id`.
    fn del_index(&self, doc: &Document, id: RecordId) -> CoreResult<()> {
        let mut delta = IndexDelta::new();
        if let Some(value) = doc.get(self.field()) {
            delta.remove(value.index_key(), id);
        }
        self.apply(&delta)
    }
}

/// Ordering of ids by the indexed value.
pub trait OrderedLookup {
    /// Sorts `ids` by their value in this index.
    ///
    /// Ids without an entry follow all ids with one, in ascending id order.
    fn sort(&self, ids: &[RecordId], descending: bool) -> CoreResult<Vec<RecordId>>;
}

/// Compares index keys: numeric keys first, by value, then text keys.
pub fn compare_keys(a: &str, b: &str) -> Ordering {
    let number = |key: &str| key.parse::<f64>().ok().filter(|x| !x.is_nan());
    match (number(a), number(b)) {
        (Some(x), Some(y)) => x.total_cmp(&y).then_with(|| a.cmp(b)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.cmp(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_keys_compare_by_value() {
        assert_eq!(compare_keys("9", "10"), Ordering::Less);
        assert_eq!(compare_keys("-1", "0.5"), Ordering::Less);
        assert_eq!(compare_keys("abc", "abd"), Ordering::Less);
        assert_eq!(compare_keys("10", "abc"), Ordering::Less);
        assert_eq!(compare_keys("2x", "3"), Ordering::Greater);
    }

    #[test]
    fn delta_tracks_both_sides() {
        let mut delta = IndexDelta::new();
        assert!(delta.is_empty());
        delta.remove("1", RecordId::new(0));
        delta.add("4", RecordId::new(0));
        assert_eq!(delta.removals().len(), 1);
        assert_eq!(delta.additions()[0], ("4".to_string(), RecordId::new(0)));
    }
}
