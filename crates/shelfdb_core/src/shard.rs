//! Shard files holding the records of a collection.

use crate::error::CoreResult;
use crate::shelf;
use crate::types::{RecordId, ShardId};
use crate::value::{Document, Value};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

/// Record as laid out inside a shard file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StoredRecord {
    /// Open field map.
    Map(Document),
    /// Values in header order.
    Tuple(Vec<Value>),
}

/// Content of one shard file.
pub type ShardContent = BTreeMap<RecordId, StoredRecord>;

/// Writes to one shard, applied in a single read-modify-write.
#[derive(Debug, Clone, Default)]
pub struct ShardBatch {
    /// Records to store, replacing any previous version.
    pub writes: Vec<(RecordId, Document)>,
    /// Records to delete.
    pub deletes: Vec<RecordId>,
}

impl ShardBatch {
    /// Returns true if the batch changes nothing.
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty() && self.deletes.is_empty()
    }
}

/// The record data of a collection, split across `groups` shard files by
/// `id mod groups`.
#[derive(Debug, Clone)]
pub struct ShardStore {
    dir: PathBuf,
    groups: u32,
    headers: Option<Vec<String>>,
}

impl ShardStore {
    /// Creates a store over `dir`.
    pub fn new(dir: impl Into<PathBuf>, groups: u32, headers: Option<Vec<String>>) -> Self {
        Self {
            dir: dir.into(),
            groups,
            headers,
        }
    }

    /// Returns the shard count.
    pub fn groups(&self) -> u32 {
        self.groups
    }

    /// Returns the field order for tuple storage.
    pub fn headers(&self) -> Option<&[String]> {
        self.headers.as_deref()
    }

    /// Returns the shard holding `id`.
    pub fn shard_for(&self, id: RecordId) -> ShardId {
        id.shard(self.groups)
    }

    /// Returns the file of `shard`.
    pub fn path(&self, shard: ShardId) -> PathBuf {
        self.dir.join(shard.to_string())
    }

    /// Returns every shard file, in shard order.
    pub fn paths(&self) -> Vec<PathBuf> {
        (0..self.groups).map(|n| self.path(ShardId(n))).collect()
    }

    /// Creates the shard files that do not exist yet.
    pub fn create_all(&self) -> CoreResult<()> {
        for path in self.paths() {
            if !shelf::exists(&path) {
                shelf::store(&path, &ShardContent::new())?;
            }
        }
        Ok(())
    }

    /// Groups ids by the shard holding them.
    pub fn group<I>(&self, ids: I) -> BTreeMap<ShardId, Vec<RecordId>>
    where
        I: IntoIterator<Item = RecordId>,
    {
        let mut grouped: BTreeMap<ShardId, Vec<RecordId>> = BTreeMap::new();
        for id in ids {
            grouped.entry(self.shard_for(id)).or_default().push(id);
        }
        grouped
    }

    fn load(&self, shard: ShardId) -> CoreResult<ShardContent> {
        shelf::load_or_default(&self.path(shard))
    }

    /// Reads one record.
    ///
    /// Returns `None` if the id is absent, or if the stored tuple does not
    /// match the current header list.
    pub fn read(&self, id: RecordId) -> CoreResult<Option<Document>> {
        let mut content = self.load(self.shard_for(id))?;
        Ok(content.remove(&id).and_then(|r| self.decode(r)))
    }

    /// Reads several records, loading each shard file once.
    pub fn read_many<I>(&self, ids: I) -> CoreResult<BTreeMap<RecordId, Document>>
    where
        I: IntoIterator<Item = RecordId>,
    {
        let mut found = BTreeMap::new();
        for (shard, ids) in self.group(ids) {
            let mut content = self.load(shard)?;
            for id in ids {
                if let Some(doc) = content.remove(&id).and_then(|r| self.decode(r)) {
                    found.insert(id, doc);
                }
            }
        }
        Ok(found)
    }

    /// Returns the ids stored in `shard`.
    pub fn ids(&self, shard: ShardId) -> CoreResult<BTreeSet<RecordId>> {
        Ok(self.load(shard)?.into_keys().collect())
    }

    /// Applies deletions, then writes, to one shard.
    pub fn apply(&self, shard: ShardId, batch: &ShardBatch) -> CoreResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let path = self.path(shard);
        let mut content: ShardContent = shelf::load_or_default(&path)?;
        for id in &batch.deletes {
            content.remove(id);
        }
        for (id, doc) in &batch.writes {
            content.insert(*id, self.encode(doc));
        }
        shelf::store(&path, &content)
    }

    /// Writes one record.
    pub fn write(&self, id: RecordId, doc: &Document) -> CoreResult<()> {
        let batch = ShardBatch {
            writes: vec![(id, doc.clone())],
            deletes: Vec::new(),
        };
        self.apply(self.shard_for(id), &batch)
    }

    /// Deletes one record.
    pub fn delete(&self, id: RecordId) -> CoreResult<()> {
        let batch = ShardBatch {
            writes: Vec::new(),
            deletes: vec![id],
        };
        self.apply(self.shard_for(id), &batch)
    }

    /// Lays out `doc` for storage. With headers, missing fields become empty
    /// text and fields outside the header list are not kept.
    pub fn encode(&self, doc: &Document) -> StoredRecord {
        match &self.headers {
            None => StoredRecord::Map(doc.clone()),
            Some(headers) => StoredRecord::Tuple(
                headers
                    .iter()
                    .map(|h| doc.get(h).cloned().unwrap_or_else(|| Value::from("")))
                    .collect(),
            ),
        }
    }

    /// Returns `doc` as it reads back once stored.
    ///
    /// Index entries and replies must be derived from this shape, not from
    /// the submitted one.
    pub fn normalize(&self, doc: Document) -> Document {
        match &self.headers {
            None => doc,
            Some(headers) => headers
                .iter()
                .map(|h| {
                    let value = doc.get(h).cloned().unwrap_or_else(|| Value::from(""));
                    (h.clone(), value)
                })
                .collect(),
        }
    }

    /// Interprets a stored record against the current headers.
    pub fn decode(&self, record: StoredRecord) -> Option<Document> {
        match (record, &self.headers) {
            (StoredRecord::Map(doc), _) => Some(doc),
            (StoredRecord::Tuple(values), Some(headers)) if values.len() == headers.len() => {
                Some(headers.iter().cloned().zip(values).collect())
            }
            (StoredRecord::Tuple(_), _) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::document;
    use tempfile::tempdir;

    #[test]
    fn write_read_delete() {
        let temp = tempdir().unwrap();
        let store = ShardStore::new(temp.path(), 3, None);
        store.create_all().unwrap();
        assert_eq!(store.paths().len(), 3);
        assert!(temp.path().join("data_2").exists());

        let doc = document([("a", 1), ("b", 2)]);
        store.write(RecordId::new(4), &doc).unwrap();
        assert_eq!(store.read(RecordId::new(4)).unwrap(), Some(doc));
        assert_eq!(
            store.ids(ShardId(1)).unwrap().into_iter().collect::<Vec<_>>(),
            vec![RecordId::new(4)]
        );

        store.delete(RecordId::new(4)).unwrap();
        assert!(store.read(RecordId::new(4)).unwrap().is_none());
    }

    #[test]
    fn headers_store_tuples() {
        let temp = tempdir().unwrap();
        let headers = vec!["a".to_string(), "b".to_string()];
        let store = ShardStore::new(temp.path(), 2, Some(headers));

        let stored = store.encode(&document([("a", 1), ("z", 9)]));
        assert_eq!(
            stored,
            StoredRecord::Tuple(vec![Value::Integer(1), Value::from("")])
        );

        store
            .write(RecordId::new(0), &document([("a", 1), ("b", 2)]))
            .unwrap();
        assert_eq!(
            store.read(RecordId::new(0)).unwrap(),
            Some(document([("a", 1), ("b", 2)]))
        );
    }

    #[test]
    fn normalize_matches_read_back() {
        let temp = tempdir().unwrap();
        let headers = vec!["a".to_string(), "b".to_string()];
        let store = ShardStore::new(temp.path(), 1, Some(headers));

        let doc = document([("a", 1), ("c", 5)]);
        let shaped = store.normalize(doc.clone());
        assert_eq!(shaped, document([("a", Value::from(1)), ("b", Value::from(""))]));

        store.write(RecordId::new(0), &doc).unwrap();
        assert_eq!(store.read(RecordId::new(0)).unwrap(), Some(shaped));

        let open = ShardStore::new(temp.path(), 1, None);
        assert_eq!(open.normalize(doc.clone()), doc);
    }

    #[test]
    fn mismatched_tuple_reads_as_absent() {
        let temp = tempdir().unwrap();
        let old = ShardStore::new(temp.path(), 1, Some(vec!["a".to_string()]));
        old.write(RecordId::new(0), &document([("a", 1)])).unwrap();

        let widened = ShardStore::new(
            temp.path(),
            1,
            Some(vec!["a".to_string(), "b".to_string()]),
        );
        assert!(widened.read(RecordId::new(0)).unwrap().is_none());
    }

    #[test]
    fn read_many_groups_by_shard() {
        let temp = tempdir().unwrap();
        let store = ShardStore::new(temp.path(), 2, None);
        for id in 0..5 {
            store
                .write(RecordId::new(id), &document([("n", id)]))
                .unwrap();
        }
        let found = store
            .read_many([0, 3, 4, 9].map(RecordId::new))
            .unwrap();
        assert_eq!(found.len(), 3);
        assert_eq!(found[&RecordId::new(3)]["n"], Value::Integer(3));

        let grouped = store.group([0, 1, 2].map(RecordId::new));
        assert_eq!(grouped[&ShardId(0)], vec![RecordId::new(0), RecordId::new(2)]);
    }
}
