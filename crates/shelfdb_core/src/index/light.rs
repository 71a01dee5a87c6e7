//! Directory-tree index representation.
//!
//! ```text
//! index_a/
//! ├─ v1/
//! │  ├─ 0
//! │  └─ 3
//! └─ vhello%20world/
//!    └─ 7
//! ```
//!
//! The presence of `index_<field>/v<value>/<id>` is the index fact. Value
//! components are percent-encoded so any key is a valid file name. Keys
//! whose encoding would exceed [`MAX_COMPONENT`] bytes live under
//! `h<sha256>/` instead, with the full key kept in a `key` file beside the
//! ids.

use crate::error::CoreResult;
use crate::index::traits::{Entries, IndexDelta, IndexStore};
use crate::types::RecordId;
use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::fs::{self, OpenOptions};
use std::io;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

const VALUE_PREFIX: char = 'v';
const HASHED_PREFIX: char = 'h';
const KEY_FILE: &str = "key";

/// Longest encoded value component kept verbatim.
pub const MAX_COMPONENT: usize = 128;

/// Index stored as a directory tree of empty marker files.
#[derive(Debug, Clone)]
pub struct LightIndex {
    field: String,
    root: PathBuf,
}

impl LightIndex {
    /// Creates a handle for `field` rooted at `root`.
    pub fn new(field: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            field: field.into(),
            root: root.into(),
        }
    }

    fn value_dir(&self, key: &str) -> PathBuf {
        self.root.join(component_for(key))
    }

    /// Removes a value directory once its last id is gone.
    fn prune(dir: &Path) -> CoreResult<()> {
        if is_hashed(dir) && Self::read_ids(dir)?.is_empty() {
            match fs::remove_file(dir.join(KEY_FILE)) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        // Fails while other ids remain, which is fine.
        let _ = fs::remove_dir(dir);
        Ok(())
    }

    fn read_ids(dir: &Path) -> CoreResult<BTreeSet<RecordId>> {
        let listing = match fs::read_dir(dir) {
            Ok(listing) => listing,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(BTreeSet::new()),
            Err(e) => return Err(e.into()),
        };
        let mut ids = BTreeSet::new();
        for entry in listing {
            let entry = entry?;
            if let Some(id) = entry.file_name().to_str().and_then(|n| n.parse().ok()) {
                ids.insert(RecordId::new(id));
            }
        }
        Ok(ids)
    }
}

impl IndexStore for LightIndex {
    fn field(&self) -> &str {
        &self.field
    }

    fn resource(&self) -> &Path {
        &self.root
    }

    fn exists(&self) -> bool {
        self.root.is_dir()
    }

    fn create(&self) -> CoreResult<()> {
        fs::create_dir_all(&self.root)?;
        Ok(())
    }

    fn clear(&self) -> CoreResult<()> {
        match fs::remove_dir_all(&self.root) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.create()
    }

    fn apply(&self, delta: &IndexDelta) -> CoreResult<()> {
        for (key, id) in delta.removals() {
            let dir = self.value_dir(key);
            match fs::remove_file(dir.join(id.as_u64().to_string())) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            }
            Self::prune(&dir)?;
        }
        for (key, id) in delta.additions() {
            let dir = self.value_dir(key);
            fs::create_dir_all(&dir)?;
            let key_file = dir.join(KEY_FILE);
            if is_hashed(&dir) && !key_file.is_file() {
                fs::write(&key_file, key)?;
            }
            OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(false)
                .open(dir.join(id.as_u64().to_string()))?;
        }
        Ok(())
    }

    fn lookup(&self, key: &str) -> CoreResult<BTreeSet<RecordId>> {
        Self::read_ids(&self.value_dir(key))
    }

    fn entries(&self) -> CoreResult<Entries> {
        let listing = match fs::read_dir(&self.root) {
            Ok(listing) => listing,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Entries::new()),
            Err(e) => return Err(e.into()),
        };
        let mut entries = Entries::new();
        for entry in listing {
            let entry = entry?;
            let name = entry.file_name();
            let key = if is_hashed(&entry.path()) {
                match fs::read_to_string(entry.path().join(KEY_FILE)) {
                    Ok(key) => Some(key),
                    Err(e) if e.kind() == io::ErrorKind::NotFound => None,
                    Err(e) => return Err(e.into()),
                }
            } else {
                name.to_str().and_then(decode_component)
            };
            let Some(key) = key else {
                continue;
            };
            let ids = Self::read_ids(&entry.path())?;
            if !ids.is_empty() {
                entries.insert(key, ids);
            }
        }
        Ok(entries)
    }
}

/// Returns the directory name holding the ids of `key`.
fn component_for(key: &str) -> String {
    let encoded = encode_component(key);
    if encoded.len() <= MAX_COMPONENT {
        return encoded;
    }
    let mut out = String::with_capacity(65);
    out.push(HASHED_PREFIX);
    for byte in Sha256::digest(key.as_bytes()).iter() {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

fn is_hashed(dir: &Path) -> bool {
    dir.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with(HASHED_PREFIX))
}

/// Turns an index key into a file name component.
fn encode_component(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 1);
    out.push(VALUE_PREFIX);
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            out.push(char::from(byte));
        } else {
            let _ = write!(out, "%{byte:02X}");
        }
    }
    out
}

fn decode_component(name: &str) -> Option<String> {
    let encoded = name.strip_prefix(VALUE_PREFIX)?;
    let raw = encoded.as_bytes();
    let mut bytes = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        if raw[i] == b'%' {
            let hex = encoded.get(i + 1..i + 3)?;
            bytes.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            bytes.push(raw[i]);
            i += 1;
        }
    }
    String::from_utf8(bytes).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::document;
    use tempfile::tempdir;

    #[test]
    fn component_encoding() {
        assert_eq!(encode_component("1"), "v1");
        assert_eq!(encode_component("a b/c"), "va%20b%2Fc");
        assert_eq!(encode_component(".."), "v%2E%2E");
        assert_eq!(decode_component("va%20b%2Fc").as_deref(), Some("a b/c"));
        assert_eq!(decode_component("x1"), None);
        assert_eq!(decode_component("v%4"), None);
    }

    #[test]
    fn set_lookup_and_delete() {
        let temp = tempdir().unwrap();
        let index = LightIndex::new("a", temp.path().join("index_a"));
        index.create().unwrap();

        let doc = document([("a", "hello world")]);
        index.set_index(&doc, RecordId::new(2)).unwrap();
        index.set_index(&doc, RecordId::new(5)).unwrap();
        assert!(temp.path().join("index_a/vhello%20world/2").exists());

        let found = index.lookup("hello world").unwrap();
        assert_eq!(found.len(), 2);

        index.del_index(&doc, RecordId::new(2)).unwrap();
        index.del_index(&doc, RecordId::new(5)).unwrap();
        assert!(index.lookup("hello world").unwrap().is_empty());
        assert!(!temp.path().join("index_a/vhello%20world").exists());
    }

    #[test]
    fn long_keys_use_bounded_names() {
        let temp = tempdir().unwrap();
        let index = LightIndex::new("a", temp.path().join("index_a"));
        index.create().unwrap();

        let long = "é".repeat(300);
        let short = "é".repeat(10);
        assert!(component_for(&long).len() <= MAX_COMPONENT);
        assert!(component_for(&long).starts_with(HASHED_PREFIX));
        assert_eq!(component_for(&short), encode_component(&short));

        let doc = document([("a", long.as_str())]);
        index.set_index(&doc, RecordId::new(1)).unwrap();
        index.set_index(&doc, RecordId::new(4)).unwrap();
        assert_eq!(index.lookup(&long).unwrap().len(), 2);
        assert_eq!(
            index.entries().unwrap().get(&long).map(BTreeSet::len),
            Some(2)
        );

        index.del_index(&doc, RecordId::new(1)).unwrap();
        assert_eq!(index.lookup(&long).unwrap().len(), 1);
        index.del_index(&doc, RecordId::new(4)).unwrap();
        assert!(index.entries().unwrap().is_empty());
        assert_eq!(fs::read_dir(temp.path().join("index_a")).unwrap().count(), 0);
    }

    #[test]
    fn entries_and_no_ordering() {
        let temp = tempdir().unwrap();
        let index = LightIndex::new("a", temp.path().join("index_a"));
        index.set_index(&document([("a", 1)]), RecordId::new(0)).unwrap();
        index.set_index(&document([("a", 2)]), RecordId::new(1)).unwrap();

        let entries = index.entries().unwrap();
        assert_eq!(entries.keys().collect::<Vec<_>>(), vec!["1", "2"]);
        assert!(index.ordered().is_none());

        index.clear().unwrap();
        assert!(index.exists());
        assert!(index.entries().unwrap().is_empty());
    }

    #[test]
    fn apply_is_idempotent() {
        let temp = tempdir().unwrap();
        let index = LightIndex::new("a", temp.path().join("index_a"));
        let mut delta = IndexDelta::new();
        delta.remove("1", RecordId::new(0));
        delta.add("4", RecordId::new(0));
        index.apply(&delta).unwrap();
        index.apply(&delta).unwrap();
        assert_eq!(index.lookup("4").unwrap().len(), 1);
    }
}
