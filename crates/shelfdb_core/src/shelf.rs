//! Whole-file persistent values ("shelf" files).
//!
//! Every persistent resource of a collection (metadata, shards, heavy
//! indexes) is a single file holding one CBOR-encoded value. Writes go
//! through a uniquely named temporary sibling that is synced and then
//! renamed over the target, so a reader sees either the previous or the
//! next version of a file, never a torn one.

use crate::error::CoreResult;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Reads a shelf file, returning `None` when it does not exist.
pub fn load<T: DeserializeOwned>(path: &Path) -> CoreResult<Option<T>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if file.metadata()?.len() == 0 {
        return Ok(None);
    }
    let value = ciborium::from_reader(BufReader::new(file))?;
    Ok(Some(value))
}

/// Reads a shelf file, falling back to the type's default when absent.
pub fn load_or_default<T: DeserializeOwned + Default>(path: &Path) -> CoreResult<T> {
    Ok(load(path)?.unwrap_or_default())
}

/// Writes a shelf file atomically (write temp, sync, rename).
pub fn store<T: Serialize>(path: &Path, value: &T) -> CoreResult<()> {
    let temp = temp_path(path);
    let result = write_temp(&temp, value).and_then(|()| {
        fs::rename(&temp, path)?;
        Ok(())
    });
    if result.is_err() {
        let _ = fs::remove_file(&temp);
    }
    result
}

/// Returns true if a shelf file exists at `path`.
pub fn exists(path: &Path) -> bool {
    path.is_file()
}

fn write_temp<T: Serialize>(temp: &Path, value: &T) -> CoreResult<()> {
    let file = File::create(temp)?;
    let mut writer = BufWriter::new(file);
    ciborium::into_writer(value, &mut writer)?;
    writer.flush()?;
    let file = writer.into_inner().map_err(io::IntoInnerError::into_error)?;
    file.sync_all()?;
    Ok(())
}

/// Temporary files are unique per write so that concurrent writers from
/// different instances never share one.
fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!(".{}.tmp", Uuid::new_v4().simple()));
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    #[test]
    fn missing_file_loads_as_none() {
        let temp = tempdir().unwrap();
        let loaded: Option<BTreeMap<u64, String>> = load(&temp.path().join("absent")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn store_then_load() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("meta");

        let mut map = BTreeMap::new();
        map.insert(3u64, "three".to_string());
        store(&path, &map).unwrap();

        let loaded: BTreeMap<u64, String> = load_or_default(&path).unwrap();
        assert_eq!(loaded, map);
        assert!(exists(&path));
    }

    #[test]
    fn store_leaves_no_temp_files() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("data_0");
        store(&path, &vec![1u64, 2, 3]).unwrap();
        store(&path, &vec![4u64]).unwrap();

        let names: Vec<_> = fs::read_dir(temp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("data_0")]);

        let loaded: Vec<u64> = load_or_default(&path).unwrap();
        assert_eq!(loaded, vec![4]);
    }

    #[test]
    fn corrupt_file_is_a_decode_error() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("broken");
        fs::write(&path, [0xff, 0x00, 0x13]).unwrap();
        let result: CoreResult<Option<Vec<u64>>> = load(&path);
        assert!(result.is_err());
    }
}
