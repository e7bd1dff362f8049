//! Atomic JSON files
//!
//! Every update is a read-modify-write under the file's lock. The new
//! content goes to a temporary file in the same directory which then
//! replaces the target, so readers never observe a partial write.

use crate::error::StoreError;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::Write;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

/// Write `bytes` to `path` through a temp file and rename
///
/// # Errors
/// `StoreError::Io` when the directory, temp file or rename fails.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| StoreError::io(dir, e))?;
    tmp.write_all(bytes).map_err(|e| StoreError::io(tmp.path(), e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| StoreError::io(tmp.path(), e))?;
    tmp.persist(path)
        .map_err(|e| StoreError::io(path, e.error))?;
    Ok(())
}

/// Serialize `value` as pretty JSON and write it atomically
///
/// # Errors
/// Serialization or write failure.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|source| StoreError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    write_atomic(path, &bytes)
}

/// Read JSON from `path`; `Ok(None)` when the file does not exist
///
/// # Errors
/// Read or parse failure.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StoreError::io(path, e)),
    };
    serde_json::from_str(&text)
        .map(Some)
        .map_err(|source| StoreError::Json {
            path: path.to_path_buf(),
            source,
        })
}

/// One JSON document guarded by a lock
pub(crate) struct JsonFile<T> {
    path: PathBuf,
    lock: Mutex<()>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonFile<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    pub(crate) fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
            _marker: PhantomData,
        }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Current content, or the default when the file is missing
    pub(crate) fn read(&self) -> Result<T, StoreError> {
        let _guard = self.lock.lock();
        Ok(read_json(&self.path)?.unwrap_or_default())
    }

    /// Read, mutate and write back; nothing is written when `f` fails
    pub(crate) fn update<R>(
        &self,
        f: impl FnOnce(&mut T) -> Result<R, StoreError>,
    ) -> Result<R, StoreError> {
        let _guard = self.lock.lock();
        let mut value: T = read_json(&self.path)?.unwrap_or_default();
        let result = f(&mut value)?;
        write_json(&self.path, &value)?;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn update_creates_and_rewrites() {
        let dir = tempfile::tempdir().unwrap();
        let file: JsonFile<BTreeMap<String, u32>> = JsonFile::new(dir.path().join("x/c.json"));
        assert!(file.read().unwrap().is_empty());

        file.update(|m| {
            m.insert("a".into(), 1);
            Ok(())
        })
        .unwrap();
        let n = file
            .update(|m| {
                *m.entry("a".into()).or_default() += 1;
                Ok(m["a"])
            })
            .unwrap();
        assert_eq!(n, 2);
        assert_eq!(file.read().unwrap()["a"], 2);
    }

    #[test]
    fn failed_update_leaves_file_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.json");
        let file: JsonFile<Vec<u32>> = JsonFile::new(path.clone());
        file.update(|v| {
            v.push(1);
            Ok(())
        })
        .unwrap();
        let before = std::fs::read(&path).unwrap();

        let err = file
            .update(|v| {
                v.push(2);
                Err::<(), _>(StoreError::UnknownUser("x".into()))
            })
            .unwrap_err();
        assert!(matches!(err, StoreError::UnknownUser(_)));
        assert_eq!(std::fs::read(&path).unwrap(), before);
    }

    #[test]
    fn malformed_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{not json").unwrap();
        let file: JsonFile<Vec<u32>> = JsonFile::new(path);
        assert!(matches!(file.read(), Err(StoreError::Json { .. })));
    }
}
