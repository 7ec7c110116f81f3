//! File-based storage backend for persistent storage.

use crate::backend::ArchiveStore;
use crate::error::{StorageError, StorageResult};
use parking_lot::Mutex;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

#[cfg(debug_assertions)]
const CACHE_SUFFIX: &str = ".debug.data";
#[cfg(not(debug_assertions))]
const CACHE_SUFFIX: &str = ".data";

const TEMP_SUFFIX: &str = ".tmp";

/// Returns the cache file name for a base name.
///
/// Debug builds use a separate file so development runs never clobber a
/// release build's cache.
#[must_use]
pub fn cache_file_name(base: &str) -> String {
    format!("{base}{CACHE_SUFFIX}")
}

/// A file-based single-blob store.
///
/// # Durability
///
/// Uses the write-then-rename pattern for crash safety:
/// 1. Write to a temporary file next to the target
/// 2. Sync the temporary file to disk
/// 3. Rename it over the target
/// 4. Fsync the directory so the rename itself is durable
///
/// The target file therefore always holds either the previous blob or the
/// new one, never a torn write.
///
/// # Thread Safety
///
/// Writes are serialized by an internal lock, so the store can be shared
/// across threads.
///
/// # Example
///
/// ```no_run
/// use arcsync_storage::{ArchiveStore, FileStore};
/// use std::path::Path;
///
/// let store = FileStore::open(Path::new("cache/Model.data")).unwrap();
/// store.write(b"archive bytes").unwrap();
/// ```
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    temp_path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Opens a store at the given path, creating parent directories if
    /// needed. The file itself is created on first write.
    ///
    /// # Errors
    ///
    /// Returns an error if the parent directories cannot be created.
    pub fn open(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut temp_name = path.file_name().unwrap_or_default().to_os_string();
        temp_name.push(TEMP_SUFFIX);

        Ok(Self {
            path: path.to_path_buf(),
            temp_path: path.with_file_name(temp_name),
            write_lock: Mutex::new(()),
        })
    }

    /// Opens a store for `base` inside `dir`, using [`cache_file_name`].
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn in_dir(dir: &Path, base: &str) -> StorageResult<Self> {
        Self::open(&dir.join(cache_file_name(base)))
    }

    /// Returns the path to the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[cfg(unix)]
    fn sync_directory(&self) -> StorageResult<()> {
        if let Some(parent) = self.path.parent() {
            let dir = if parent.as_os_str().is_empty() {
                Path::new(".")
            } else {
                parent
            };
            File::open(dir)?.sync_all()?;
        }
        Ok(())
    }

    /// NTFS journals metadata updates, so there is no directory handle to sync.
    #[cfg(not(unix))]
    fn sync_directory(&self) -> StorageResult<()> {
        Ok(())
    }
}

impl ArchiveStore for FileStore {
    fn read(&self) -> StorageResult<Option<Vec<u8>>> {
        match fs::metadata(&self.path) {
            Ok(meta) if !meta.is_file() => {
                return Err(StorageError::Corrupted(format!(
                    "{} is not a regular file",
                    self.path.display()
                )));
            }
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let data = fs::read(&self.path)?;
        if data.is_empty() {
            return Ok(None);
        }
        Ok(Some(data))
    }

    fn write(&self, data: &[u8]) -> StorageResult<()> {
        let _guard = self.write_lock.lock();

        let mut file = File::create(&self.temp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
        drop(file);

        if let Err(e) = fs::rename(&self.temp_path, &self.path) {
            let _ = fs::remove_file(&self.temp_path);
            return Err(e.into());
        }

        self.sync_directory()
    }

    fn remove(&self) -> StorageResult<()> {
        let _guard = self.write_lock.lock();
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn file_read_absent() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(&dir.path().join("cache.data")).unwrap();
        assert_eq!(store.read().unwrap(), None);
        assert!(!store.path().exists());
    }

    #[test]
    fn file_write_and_read() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(&dir.path().join("cache.data")).unwrap();

        store.write(b"hello").unwrap();
        assert_eq!(store.read().unwrap(), Some(b"hello".to_vec()));
    }

    #[test]
    fn file_write_replaces_wholesale() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(&dir.path().join("cache.data")).unwrap();

        store.write(b"a much longer first blob").unwrap();
        store.write(b"short").unwrap();
        assert_eq!(store.read().unwrap(), Some(b"short".to_vec()));
    }

    #[test]
    fn file_leaves_no_temp_file() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(&dir.path().join("cache.data")).unwrap();
        store.write(b"data").unwrap();

        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("cache.data")]);
    }

    #[test]
    fn file_persistence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.data");

        FileStore::open(&path).unwrap().write(b"persistent").unwrap();

        let reopened = FileStore::open(&path).unwrap();
        assert_eq!(reopened.read().unwrap(), Some(b"persistent".to_vec()));
    }

    #[test]
    fn file_empty_is_absent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.data");
        fs::write(&path, b"").unwrap();

        let store = FileStore::open(&path).unwrap();
        assert_eq!(store.read().unwrap(), None);
    }

    #[test]
    fn file_remove_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(&dir.path().join("cache.data")).unwrap();

        store.write(b"data").unwrap();
        store.remove().unwrap();
        store.remove().unwrap();
        assert_eq!(store.read().unwrap(), None);
    }

    #[test]
    fn file_create_with_dirs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("path").join("cache.data");

        let store = FileStore::open(&path).unwrap();
        store.write(b"x").unwrap();
        assert!(path.exists());
    }

    #[test]
    fn directory_in_place_of_file_is_corrupted() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.data");
        fs::create_dir(&path).unwrap();

        let store = FileStore::open(&path).unwrap();
        assert!(matches!(store.read(), Err(StorageError::Corrupted(_))));
    }

    #[test]
    fn in_dir_uses_cache_suffix() {
        let dir = tempdir().unwrap();
        let store = FileStore::in_dir(dir.path(), "Model").unwrap();
        assert_eq!(
            store.path().file_name().unwrap().to_string_lossy(),
            cache_file_name("Model")
        );
        assert!(cache_file_name("Model").starts_with("Model."));
    }
}
