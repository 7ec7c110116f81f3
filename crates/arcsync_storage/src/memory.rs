//! In-memory storage backend for testing.

use crate::backend::ArchiveStore;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// An in-memory single-blob store.
///
/// Suitable for:
/// - Unit and integration tests
/// - Ephemeral engines that don't need persistence
///
/// Counts successful writes and can be told to reject writes, which lets
/// tests observe debouncing and write-failure handling.
///
/// # Example
///
/// ```rust
/// use arcsync_storage::{ArchiveStore, InMemoryStore};
///
/// let store = InMemoryStore::new();
/// store.write(b"one").unwrap();
/// store.write(b"two").unwrap();
/// assert_eq!(store.write_count(), 2);
/// assert_eq!(store.data(), Some(b"two".to_vec()));
/// ```
#[derive(Debug, Default)]
pub struct InMemoryStore {
    data: RwLock<Option<Vec<u8>>>,
    writes: AtomicUsize,
    fail_writes: AtomicBool,
}

impl InMemoryStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store with a pre-existing blob.
    ///
    /// Useful for testing startup restore.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            data: RwLock::new(Some(data)),
            ..Self::default()
        }
    }

    /// Returns a copy of the stored blob.
    #[must_use]
    pub fn data(&self) -> Option<Vec<u8>> {
        self.data.read().clone()
    }

    /// Number of successful writes so far.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Makes subsequent writes fail (or succeed again).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

impl ArchiveStore for InMemoryStore {
    fn read(&self) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.data.read().clone().filter(|data| !data.is_empty()))
    }

    fn write(&self, data: &[u8]) -> StorageResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::WriteRejected(
                "in-memory store is failing writes".into(),
            ));
        }
        *self.data.write() = Some(data.to_vec());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn remove(&self) -> StorageResult<()> {
        *self.data.write() = None;
        Ok(())
    }
}
