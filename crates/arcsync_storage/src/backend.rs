//! Storage backend trait definition.

use crate::error::StorageResult;

/// A single-blob store holding the cached archive.
///
/// Backends are **opaque byte stores**. The engine owns the blob format;
/// a backend only keeps the latest bytes it was given.
///
/// # Invariants
///
/// - `read` returns exactly the bytes of the last successful `write`
/// - `write` is atomic: a concurrent or later `read` never observes a
///   partially written blob
/// - `read` after `remove` returns `None`
/// - Backends must be `Send + Sync` for use from blocking worker threads
///
/// # Implementors
///
/// - [`super::InMemoryStore`] - For testing
/// - [`super::FileStore`] - For persistent storage
pub trait ArchiveStore: Send + Sync {
    /// Reads the stored blob.
    ///
    /// Returns `None` if nothing has been written yet or the blob is empty.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn read(&self) -> StorageResult<Option<Vec<u8>>>;

    /// Atomically replaces the stored blob.
    ///
    /// After this returns successfully the new blob is durable.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails. The previous blob is left intact.
    fn write(&self, data: &[u8]) -> StorageResult<()>;

    /// Removes the stored blob. Removing an absent blob succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn remove(&self) -> StorageResult<()>;
}
