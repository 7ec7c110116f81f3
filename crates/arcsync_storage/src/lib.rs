//! # arcsync storage
//!
//! Storage backends for the arcsync archive cache.
//!
//! The cache is a **single opaque blob**: the compressed, encoded archive.
//! Backends only read, replace and remove that blob. They never interpret
//! it; decoding belongs to the engine.
//!
//! ## Design Principles
//!
//! - One blob per store, replaced wholesale
//! - Replacement is atomic: readers see the old or the new blob, never a mix
//! - Must be `Send + Sync` so writes can run on a blocking pool
//!
//! ## Available Backends
//!
//! - [`InMemoryStore`] - For testing and ephemeral engines
//! - [`FileStore`] - For persistent storage using OS file APIs
//!
//! ## Example
//!
//! ```rust
//! use arcsync_storage::{ArchiveStore, InMemoryStore};
//!
//! let store = InMemoryStore::new();
//! assert_eq!(store.read().unwrap(), None);
//! store.write(b"blob").unwrap();
//! assert_eq!(store.read().unwrap(), Some(b"blob".to_vec()));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::ArchiveStore;
pub use error::{StorageError, StorageResult};
pub use file::{cache_file_name, FileStore};
pub use memory::InMemoryStore;
