//! # arcsync engine
//!
//! Keeps one structured record consistent between memory, a local cache file
//! and a remote mirror, using last-write-wins on a per-archive timestamp.
//!
//! This crate provides:
//! - [`SyncEngine`], a cloneable handle to the task that owns the archive
//! - Debounced cache persistence over any [`ArchiveStore`](arcsync_storage::ArchiveStore)
//! - The [`RemoteGateway`] contract, with offline and in-memory implementations
//! - Subscriptions that replay the current archive, then stream every new one
//!
//! ## Architecture
//!
//! A single task owns the current archive R. Local mutations, the restored
//! cache and remote fetches all produce *candidates*, which are resolved
//! against R one at a time:
//!
//! 1. Until R has been seeded, any candidate is accepted
//! 2. Afterwards a candidate wins only with a strictly newer timestamp
//! 3. An accepted candidate is delivered to every subscriber, then written
//!    to the cache (unless it came from the cache)
//! 4. Local versions are pushed after the write; remote versions never are
//!
//! A remote record older than R, or no remote record at all, makes the
//! engine push R.
//!
//! ## Key Invariants
//!
//! - R's timestamp never decreases
//! - Equal timestamps never replace R
//! - A burst of mutations costs one cache write
//! - Boundary failures are logged and never reach callers

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod archive;
mod config;
mod engine;
mod error;
mod gateway;
mod persistence;
mod registry;
mod state;

pub use archive::{Archive, Clock, ManualClock, Origin, Payload, SystemClock};
pub use config::SyncConfig;
pub use engine::{EngineBuilder, SyncEngine};
pub use error::{GatewayResult, SyncError, SyncResult};
pub use gateway::{MemoryGateway, OfflineGateway, PullTrigger, RemoteGateway, RemoteIdentity};
pub use registry::{SubscriberId, Subscription};
pub use state::{resolve, Deferred, Resolution, SyncStats};

pub use arcsync_codec::Timestamp;
