//! Debounced cache persistence.
//!
//! The engine hands every accepted version to [`Persistence::schedule_write`].
//! Versions land in a single pending slot; a timer armed on each call
//! flushes the slot once the debounce window passes without a newer
//! version arriving. A burst of mutations therefore costs one disk write,
//! carrying the latest value.

use crate::archive::{Archive, Payload};
use crate::error::{SyncError, SyncResult};
use crate::state::Signal;
use arcsync_codec::Timestamp;
use arcsync_storage::ArchiveStore;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// A version waiting to be written.
#[derive(Debug, Clone)]
pub(crate) struct PendingWrite<P> {
    pub(crate) archive: Archive<P>,
    pub(crate) push_after: bool,
}

struct Slot<P> {
    pending: Option<PendingWrite<P>>,
    generation: u64,
}

/// Write counters.
#[derive(Debug, Default)]
pub(crate) struct WriteCounters {
    pub(crate) completed: AtomicU64,
    pub(crate) failed: AtomicU64,
    pub(crate) skipped: AtomicU64,
}

/// Loads and debounces writes of the cached archive.
pub(crate) struct Persistence<P> {
    store: Arc<dyn ArchiveStore>,
    debounce: Duration,
    slot: Arc<Mutex<Slot<P>>>,
    // Held from taking the slot until its commit finishes.
    commit_gate: Arc<tokio::sync::Mutex<()>>,
    // Timestamp of the newest blob on disk; also serializes writes.
    written: Arc<Mutex<Option<Timestamp>>>,
    counters: Arc<WriteCounters>,
    signals: mpsc::UnboundedSender<Signal>,
}

impl<P: Payload> Persistence<P> {
    pub(crate) fn new(
        store: Arc<dyn ArchiveStore>,
        debounce: Duration,
        signals: mpsc::UnboundedSender<Signal>,
    ) -> Self {
        Self {
            store,
            debounce,
            slot: Arc::new(Mutex::new(Slot {
                pending: None,
                generation: 0,
            })),
            commit_gate: Arc::new(tokio::sync::Mutex::new(())),
            written: Arc::new(Mutex::new(None)),
            counters: Arc::new(WriteCounters::default()),
            signals,
        }
    }

    pub(crate) fn counters(&self) -> &WriteCounters {
        &self.counters
    }

    /// Reads the cached archive.
    ///
    /// Absence, I/O errors and undecodable blobs all yield `None`; the
    /// engine then starts from the default archive.
    pub(crate) async fn load(&self) -> Option<Archive<P>> {
        let store = Arc::clone(&self.store);
        let result = tokio::task::spawn_blocking(move || -> SyncResult<Option<Archive<P>>> {
            match store.read()? {
                Some(blob) => Ok(Some(Archive::from_blob(&blob)?)),
                None => Ok(None),
            }
        })
        .await;

        match result {
            Ok(Ok(Some(archive))) => {
                debug!(timestamp = %archive.timestamp(), "restored archive from cache");
                *self.written.lock() = Some(archive.timestamp());
                Some(archive)
            }
            Ok(Ok(None)) => {
                debug!("no cached archive");
                None
            }
            Ok(Err(e)) => {
                warn!(error = %e, "cached archive unreadable, starting fresh");
                None
            }
            Err(e) => {
                warn!(error = %e, "cache load task failed");
                None
            }
        }
    }

    /// Queues `archive` for writing after the debounce window.
    ///
    /// A version older than the one already pending is ignored. With
    /// `push_after`, a push is requested once the write succeeds.
    pub(crate) fn schedule_write(&self, archive: Archive<P>, push_after: bool) {
        let generation = {
            let mut slot = self.slot.lock();
            if let Some(pending) = &slot.pending {
                if archive.timestamp() < pending.archive.timestamp() {
                    trace!(timestamp = %archive.timestamp(), "older than pending write, ignored");
                    return;
                }
            }
            slot.pending = Some(PendingWrite {
                archive,
                push_after,
            });
            slot.generation += 1;
            slot.generation
        };

        let writer = self.writer();
        let slot = Arc::clone(&self.slot);
        let gate = Arc::clone(&self.commit_gate);
        let debounce = self.debounce;
        tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            let _committing = gate.lock().await;
            let pending = {
                let mut slot = slot.lock();
                if slot.generation != generation {
                    return;
                }
                slot.pending.take()
            };
            if let Some(pending) = pending {
                writer.commit(pending).await;
            }
        });
    }

    /// Writes any pending version now, cancelling its timer.
    ///
    /// A write a timer already started is awaited first, so everything
    /// scheduled before the call is on disk when this returns. Returns true
    /// if this call wrote something.
    pub(crate) async fn flush(&self) -> bool {
        let _committing = self.commit_gate.lock().await;
        let pending = {
            let mut slot = self.slot.lock();
            slot.generation += 1;
            slot.pending.take()
        };
        match pending {
            Some(pending) => self.writer().commit(pending).await,
            None => false,
        }
    }

    fn writer(&self) -> Writer {
        Writer {
            store: Arc::clone(&self.store),
            written: Arc::clone(&self.written),
            counters: Arc::clone(&self.counters),
            signals: self.signals.clone(),
        }
    }
}

/// The parts of [`Persistence`] a timer task needs to write.
struct Writer {
    store: Arc<dyn ArchiveStore>,
    written: Arc<Mutex<Option<Timestamp>>>,
    counters: Arc<WriteCounters>,
    signals: mpsc::UnboundedSender<Signal>,
}

impl Writer {
    async fn commit<P: Payload>(self, pending: PendingWrite<P>) -> bool {
        let timestamp = pending.archive.timestamp();
        match self.write_blocking(&pending.archive).await {
            Ok(true) => {
                self.counters.completed.fetch_add(1, Ordering::Relaxed);
                debug!(timestamp = %timestamp, "archive written to cache");
                if pending.push_after {
                    let _ = self.signals.send(Signal::Push(timestamp));
                }
                true
            }
            Ok(false) => {
                self.counters.skipped.fetch_add(1, Ordering::Relaxed);
                trace!(timestamp = %timestamp, "newer archive already on disk, write skipped");
                false
            }
            Err(e) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!(timestamp = %timestamp, error = %e, "cache write failed");
                false
            }
        }
    }

    async fn write_blocking<P: Payload>(&self, archive: &Archive<P>) -> SyncResult<bool> {
        let blob = archive.to_blob()?;
        let timestamp = archive.timestamp();
        let store = Arc::clone(&self.store);
        let written = Arc::clone(&self.written);

        tokio::task::spawn_blocking(move || -> SyncResult<bool> {
            let mut written = written.lock();
            if written.is_some_and(|last| timestamp < last) {
                return Ok(false);
            }
            store
                .write(&blob)
                .map_err(|e| SyncError::PersistenceWriteFailed(e.to_string()))?;
            *written = Some(timestamp);
            Ok(true)
        })
        .await
        .map_err(|e| SyncError::PersistenceWriteFailed(e.to_string()))?
    }
}
