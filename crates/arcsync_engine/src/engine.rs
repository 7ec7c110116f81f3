//! The engine handle.

use crate::archive::{Archive, Clock, Payload, SystemClock};
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::gateway::{OfflineGateway, RemoteGateway};
use crate::registry::{SubscriberId, Subscription};
use crate::state::{Deferred, EngineActor, Event, SyncStats};
use arcsync_storage::{ArchiveStore, InMemoryStore};
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::Instrument;

/// Handle to a running sync engine.
///
/// Cheap to clone; all clones talk to the same engine task. The engine
/// stops when [`shutdown`](Self::shutdown) is called or the last handle is
/// dropped, flushing any pending cache write first.
///
/// # Example
///
/// ```
/// use arcsync_engine::SyncEngine;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let engine = SyncEngine::<u64>::ephemeral();
/// let mut updates = engine.subscribe();
///
/// engine.mutate(|count| *count += 1);
///
/// assert_eq!(*updates.recv().await.unwrap().payload(), 0);
/// assert_eq!(*updates.recv().await.unwrap().payload(), 1);
/// # }
/// ```
pub struct SyncEngine<P: Payload> {
    commands: mpsc::UnboundedSender<Event<P>>,
    next_subscriber: Arc<AtomicU64>,
    reachability_timeout: Duration,
}

impl<P: Payload> Clone for SyncEngine<P> {
    fn clone(&self) -> Self {
        Self {
            commands: self.commands.clone(),
            next_subscriber: Arc::clone(&self.next_subscriber),
            reachability_timeout: self.reachability_timeout,
        }
    }
}

impl<P: Payload> fmt::Debug for SyncEngine<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncEngine")
            .field("running", &self.is_running())
            .finish()
    }
}

impl<P: Payload> SyncEngine<P> {
    /// Starts configuring an engine. Without further calls the engine keeps
    /// its cache in memory and has no remote.
    pub fn builder(config: SyncConfig) -> EngineBuilder<P, OfflineGateway> {
        EngineBuilder {
            config,
            store: None,
            gateway: OfflineGateway,
            clock: Arc::new(SystemClock),
            _payload: PhantomData,
        }
    }

    /// Spawns an engine with no cache file and no remote.
    ///
    /// Must be called from within a tokio runtime.
    pub fn ephemeral() -> Self {
        Self::builder(SyncConfig::default().with_pull_on_start(false)).spawn()
    }

    /// Applies `transform` to a copy of the current payload.
    ///
    /// If the payload changed, the result is stamped with the current time
    /// and becomes the new archive, subject to last-write-wins. Mutations
    /// are applied in the order they are submitted. Does nothing once the
    /// engine has stopped.
    pub fn mutate<F>(&self, transform: F)
    where
        F: FnOnce(&mut P) + Send + 'static,
    {
        self.mutate_with(move |payload| {
            transform(payload);
            None
        });
    }

    /// Like [`mutate`](Self::mutate), but the transform may return work to
    /// run once the new archive has been delivered to subscribers.
    pub fn mutate_with<F>(&self, transform: F)
    where
        F: FnOnce(&mut P) -> Option<Deferred> + Send + 'static,
    {
        let _ = self.commands.send(Event::LocalMutated(Box::new(transform)));
    }

    /// Subscribes to archive versions.
    ///
    /// The subscription first yields the current archive, then every newly
    /// accepted one. On a stopped engine the subscription ends immediately.
    pub fn subscribe(&self) -> Subscription<P> {
        let id = SubscriberId::new(self.next_subscriber.fetch_add(1, Ordering::Relaxed));
        let (sender, receiver) = mpsc::unbounded_channel();
        let _ = self.commands.send(Event::Subscribe { id, sender });
        Subscription::new(id, receiver)
    }

    /// Removes a subscription by id.
    pub fn unsubscribe(&self, id: SubscriberId) {
        let _ = self.commands.send(Event::Unsubscribe(id));
    }

    /// Asks the engine to pull the remote record.
    pub fn request_sync(&self) {
        let _ = self.commands.send(Event::PullRequested);
    }

    /// Pulls and reports whether any archive is delivered within `timeout`.
    ///
    /// A `true` result means the engine produced a new version in time,
    /// from the remote or from a concurrent local mutation.
    pub async fn check_reachable(&self, timeout: Duration) -> bool {
        let mut subscription = self.subscribe();
        let query = async {
            // The first item replays the current archive.
            subscription.recv().await?;
            self.request_sync();
            subscription.recv().await
        };
        matches!(tokio::time::timeout(timeout, query).await, Ok(Some(_)))
    }

    /// [`check_reachable`](Self::check_reachable) with the configured
    /// reachability timeout.
    pub async fn is_reachable(&self) -> bool {
        self.check_reachable(self.reachability_timeout).await
    }

    /// Returns the current archive.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::EngineStopped`] if the engine is not running.
    pub async fn current(&self) -> SyncResult<Archive<P>> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Event::Current(reply))
            .map_err(|_| SyncError::EngineStopped)?;
        response.await.map_err(|_| SyncError::EngineStopped)
    }

    /// Returns a snapshot of the engine statistics.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::EngineStopped`] if the engine is not running.
    pub async fn stats(&self) -> SyncResult<SyncStats> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Event::Stats(reply))
            .map_err(|_| SyncError::EngineStopped)?;
        response.await.map_err(|_| SyncError::EngineStopped)
    }

    /// Flushes any pending cache write and stops the engine.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::EngineStopped`] if the engine had already
    /// stopped.
    pub async fn shutdown(&self) -> SyncResult<()> {
        let (done, stopped) = oneshot::channel();
        self.commands
            .send(Event::Shutdown(done))
            .map_err(|_| SyncError::EngineStopped)?;
        stopped.await.map_err(|_| SyncError::EngineStopped)
    }

    /// Whether the engine task is still running.
    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }
}

/// Builder for [`SyncEngine`].
pub struct EngineBuilder<P, G> {
    config: SyncConfig,
    store: Option<Arc<dyn ArchiveStore>>,
    gateway: G,
    clock: Arc<dyn Clock>,
    _payload: PhantomData<fn() -> P>,
}

impl<P: Payload, G: RemoteGateway> EngineBuilder<P, G> {
    /// Sets the cache store. Defaults to an in-memory store.
    pub fn store(mut self, store: Arc<dyn ArchiveStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Sets the remote gateway. Defaults to [`OfflineGateway`].
    pub fn gateway<H: RemoteGateway>(self, gateway: H) -> EngineBuilder<P, H> {
        EngineBuilder {
            config: self.config,
            store: self.store,
            gateway,
            clock: self.clock,
            _payload: PhantomData,
        }
    }

    /// Sets the clock that stamps local mutations.
    pub fn clock(mut self, clock: impl Clock) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Spawns the engine task on the current tokio runtime.
    pub fn spawn(self) -> SyncEngine<P> {
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryStore::new()));
        let reachability_timeout = self.config.reachability_timeout;
        let (commands, receiver) = mpsc::unbounded_channel();

        let actor = EngineActor::new(self.config, self.gateway, self.clock, store, receiver);
        tokio::spawn(actor.run().instrument(tracing::debug_span!("sync_engine")));

        SyncEngine {
            commands,
            next_subscriber: Arc::new(AtomicU64::new(0)),
            reachability_timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::ManualClock;
    use crate::gateway::MemoryGateway;
    use arcsync_codec::Timestamp;
    use std::sync::atomic::AtomicUsize;

    const DEBOUNCE: Duration = Duration::from_millis(30);

    fn config() -> SyncConfig {
        SyncConfig::new()
            .with_debounce(DEBOUNCE)
            .with_pull_on_start(false)
    }

    fn archive(value: u64, millis: u64) -> Archive<u64> {
        Archive::new(value, Timestamp::from_millis(millis))
    }

    async fn settle() {
        tokio::time::sleep(DEBOUNCE * 5).await;
    }

    #[tokio::test]
    async fn ephemeral_starts_from_default() {
        let engine = SyncEngine::<u64>::ephemeral();
        let current = engine.current().await.unwrap();
        assert_eq!(current, Archive::default());
    }

    #[tokio::test]
    async fn mutation_is_stamped_by_clock() {
        let engine = SyncEngine::<u64>::builder(config())
            .clock(ManualClock::new(10))
            .spawn();

        engine.mutate(|n| *n = 7);
        assert_eq!(engine.current().await.unwrap(), archive(7, 10));
    }

    #[tokio::test]
    async fn unchanged_payload_does_not_save() {
        let store = Arc::new(InMemoryStore::new());
        let engine = SyncEngine::<u64>::builder(config())
            .store(store.clone())
            .spawn();
        let mut sub = engine.subscribe();
        assert_eq!(sub.recv().await, Some(Archive::default()));

        engine.mutate(|n| *n = 0);
        settle().await;

        assert_eq!(sub.try_recv(), None);
        assert_eq!(store.write_count(), 0);
        assert_eq!(engine.current().await.unwrap().timestamp(), Timestamp::MIN);
    }

    #[tokio::test]
    async fn deferred_runs_after_delivery() {
        let engine = SyncEngine::<u64>::builder(config())
            .clock(ManualClock::new(5))
            .spawn();
        let mut sub = engine.subscribe();
        let (seen_tx, seen_rx) = oneshot::channel();

        engine.mutate_with(move |n| {
            *n = 1;
            let deferred: Deferred = Box::new(move || {
                let _ = seen_tx.send(());
            });
            Some(deferred)
        });

        seen_rx.await.unwrap();
        // Delivery happened before the deferred work ran.
        assert_eq!(sub.try_recv(), Some(Archive::default()));
        assert_eq!(sub.try_recv(), Some(archive(1, 5)));
        assert_eq!(*engine.current().await.unwrap().payload(), 1);
    }

    #[tokio::test]
    async fn deferred_runs_even_without_change() {
        let engine = SyncEngine::<u64>::ephemeral();
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ran);

        engine.mutate_with(move |_| {
            let deferred: Deferred = Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
            Some(deferred)
        });
        engine.current().await.unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stale_local_stamp_is_dropped() {
        let clock = Arc::new(ManualClock::new(10));
        let engine = SyncEngine::<u64>::builder(config())
            .clock(Arc::clone(&clock))
            .spawn();

        engine.mutate(|n| *n = 1);
        // Same tick: equal timestamp never replaces the current archive.
        engine.mutate(|n| *n = 2);
        assert_eq!(engine.current().await.unwrap(), archive(1, 10));

        clock.set(11);
        engine.mutate(|n| *n = 3);
        assert_eq!(engine.current().await.unwrap(), archive(3, 11));

        let stats = engine.stats().await.unwrap();
        assert_eq!(stats.candidates_accepted, 2);
        assert_eq!(stats.candidates_dropped, 1);
    }

    #[tokio::test]
    async fn mutations_are_written_once_after_debounce() {
        let store = Arc::new(InMemoryStore::new());
        let engine = SyncEngine::<u64>::builder(config())
            .store(store.clone())
            .clock(ManualClock::ticking(1, 1))
            .spawn();

        for _ in 0..5 {
            engine.mutate(|n| *n += 1);
        }
        engine.current().await.unwrap();
        assert_eq!(store.write_count(), 0);

        settle().await;
        assert_eq!(store.write_count(), 1);
        let written = Archive::<u64>::from_blob(&store.data().unwrap()).unwrap();
        assert_eq!(written, archive(5, 5));
        assert_eq!(engine.stats().await.unwrap().writes_completed, 1);
    }

    #[tokio::test]
    async fn shutdown_flushes_pending_write() {
        let store = Arc::new(InMemoryStore::new());
        let engine = SyncEngine::<u64>::builder(config().with_debounce(Duration::from_secs(60)))
            .store(store.clone())
            .clock(ManualClock::new(3))
            .spawn();

        engine.mutate(|n| *n = 42);
        engine.shutdown().await.unwrap();

        assert_eq!(store.write_count(), 1);
        assert!(!engine.is_running());
        assert!(matches!(
            engine.current().await,
            Err(SyncError::EngineStopped)
        ));
        assert!(matches!(
            engine.shutdown().await,
            Err(SyncError::EngineStopped)
        ));
    }

    #[tokio::test]
    async fn subscription_ends_when_engine_stops() {
        let engine = SyncEngine::<u64>::ephemeral();
        let mut sub = engine.subscribe();
        assert!(sub.recv().await.is_some());
        engine.shutdown().await.unwrap();
        assert_eq!(sub.recv().await, None);
    }

    #[tokio::test]
    async fn unsubscribe_stops_deliveries() {
        let engine = SyncEngine::<u64>::builder(config())
            .clock(ManualClock::ticking(1, 1))
            .spawn();
        let mut sub = engine.subscribe();
        assert!(sub.recv().await.is_some());

        engine.unsubscribe(sub.id());
        engine.mutate(|n| *n = 1);
        engine.current().await.unwrap();

        assert_eq!(sub.recv().await, None);
        assert_eq!(engine.stats().await.unwrap().subscribers, 0);
    }

    #[tokio::test]
    async fn startup_pull_fetches_remote() {
        let gateway = MemoryGateway::new("user");
        gateway.store_archive(&archive(8, 8)).unwrap();

        let engine = SyncEngine::<u64>::builder(config().with_pull_on_start(true))
            .gateway(gateway.clone())
            .spawn();
        let mut sub = engine.subscribe();

        assert_eq!(sub.recv().await, Some(Archive::default()));
        assert_eq!(sub.recv().await, Some(archive(8, 8)));
        settle().await;
        assert_eq!(gateway.push_count(), 0);
        assert_eq!(gateway.subscription_count(), 1);
    }

    #[tokio::test]
    async fn pulls_within_window_are_coalesced() {
        let gateway = MemoryGateway::new("user");
        let engine = SyncEngine::<u64>::builder(
            config().with_pull_coalesce_window(Duration::from_secs(60)),
        )
        .gateway(gateway.clone())
        .spawn();

        for _ in 0..3 {
            engine.request_sync();
        }
        settle().await;

        let stats = engine.stats().await.unwrap();
        assert_eq!(stats.pulls_requested, 3);
        assert_eq!(stats.pulls_coalesced, 2);
        assert_eq!(gateway.fetch_count(), 1);
        assert_eq!(gateway.resolve_count(), 1);
    }

    #[tokio::test]
    async fn failed_resolution_does_not_coalesce_later_pulls() {
        let gateway = MemoryGateway::signed_out();
        let engine = SyncEngine::<u64>::builder(config())
            .gateway(gateway.clone())
            .spawn();

        engine.request_sync();
        settle().await;
        engine.request_sync();
        settle().await;

        let stats = engine.stats().await.unwrap();
        assert_eq!(stats.pulls_requested, 2);
        assert_eq!(stats.pulls_coalesced, 0);
        assert_eq!(gateway.resolve_count(), 2);
        assert_eq!(gateway.fetch_count(), 0);
    }

    #[tokio::test]
    async fn ephemeral_is_unreachable() {
        let engine = SyncEngine::<u64>::ephemeral();
        assert!(!engine.check_reachable(Duration::from_millis(50)).await);
    }
}
