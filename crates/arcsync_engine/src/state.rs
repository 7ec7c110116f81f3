//! Engine state and event handling.
//!
//! One task owns the current archive and everything derived from it. All
//! inputs (local mutations, the cache, remote fetches, subscription
//! requests) arrive as [`Event`]s and are handled one at a time, so the
//! archive is only ever replaced by a candidate that strictly supersedes it.
//!
//! Gateway calls and disk I/O run in spawned tasks and report back through
//! the same queue; the actor never waits on them.

use crate::archive::{Archive, Clock, Origin, Payload};
use crate::config::SyncConfig;
use crate::error::{GatewayResult, SyncError};
use crate::gateway::{PullTrigger, RemoteGateway, RemoteIdentity};
use crate::persistence::Persistence;
use crate::registry::{SubscriberId, SubscriberRegistry};
use arcsync_codec::Timestamp;
use arcsync_storage::ArchiveStore;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

/// Work to run after a mutation has been delivered to subscribers.
pub type Deferred = Box<dyn FnOnce() + Send + 'static>;

pub(crate) type Transform<P> = Box<dyn FnOnce(&mut P) -> Option<Deferred> + Send + 'static>;

/// Outcome of comparing a candidate with the current archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The candidate replaces the current archive.
    Accept,
    /// The candidate is not newer and is dropped.
    Stale,
}

/// Last-write-wins resolution.
///
/// With no current archive every candidate is accepted. Otherwise only a
/// strictly newer timestamp wins; an equal timestamp is the same version
/// and is dropped, whatever its payload.
pub fn resolve<P>(current: Option<&Archive<P>>, candidate: &Archive<P>) -> Resolution {
    match current {
        Some(current) if !candidate.is_newer_than(current) => Resolution::Stale,
        _ => Resolution::Accept,
    }
}

/// Statistics about sync operations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStats {
    /// Candidates that replaced the current archive.
    pub candidates_accepted: u64,
    /// Candidates dropped as not newer.
    pub candidates_dropped: u64,
    /// Archives handed to subscribers, counted per subscriber.
    pub deliveries: u64,
    /// Live subscribers at the time of the snapshot.
    pub subscribers: usize,
    /// Pulls requested, coalesced ones included.
    pub pulls_requested: u64,
    /// Pulls dropped because a fetch had just been issued.
    pub pulls_coalesced: u64,
    /// Fetches that returned a record or reported it absent.
    pub fetches_completed: u64,
    /// Fetches that failed or timed out.
    pub fetches_failed: u64,
    /// Pushes started.
    pub pushes_started: u64,
    /// Pushes the remote accepted.
    pub pushes_succeeded: u64,
    /// Pushes that failed or timed out.
    pub pushes_failed: u64,
    /// Cache writes completed.
    pub writes_completed: u64,
    /// Cache writes that failed.
    pub writes_failed: u64,
    /// Cache writes skipped because a newer archive was already on disk.
    pub writes_skipped: u64,
    /// The resolved remote identity, if any.
    pub identity: Option<RemoteIdentity>,
    /// Last boundary error message.
    pub last_error: Option<String>,
}

/// Requests raised outside the actor that carry no payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Signal {
    /// The remote changed, or a timer fired.
    Pull,
    /// A cache write with `push_after` completed.
    Push(Timestamp),
}

/// Inputs to the engine actor.
pub(crate) enum Event<P> {
    LocalMutated(Transform<P>),
    DiskLoaded(Option<Archive<P>>),
    RemoteFetched(Archive<P>),
    RemoteMissing,
    FetchFailed(SyncError),
    PullRequested,
    PushRequested,
    IdentityResolved(Option<RemoteIdentity>),
    Pushed {
        timestamp: Timestamp,
        result: GatewayResult<()>,
    },
    Subscribe {
        id: SubscriberId,
        sender: mpsc::UnboundedSender<Archive<P>>,
    },
    Unsubscribe(SubscriberId),
    Current(oneshot::Sender<Archive<P>>),
    Stats(oneshot::Sender<SyncStats>),
    Shutdown(oneshot::Sender<()>),
}

impl<P> From<Signal> for Event<P> {
    fn from(signal: Signal) -> Self {
        match signal {
            Signal::Pull => Event::PullRequested,
            Signal::Push(timestamp) => {
                trace!(timestamp = %timestamp, "push requested after cache write");
                Event::PushRequested
            }
        }
    }
}

/// The task that owns the archive.
pub(crate) struct EngineActor<P: Payload, G: RemoteGateway> {
    config: SyncConfig,
    gateway: Arc<G>,
    clock: Arc<dyn Clock>,
    persistence: Persistence<P>,
    registry: SubscriberRegistry<P>,

    current: Archive<P>,
    // False until the first candidate is accepted.
    seeded: bool,
    // Newest timestamp observed on the remote; cleared when the record is missing.
    remote_best: Option<Timestamp>,
    push_in_flight: Option<Timestamp>,
    identity: Option<RemoteIdentity>,
    resolving: bool,
    pull_pending: bool,
    push_pending: bool,
    last_fetch: Option<Instant>,
    stopping: Option<oneshot::Sender<()>>,
    stats: SyncStats,

    commands: mpsc::UnboundedReceiver<Event<P>>,
    internal_tx: mpsc::UnboundedSender<Event<P>>,
    internal_rx: mpsc::UnboundedReceiver<Event<P>>,
    signal_tx: mpsc::UnboundedSender<Signal>,
    signal_rx: mpsc::UnboundedReceiver<Signal>,
}

impl<P: Payload, G: RemoteGateway> EngineActor<P, G> {
    pub(crate) fn new(
        config: SyncConfig,
        gateway: G,
        clock: Arc<dyn Clock>,
        store: Arc<dyn ArchiveStore>,
        commands: mpsc::UnboundedReceiver<Event<P>>,
    ) -> Self {
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let persistence = Persistence::new(store, config.debounce, signal_tx.clone());

        Self {
            config,
            gateway: Arc::new(gateway),
            clock,
            persistence,
            registry: SubscriberRegistry::new(),
            current: Archive::default(),
            seeded: false,
            remote_best: None,
            push_in_flight: None,
            identity: None,
            resolving: false,
            pull_pending: false,
            push_pending: false,
            last_fetch: None,
            stopping: None,
            stats: SyncStats::default(),
            commands,
            internal_tx,
            internal_rx,
            signal_tx,
            signal_rx,
        }
    }

    /// Runs the actor until shutdown or until every handle is dropped.
    pub(crate) async fn run(mut self) {
        let restored = self.persistence.load().await;
        self.handle(Event::DiskLoaded(restored));
        if self.config.pull_on_start {
            self.handle(Event::PullRequested);
        }

        let mut ticker = self.config.pull_interval.and_then(pull_ticker);
        loop {
            tokio::select! {
                event = self.commands.recv() => match event {
                    Some(event) => self.handle(event),
                    None => break,
                },
                Some(event) = self.internal_rx.recv() => self.handle(event),
                Some(signal) = self.signal_rx.recv() => self.handle(signal.into()),
                () = next_tick(&mut ticker) => self.handle(Event::PullRequested),
            }
            if self.stopping.is_some() {
                break;
            }
        }

        if self.persistence.flush().await {
            debug!("pending cache write flushed on shutdown");
        }
        // Queues close before the acknowledgement is sent.
        let stopping = self.stopping.take();
        drop(self);
        debug!("sync engine stopped");
        if let Some(done) = stopping {
            let _ = done.send(());
        }
    }

    fn handle(&mut self, event: Event<P>) {
        match event {
            Event::LocalMutated(transform) => self.on_local_mutation(transform),
            Event::DiskLoaded(archive) => {
                self.on_candidate(archive, Origin::Disk);
            }
            Event::RemoteFetched(archive) => self.on_remote_fetched(archive),
            Event::RemoteMissing => self.on_remote_missing(),
            Event::FetchFailed(error) => {
                warn!(error = %error, "fetch failed");
                self.stats.fetches_failed += 1;
                self.stats.last_error = Some(error.to_string());
            }
            Event::PullRequested => self.on_pull(),
            Event::PushRequested => self.push_if_newer(),
            Event::IdentityResolved(identity) => self.on_identity(identity),
            Event::Pushed { timestamp, result } => self.on_pushed(timestamp, result),
            Event::Subscribe { id, sender } => {
                if self.registry.register(id, sender, &self.current) {
                    trace!(subscriber = %id, "subscriber registered");
                }
            }
            Event::Unsubscribe(id) => {
                if self.registry.remove(id) {
                    trace!(subscriber = %id, "subscriber removed");
                }
            }
            Event::Current(reply) => {
                let _ = reply.send(self.current.clone());
            }
            Event::Stats(reply) => {
                let _ = reply.send(self.snapshot_stats());
            }
            Event::Shutdown(done) => self.stopping = Some(done),
        }
    }

    /// Resolves a candidate and applies the consequences of accepting it.
    fn on_candidate(&mut self, candidate: Option<Archive<P>>, origin: Origin) -> bool {
        let Some(candidate) = candidate else {
            return false;
        };

        let current = self.seeded.then_some(&self.current);
        if resolve(current, &candidate) == Resolution::Stale {
            self.stats.candidates_dropped += 1;
            debug!(
                origin = %origin,
                timestamp = %candidate.timestamp(),
                current = %self.current.timestamp(),
                "candidate dropped as not newer"
            );
            return false;
        }

        debug!(origin = %origin, timestamp = %candidate.timestamp(), "candidate accepted");
        self.current = candidate;
        self.seeded = true;
        self.stats.candidates_accepted += 1;

        let delivered = self.registry.deliver(&self.current);
        self.stats.deliveries += delivered as u64;

        match origin {
            Origin::Local => self.persistence.schedule_write(self.current.clone(), true),
            Origin::Remote => self.persistence.schedule_write(self.current.clone(), false),
            Origin::Disk => {}
        }
        true
    }

    fn on_local_mutation(&mut self, transform: Transform<P>) {
        let mut payload = self.current.payload().clone();
        let deferred = transform(&mut payload);

        if payload == *self.current.payload() {
            trace!("mutation left the payload unchanged");
        } else {
            let candidate = Archive::new(payload, self.clock.now());
            self.on_candidate(Some(candidate), Origin::Local);
        }

        if let Some(deferred) = deferred {
            deferred();
        }
    }

    fn on_remote_fetched(&mut self, archive: Archive<P>) {
        self.stats.fetches_completed += 1;
        let remote = archive.timestamp();
        self.remote_best = self.remote_best.max(Some(remote));

        if !self.on_candidate(Some(archive), Origin::Remote)
            && self.seeded
            && self.current.timestamp() > remote
        {
            debug!(
                remote = %remote,
                local = %self.current.timestamp(),
                "remote is behind, pushing local archive"
            );
            self.push_if_newer();
        }
    }

    fn on_remote_missing(&mut self) {
        self.stats.fetches_completed += 1;
        self.remote_best = None;
        if self.seeded {
            debug!("no remote record, pushing local archive");
            self.push_if_newer();
        }
    }

    fn on_pull(&mut self) {
        self.stats.pulls_requested += 1;
        match self.identity.clone() {
            Some(identity) => self.fetch(identity),
            None => {
                if self.resolving {
                    self.stats.pulls_coalesced += 1;
                }
                self.pull_pending = true;
                self.resolve_identity();
            }
        }
    }

    fn fetch(&mut self, identity: RemoteIdentity) {
        let now = Instant::now();
        if let Some(last) = self.last_fetch {
            if now.duration_since(last) < self.config.pull_coalesce_window {
                self.stats.pulls_coalesced += 1;
                trace!("pull coalesced with a recent fetch");
                return;
            }
        }
        self.last_fetch = Some(now);

        let gateway = Arc::clone(&self.gateway);
        let events = self.internal_tx.clone();
        let limit = self.config.remote_timeout;
        trace!(identity = %identity, "fetching remote archive");
        tokio::spawn(async move {
            let event = match tokio::time::timeout(limit, gateway.fetch(&identity)).await {
                Ok(Ok(Some(blob))) => match Archive::from_blob(&blob) {
                    Ok(archive) => Event::RemoteFetched(archive),
                    Err(e) => Event::FetchFailed(e.into()),
                },
                Ok(Ok(None)) => Event::RemoteMissing,
                Ok(Err(e)) => Event::FetchFailed(e),
                Err(_) => Event::FetchFailed(SyncError::RemoteTimeout),
            };
            let _ = events.send(event);
        });
    }

    fn resolve_identity(&mut self) {
        if self.resolving || self.identity.is_some() {
            return;
        }
        self.resolving = true;

        let gateway = Arc::clone(&self.gateway);
        let events = self.internal_tx.clone();
        let limit = self.config.identity_timeout;
        tokio::spawn(async move {
            let identity = match tokio::time::timeout(limit, gateway.resolve_identity()).await {
                Ok(identity) => identity,
                Err(_) => {
                    warn!("remote identity resolution timed out");
                    None
                }
            };
            let _ = events.send(Event::IdentityResolved(identity));
        });
    }

    fn on_identity(&mut self, identity: Option<RemoteIdentity>) {
        self.resolving = false;
        let Some(identity) = identity else {
            debug!("remote identity unavailable");
            self.pull_pending = false;
            self.stats.last_error = Some(SyncError::IdentityUnavailable.to_string());
            return;
        };

        info!(identity = %identity, "remote identity resolved");
        self.identity = Some(identity.clone());
        self.stats.identity = Some(identity.clone());
        self.subscribe_to_changes(identity.clone());

        if std::mem::take(&mut self.pull_pending) {
            self.fetch(identity);
        }
        if std::mem::take(&mut self.push_pending) {
            self.push_if_newer();
        }
    }

    fn subscribe_to_changes(&self, identity: RemoteIdentity) {
        let gateway = Arc::clone(&self.gateway);
        let trigger = PullTrigger::new(self.signal_tx.clone());
        let limit = self.config.remote_timeout;
        tokio::spawn(async move {
            let subscribe = gateway.subscribe_to_changes(&identity, trigger);
            if tokio::time::timeout(limit, subscribe).await.is_err() {
                warn!(identity = %identity, "change subscription timed out");
            }
        });
    }

    /// Pushes the current archive unless the remote already has it.
    ///
    /// Pushes are serialized: while one is in flight a newer archive is
    /// remembered and pushed when it completes.
    fn push_if_newer(&mut self) {
        if !self.seeded {
            return;
        }
        let timestamp = self.current.timestamp();
        if self.remote_best.is_some_and(|remote| remote >= timestamp) {
            trace!(timestamp = %timestamp, "remote already up to date");
            return;
        }
        if let Some(in_flight) = self.push_in_flight {
            if in_flight < timestamp {
                self.push_pending = true;
            }
            return;
        }
        let Some(identity) = self.identity.clone() else {
            self.push_pending = true;
            self.resolve_identity();
            return;
        };

        let blob = match self.current.to_blob() {
            Ok(blob) => blob,
            Err(e) => {
                warn!(error = %e, "archive could not be encoded for push");
                self.stats.last_error = Some(e.to_string());
                return;
            }
        };

        self.push_in_flight = Some(timestamp);
        self.stats.pushes_started += 1;
        debug!(timestamp = %timestamp, "pushing archive");

        let gateway = Arc::clone(&self.gateway);
        let events = self.internal_tx.clone();
        let limit = self.config.remote_timeout;
        tokio::spawn(async move {
            let result = match tokio::time::timeout(limit, gateway.push(&identity, blob)).await {
                Ok(result) => result,
                Err(_) => Err(SyncError::RemoteTimeout),
            };
            let _ = events.send(Event::Pushed { timestamp, result });
        });
    }

    fn on_pushed(&mut self, timestamp: Timestamp, result: GatewayResult<()>) {
        self.push_in_flight = None;
        match result {
            Ok(()) => {
                debug!(timestamp = %timestamp, "archive pushed");
                self.stats.pushes_succeeded += 1;
                self.remote_best = self.remote_best.max(Some(timestamp));
            }
            Err(e) => {
                warn!(timestamp = %timestamp, error = %e, "push failed");
                self.stats.pushes_failed += 1;
                self.stats.last_error = Some(e.to_string());
            }
        }
        if std::mem::take(&mut self.push_pending) {
            self.push_if_newer();
        }
    }

    fn snapshot_stats(&self) -> SyncStats {
        let writes = self.persistence.counters();
        SyncStats {
            subscribers: self.registry.len(),
            writes_completed: writes.completed.load(Ordering::Relaxed),
            writes_failed: writes.failed.load(Ordering::Relaxed),
            writes_skipped: writes.skipped.load(Ordering::Relaxed),
            ..self.stats.clone()
        }
    }
}

fn pull_ticker(period: Duration) -> Option<Interval> {
    if period.is_zero() {
        return None;
    }
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    Some(interval)
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::ManualClock;
    use crate::gateway::MemoryGateway;
    use arcsync_storage::InMemoryStore;
    use proptest::prelude::*;

    fn archive(value: u32, millis: u64) -> Archive<u32> {
        Archive::new(value, Timestamp::from_millis(millis))
    }

    fn actor(gateway: MemoryGateway) -> EngineActor<u32, MemoryGateway> {
        let (_handle, commands) = mpsc::unbounded_channel();
        EngineActor::new(
            SyncConfig::new(),
            gateway,
            Arc::new(ManualClock::new(1)),
            Arc::new(InMemoryStore::new()),
            commands,
        )
    }

    #[tokio::test]
    async fn late_older_fetch_does_not_trigger_push() {
        let mut actor = actor(MemoryGateway::new("user"));
        actor.handle(Event::DiskLoaded(Some(archive(1, 50))));
        actor.handle(Event::IdentityResolved(Some(RemoteIdentity::new("user"))));

        actor.handle(Event::RemoteFetched(archive(3, 70)));
        assert_eq!(actor.current, archive(3, 70));

        actor.handle(Event::RemoteFetched(archive(8, 60)));
        assert_eq!(actor.current, archive(3, 70));
        assert_eq!(actor.snapshot_stats().pushes_started, 0);

        actor.handle(Event::RemoteMissing);
        assert_eq!(actor.snapshot_stats().pushes_started, 1);
    }

    #[test]
    fn unseeded_accepts_anything() {
        assert_eq!(resolve(None, &archive(1, 0)), Resolution::Accept);
        assert_eq!(resolve(None, &archive(1, 5)), Resolution::Accept);
    }

    #[test]
    fn strictly_newer_wins() {
        let current = archive(1, 10);
        assert_eq!(resolve(Some(&current), &archive(2, 11)), Resolution::Accept);
        assert_eq!(resolve(Some(&current), &archive(2, 9)), Resolution::Stale);
    }

    #[test]
    fn equal_timestamp_is_dropped_even_with_new_payload() {
        let current = archive(1, 10);
        assert_eq!(resolve(Some(&current), &archive(99, 10)), Resolution::Stale);
    }

    #[test]
    fn signals_map_to_events() {
        assert!(matches!(
            Event::<u32>::from(Signal::Pull),
            Event::PullRequested
        ));
        assert!(matches!(
            Event::<u32>::from(Signal::Push(Timestamp::from_millis(1))),
            Event::PushRequested
        ));
    }

    #[test]
    fn zero_pull_interval_disables_ticker() {
        assert!(pull_ticker(Duration::ZERO).is_none());
    }

    /// Folds candidates through `resolve` the way the actor does.
    fn converge(candidates: &[Archive<u32>]) -> Option<Archive<u32>> {
        let mut current: Option<Archive<u32>> = None;
        for candidate in candidates {
            if resolve(current.as_ref(), candidate) == Resolution::Accept {
                current = Some(candidate.clone());
            }
        }
        current
    }

    fn candidates() -> impl Strategy<Value = Vec<Archive<u32>>> {
        prop::collection::vec((any::<u32>(), 0u64..50), 1..24)
            .prop_map(|pairs| pairs.into_iter().map(|(v, t)| archive(v, t)).collect())
    }

    proptest! {
        #[test]
        fn final_archive_has_max_timestamp(candidates in candidates()) {
            let max = candidates.iter().map(Archive::timestamp).max();
            let result = converge(&candidates).map(|a| a.timestamp());
            prop_assert_eq!(result, max);
        }

        #[test]
        fn convergence_ignores_arrival_order(candidates in candidates(), seed in any::<u64>()) {
            let mut reordered = candidates.clone();
            let len = reordered.len();
            reordered.rotate_left((seed as usize) % len);
            prop_assert_eq!(
                converge(&candidates).map(|a| a.timestamp()),
                converge(&reordered).map(|a| a.timestamp())
            );
        }

        #[test]
        fn replaying_resolved_candidates_is_idempotent(candidates in candidates()) {
            let first = converge(&candidates);
            let mut replayed = candidates.clone();
            replayed.extend(candidates.iter().cloned());
            prop_assert_eq!(converge(&replayed), first);
        }
    }
}
