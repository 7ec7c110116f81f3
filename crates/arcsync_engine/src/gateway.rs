//! Remote gateway abstraction.
//!
//! The engine talks to the remote mirror only through [`RemoteGateway`]:
//! resolve who the user is, fetch the one record, push the one record and
//! ask to be told when it changes. Every call is bounded by a timeout on the
//! engine side, so implementations may simply await their backend.

use crate::archive::{Archive, Payload};
use crate::error::{GatewayResult, SyncError};
use crate::state::Signal;
use arcsync_codec::CodecResult;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Opaque key locating the user's single remote record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemoteIdentity(String);

impl RemoteIdentity {
    /// Creates an identity from its string form.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identity as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RemoteIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RemoteIdentity {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for RemoteIdentity {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Handle a gateway uses to ask the engine for a pull.
///
/// Handed to [`RemoteGateway::subscribe_to_changes`]; call [`pull`](Self::pull)
/// whenever the remote reports that the record changed.
#[derive(Debug, Clone)]
pub struct PullTrigger {
    signals: mpsc::UnboundedSender<Signal>,
}

impl PullTrigger {
    pub(crate) fn new(signals: mpsc::UnboundedSender<Signal>) -> Self {
        Self { signals }
    }

    /// Requests a pull. Returns false once the engine has stopped.
    pub fn pull(&self) -> bool {
        self.signals.send(Signal::Pull).is_ok()
    }

    /// Whether the engine behind this trigger is still running.
    pub fn is_connected(&self) -> bool {
        !self.signals.is_closed()
    }

    /// Whether both triggers reach the same engine.
    pub fn same_engine(&self, other: &PullTrigger) -> bool {
        self.signals.same_channel(&other.signals)
    }
}

/// Access to the remote mirror of the archive.
///
/// Implementations are shared with spawned tasks and must be
/// `Send + Sync + 'static`; every returned future must be `Send`.
///
/// Failures are reported as errors and never reach the merge: a failed fetch
/// produces no candidate and a failed push is retried by the next local
/// change.
pub trait RemoteGateway: Send + Sync + 'static {
    /// Resolves the identity of the remote record, or `None` when no
    /// account is available.
    fn resolve_identity(&self) -> impl Future<Output = Option<RemoteIdentity>> + Send;

    /// Fetches the record's blob. `Ok(None)` means the record does not
    /// exist yet.
    fn fetch(
        &self,
        identity: &RemoteIdentity,
    ) -> impl Future<Output = GatewayResult<Option<Vec<u8>>>> + Send;

    /// Replaces the record's blob.
    fn push(
        &self,
        identity: &RemoteIdentity,
        blob: Vec<u8>,
    ) -> impl Future<Output = GatewayResult<()>> + Send;

    /// Registers interest in remote changes. Best-effort and idempotent.
    fn subscribe_to_changes(
        &self,
        identity: &RemoteIdentity,
        trigger: PullTrigger,
    ) -> impl Future<Output = ()> + Send;
}

/// A gateway with no remote: identity never resolves.
///
/// Used by ephemeral engines, which only keep state in memory.
#[derive(Debug, Default, Clone, Copy)]
pub struct OfflineGateway;

impl RemoteGateway for OfflineGateway {
    async fn resolve_identity(&self) -> Option<RemoteIdentity> {
        None
    }

    async fn fetch(&self, _identity: &RemoteIdentity) -> GatewayResult<Option<Vec<u8>>> {
        Err(SyncError::IdentityUnavailable)
    }

    async fn push(&self, _identity: &RemoteIdentity, _blob: Vec<u8>) -> GatewayResult<()> {
        Err(SyncError::IdentityUnavailable)
    }

    async fn subscribe_to_changes(&self, _identity: &RemoteIdentity, _trigger: PullTrigger) {}
}

/// An in-process remote holding one record.
///
/// Clones share the same record, so a test can keep one clone to script
/// and inspect the remote while the engine owns another. Identity
/// availability, failures and latency can all be changed at runtime.
#[derive(Debug, Clone, Default)]
pub struct MemoryGateway {
    shared: Arc<MemoryRemote>,
}

#[derive(Debug, Default)]
struct MemoryRemote {
    identity: RwLock<Option<RemoteIdentity>>,
    record: RwLock<Option<Vec<u8>>>,
    failing: AtomicBool,
    latency: Mutex<Duration>,
    triggers: Mutex<HashMap<RemoteIdentity, Vec<PullTrigger>>>,
    resolves: AtomicUsize,
    fetches: AtomicUsize,
    pushes: AtomicUsize,
    subscriptions: AtomicUsize,
}

impl MemoryGateway {
    /// Creates a remote that resolves to `identity` and holds no record.
    pub fn new(identity: impl Into<RemoteIdentity>) -> Self {
        let gateway = Self::default();
        gateway.set_identity(Some(identity.into()));
        gateway
    }

    /// Creates a remote with no account: identity never resolves.
    pub fn signed_out() -> Self {
        Self::default()
    }

    /// Changes the identity the remote resolves to.
    pub fn set_identity(&self, identity: Option<RemoteIdentity>) {
        *self.shared.identity.write() = identity;
    }

    /// Returns a copy of the stored blob.
    pub fn record(&self) -> Option<Vec<u8>> {
        self.shared.record.read().clone()
    }

    /// Replaces the stored blob without going through an engine.
    pub fn set_record(&self, record: Option<Vec<u8>>) {
        *self.shared.record.write() = record;
    }

    /// Decodes the stored record, if any.
    pub fn archive<P: Payload>(&self) -> Option<Archive<P>> {
        let record = self.record()?;
        Archive::from_blob(&record).ok()
    }

    /// Stores an archive as if another device had pushed it.
    ///
    /// # Errors
    ///
    /// Returns an error if the archive cannot be compressed.
    pub fn store_archive<P: Payload>(&self, archive: &Archive<P>) -> CodecResult<()> {
        self.set_record(Some(archive.to_blob()?));
        Ok(())
    }

    /// Makes fetches and pushes fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.shared.failing.store(failing, Ordering::SeqCst);
    }

    /// Delays every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        *self.shared.latency.lock() = latency;
    }

    /// Fires every registered pull trigger, as a change notification would.
    /// Returns how many engines were notified.
    pub fn notify_change(&self) -> usize {
        let mut triggers = self.shared.triggers.lock();
        let mut notified = 0;
        triggers.retain(|_, engines| {
            engines.retain(PullTrigger::pull);
            notified += engines.len();
            !engines.is_empty()
        });
        notified
    }

    /// Number of identity resolutions served.
    pub fn resolve_count(&self) -> usize {
        self.shared.resolves.load(Ordering::SeqCst)
    }

    /// Number of fetches attempted.
    pub fn fetch_count(&self) -> usize {
        self.shared.fetches.load(Ordering::SeqCst)
    }

    /// Number of pushes attempted, including failed ones.
    pub fn push_count(&self) -> usize {
        self.shared.pushes.load(Ordering::SeqCst)
    }

    /// Number of change subscriptions received.
    pub fn subscription_count(&self) -> usize {
        self.shared.subscriptions.load(Ordering::SeqCst)
    }

    async fn simulate_latency(&self) {
        let latency = *self.shared.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    fn check_failing(&self) -> GatewayResult<()> {
        if self.shared.failing.load(Ordering::SeqCst) {
            return Err(SyncError::remote("memory remote is failing"));
        }
        Ok(())
    }
}

impl RemoteGateway for MemoryGateway {
    async fn resolve_identity(&self) -> Option<RemoteIdentity> {
        self.simulate_latency().await;
        self.shared.resolves.fetch_add(1, Ordering::SeqCst);
        self.shared.identity.read().clone()
    }

    async fn fetch(&self, _identity: &RemoteIdentity) -> GatewayResult<Option<Vec<u8>>> {
        self.simulate_latency().await;
        self.shared.fetches.fetch_add(1, Ordering::SeqCst);
        self.check_failing()?;
        Ok(self.record())
    }

    async fn push(&self, _identity: &RemoteIdentity, blob: Vec<u8>) -> GatewayResult<()> {
        self.simulate_latency().await;
        self.shared.pushes.fetch_add(1, Ordering::SeqCst);
        self.check_failing()?;
        self.set_record(Some(blob));
        Ok(())
    }

    async fn subscribe_to_changes(&self, identity: &RemoteIdentity, trigger: PullTrigger) {
        self.shared.subscriptions.fetch_add(1, Ordering::SeqCst);
        let mut triggers = self.shared.triggers.lock();
        let engines = triggers.entry(identity.clone()).or_default();
        if !engines.iter().any(|known| known.same_engine(&trigger)) {
            engines.push(trigger);
        }
    }
}
