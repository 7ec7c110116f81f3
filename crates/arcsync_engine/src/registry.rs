//! Subscriber bookkeeping and fan-out.
//!
//! Every subscriber owns the receiving half of an unbounded channel; the
//! registry keeps the sending halves keyed by [`SubscriberId`]. A subscriber
//! that dropped or cancelled its [`Subscription`] is noticed on the next
//! delivery pass, when sending to it fails, and removed then.

use crate::archive::Archive;
use std::collections::BTreeMap;
use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_stream::Stream;

/// Stable handle for one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriberId(u64);

impl SubscriberId {
    pub(crate) fn new(id: u64) -> Self {
        Self(id)
    }

    /// Numeric value of the id.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// A stream of archive versions.
///
/// The first item is the archive current at the time the subscription was
/// registered; every later item is a newly accepted version, in order.
/// Nothing happens until the stream is polled, and it ends when the engine
/// stops.
///
/// Dropping the subscription releases it.
pub struct Subscription<P> {
    id: SubscriberId,
    receiver: mpsc::UnboundedReceiver<Archive<P>>,
}

impl<P> Subscription<P> {
    pub(crate) fn new(id: SubscriberId, receiver: mpsc::UnboundedReceiver<Archive<P>>) -> Self {
        Self { id, receiver }
    }

    /// This subscription's id.
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Waits for the next version. Returns `None` once the engine has
    /// stopped or the subscription was cancelled and drained.
    pub async fn recv(&mut self) -> Option<Archive<P>> {
        self.receiver.recv().await
    }

    /// Returns an already delivered version without waiting.
    pub fn try_recv(&mut self) -> Option<Archive<P>> {
        self.receiver.try_recv().ok()
    }

    /// Stops further deliveries. Versions already delivered can still be
    /// drained with [`recv`](Self::recv).
    pub fn cancel(&mut self) {
        self.receiver.close();
    }
}

impl<P> fmt::Debug for Subscription<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

impl<P> Stream for Subscription<P> {
    type Item = Archive<P>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

/// Live subscribers, owned by the engine task.
pub(crate) struct SubscriberRegistry<P> {
    subscribers: BTreeMap<SubscriberId, mpsc::UnboundedSender<Archive<P>>>,
}

impl<P: Clone> SubscriberRegistry<P> {
    pub(crate) fn new() -> Self {
        Self {
            subscribers: BTreeMap::new(),
        }
    }

    /// Adds a subscriber and replays `current` to it.
    ///
    /// Returns false if the subscriber was already gone.
    pub(crate) fn register(
        &mut self,
        id: SubscriberId,
        sender: mpsc::UnboundedSender<Archive<P>>,
        current: &Archive<P>,
    ) -> bool {
        if sender.send(current.clone()).is_err() {
            return false;
        }
        self.subscribers.insert(id, sender);
        true
    }

    /// Sends `archive` to every live subscriber, pruning dead ones.
    ///
    /// Returns the number of subscribers that received it.
    pub(crate) fn deliver(&mut self, archive: &Archive<P>) -> usize {
        self.subscribers
            .retain(|_, sender| sender.send(archive.clone()).is_ok());
        self.subscribers.len()
    }

    pub(crate) fn remove(&mut self, id: SubscriberId) -> bool {
        self.subscribers.remove(&id).is_some()
    }

    pub(crate) fn len(&self) -> usize {
        self.subscribers.len()
    }
}
