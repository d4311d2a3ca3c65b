//! In-process publish/subscribe.
//!
//! Channels are plain names. Publishing hands the payload to every callback
//! currently subscribed to that exact channel; nothing is retained for
//! subscribers that arrive later, so anyone expecting a reply must subscribe
//! before the request that triggers it is published.

use std::{
    fmt::{self, Display},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use ahash::AHashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::{internal, message::OutgoingMessage, outcome::DeliveryOutcome, outgoing};

/// Channel carrying messages to the delivery worker.
pub const OUTGOING: &str = "email/outgoing";
/// Prefix of the per-message delivery outcome channels.
pub const SENT_PREFIX: &str = "email/sent/";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelName(String);

impl ChannelName {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    #[must_use]
    pub fn outgoing() -> Self {
        Self::new(OUTGOING)
    }

    /// The channel the outcome for `message_id` is published on.
    #[must_use]
    pub fn delivery(message_id: &str) -> Self {
        Self(format!("{SENT_PREFIX}{message_id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Payload {
    Message(OutgoingMessage),
    Outcome(DeliveryOutcome),
}

/// Receives payloads published on a subscribed channel.
///
/// Called synchronously from [`Broker::publish`], so implementations must not
/// block.
pub trait MessageCallback: Send + Sync {
    fn deliver(&self, channel: &ChannelName, payload: Payload);
}

/// Forwards every payload into a channel, for consumers that prefer a stream.
impl MessageCallback for mpsc::UnboundedSender<Payload> {
    fn deliver(&self, channel: &ChannelName, payload: Payload) {
        if self.send(payload).is_err() {
            internal!(level = DEBUG, %channel, "Subscriber receiver dropped, payload discarded");
        }
    }
}

type Subscribers = AHashMap<ChannelName, Vec<(u64, Arc<dyn MessageCallback>)>>;

#[derive(Default)]
struct Inner {
    next_id: AtomicU64,
    subscribers: RwLock<Subscribers>,
}

#[derive(Clone, Default)]
pub struct Broker {
    inner: Arc<Inner>,
}

impl fmt::Debug for Broker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Broker")
            .field("channels", &self.inner.subscribers.read().len())
            .finish_non_exhaustive()
    }
}

impl Broker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for `channel`. The subscription lasts until the
    /// returned handle is dropped or [`Subscription::unsubscribe`] is called.
    pub fn subscribe(
        &self,
        channel: ChannelName,
        callback: Arc<dyn MessageCallback>,
    ) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);

        self.inner
            .subscribers
            .write()
            .entry(channel.clone())
            .or_default()
            .push((id, callback));

        internal!(level = DEBUG, %channel, id, "Subscribed");

        Subscription {
            broker: self.clone(),
            channel,
            id,
            active: true,
        }
    }

    /// Subscribe with a stream of payloads instead of a callback.
    pub fn subscribe_stream(
        &self,
        channel: ChannelName,
    ) -> (Subscription, mpsc::UnboundedReceiver<Payload>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (self.subscribe(channel, Arc::new(sender)), receiver)
    }

    /// Deliver `payload` to every current subscriber of `channel`, returning
    /// how many were notified.
    pub fn publish(&self, channel: &ChannelName, payload: Payload) -> usize {
        // Callbacks run without the lock held, so they may (un)subscribe freely.
        let callbacks = self
            .inner
            .subscribers
            .read()
            .get(channel)
            .map(|subscribers| {
                subscribers
                    .iter()
                    .map(|(_, callback)| Arc::clone(callback))
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        outgoing!(level = DEBUG, %channel, subscribers = callbacks.len(), "Publishing");

        match callbacks.as_slice() {
            [] => {}
            [only] => only.deliver(channel, payload),
            many => {
                for callback in many {
                    callback.deliver(channel, payload.clone());
                }
            }
        }

        callbacks.len()
    }

    /// Start a batch of publishes that only take effect on [`Transaction::commit`].
    #[must_use]
    pub fn transaction(&self) -> Transaction {
        Transaction {
            broker: self.clone(),
            pending: Vec::new(),
        }
    }

    pub fn subscriber_count(&self, channel: &ChannelName) -> usize {
        self.inner
            .subscribers
            .read()
            .get(channel)
            .map_or(0, Vec::len)
    }

    fn unsubscribe(&self, channel: &ChannelName, id: u64) {
        let mut subscribers = self.inner.subscribers.write();
        if let Some(entries) = subscribers.get_mut(channel) {
            entries.retain(|(entry, _)| *entry != id);
            if entries.is_empty() {
                subscribers.remove(channel);
            }
        }

        internal!(level = DEBUG, %channel, id, "Unsubscribed");
    }
}

/// Handle for one registration on a channel.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    broker: Broker,
    channel: ChannelName,
    id: u64,
    active: bool,
}

impl Subscription {
    pub const fn channel(&self) -> &ChannelName {
        &self.channel
    }

    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if std::mem::take(&mut self.active) {
            self.broker.unsubscribe(&self.channel, self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("channel", &self.channel)
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// Publishes buffered until commit. Dropping an uncommitted transaction
/// discards them.
#[must_use = "a transaction publishes nothing until committed"]
pub struct Transaction {
    broker: Broker,
    pending: Vec<(ChannelName, Payload)>,
}

impl Transaction {
    pub fn publish(&mut self, channel: ChannelName, payload: Payload) {
        self.pending.push((channel, payload));
    }

    /// Publish everything queued, in order. Returns the total number of
    /// subscriber notifications.
    pub fn commit(mut self) -> usize {
        std::mem::take(&mut self.pending)
            .into_iter()
            .map(|(channel, payload)| self.broker.publish(&channel, payload))
            .sum()
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.pending.is_empty() {
            internal!(
                level = WARN,
                discarded = self.pending.len(),
                "Transaction dropped without commit"
            );
        }
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    fn outcome(id: &str) -> Payload {
        Payload::Outcome(DeliveryOutcome::sent(id))
    }

    #[tokio::test]
    async fn publish_reaches_only_matching_channel() {
        let broker = Broker::new();
        let (_a, mut a) = broker.subscribe_stream(ChannelName::delivery("a"));
        let (_b, mut b) = broker.subscribe_stream(ChannelName::delivery("b"));

        assert_eq!(broker.publish(&ChannelName::delivery("a"), outcome("a")), 1);

        assert_eq!(a.recv().await, Some(outcome("a")));
        assert!(b.try_recv().is_err());
    }

    #[test]
    fn nothing_is_retained_for_late_subscribers() {
        let broker = Broker::new();
        assert_eq!(broker.publish(&ChannelName::delivery("x"), outcome("x")), 0);

        let (_subscription, mut receiver) = broker.subscribe_stream(ChannelName::delivery("x"));
        assert!(receiver.try_recv().is_err());
    }

    #[test]
    fn dropping_subscription_unsubscribes() {
        let broker = Broker::new();
        let channel = ChannelName::delivery("m1");

        let (subscription, _receiver) = broker.subscribe_stream(channel.clone());
        let (second, _other) = broker.subscribe_stream(channel.clone());
        assert_eq!(broker.subscriber_count(&channel), 2);

        drop(subscription);
        assert_eq!(broker.subscriber_count(&channel), 1);

        second.unsubscribe();
        assert_eq!(broker.subscriber_count(&channel), 0);
        assert_eq!(broker.publish(&channel, outcome("m1")), 0);
    }

    #[test]
    fn transaction_publishes_on_commit_only() {
        let broker = Broker::new();
        let (_subscription, mut receiver) = broker.subscribe_stream(ChannelName::outgoing());

        let mut transaction = broker.transaction();
        transaction.publish(ChannelName::outgoing(), outcome("1"));
        transaction.publish(ChannelName::outgoing(), outcome("2"));
        assert!(receiver.try_recv().is_err());

        assert_eq!(transaction.commit(), 2);
        assert_eq!(receiver.try_recv().ok(), Some(outcome("1")));
        assert_eq!(receiver.try_recv().ok(), Some(outcome("2")));

        let mut abandoned = broker.transaction();
        abandoned.publish(ChannelName::outgoing(), outcome("3"));
        drop(abandoned);
        assert!(receiver.try_recv().is_err());
    }

    #[test]
    fn payload_wire_shape() {
        let json = serde_json::to_value(outcome("m1")).unwrap();
        assert_eq!(json["type"], "outcome");
        assert_eq!(json["payload"]["message_id"], "m1");
    }
}
