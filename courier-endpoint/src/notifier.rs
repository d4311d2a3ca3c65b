//! One-shot correlation between a send request and its delivery outcome.

use std::{sync::Arc, time::Duration};

use courier_common::{
    Broker, ChannelName, DeliveryOutcome, Payload, Subscription, internal,
    pubsub::MessageCallback,
};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::oneshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("No delivery notification within {0:?}")]
pub struct DeliveryTimeout(pub Duration);

/// Write side, installed as the subscription callback. Only the first outcome
/// gets through.
struct Resolve(Mutex<Option<oneshot::Sender<DeliveryOutcome>>>);

impl MessageCallback for Resolve {
    fn deliver(&self, channel: &ChannelName, payload: Payload) {
        let Payload::Outcome(outcome) = payload else {
            internal!(level = WARN, %channel, "Ignoring non-outcome payload");
            return;
        };

        match self.0.lock().take() {
            Some(sender) => {
                if sender.send(outcome).is_err() {
                    internal!(level = DEBUG, %channel, "Outcome arrived after the waiter left");
                }
            }
            None => internal!(level = DEBUG, %channel, "Ignoring repeated outcome"),
        }
    }
}

/// Waits for the outcome published on `email/sent/<message_id>`.
///
/// The subscription is taken when the notifier is armed, so it must be armed
/// before the message is published.
pub struct CorrelationNotifier {
    subscription: Subscription,
    receiver: oneshot::Receiver<DeliveryOutcome>,
    outcome: Option<DeliveryOutcome>,
}

impl CorrelationNotifier {
    #[must_use]
    pub fn arm(broker: &Broker, message_id: &str) -> Self {
        let (sender, receiver) = oneshot::channel();
        let subscription = broker.subscribe(
            ChannelName::delivery(message_id),
            Arc::new(Resolve(Mutex::new(Some(sender)))),
        );

        Self {
            subscription,
            receiver,
            outcome: None,
        }
    }

    #[must_use]
    pub const fn channel(&self) -> &ChannelName {
        self.subscription.channel()
    }

    /// The outcome, if it has already arrived.
    pub fn outcome(&mut self) -> Option<&DeliveryOutcome> {
        if self.outcome.is_none() {
            self.outcome = self.receiver.try_recv().ok();
        }
        self.outcome.as_ref()
    }

    /// Wait at most `timeout` for the outcome.
    ///
    /// # Errors
    ///
    /// [`DeliveryTimeout`] if nothing arrives in time.
    pub async fn wait(&mut self, timeout: Duration) -> Result<DeliveryOutcome, DeliveryTimeout> {
        if let Some(outcome) = self.outcome() {
            return Ok(outcome.clone());
        }

        match tokio::time::timeout(timeout, &mut self.receiver).await {
            Ok(Ok(outcome)) => {
                self.outcome = Some(outcome.clone());
                Ok(outcome)
            }
            // The sender lives in the subscription we hold, so it cannot be
            // dropped while we wait. Treat it like silence if it ever is.
            Ok(Err(_)) | Err(_) => Err(DeliveryTimeout(timeout)),
        }
    }

    pub fn unsubscribe(self) {
        self.subscription.unsubscribe();
    }
}
