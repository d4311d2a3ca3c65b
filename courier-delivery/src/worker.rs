//! The delivery worker.
//!
//! One long-lived task consumes `email/outgoing` in arrival order. At startup it
//! reads the SMTP server address from the settings store and connects; from
//! then on every message is resolved, sent, and answered with exactly one
//! [`DeliveryOutcome`] on `email/sent/<message_id>` when it carries a
//! `Message-Id`. If the server cannot be reached at startup the worker keeps
//! draining its channel, failing every message with the startup error.

use std::sync::Arc;

use courier_common::{
    Broker, ChannelName, DeliveryOutcome, Directory, OutgoingMessage, Payload, SettingsStore,
    Signal, Subscription,
    error::ConfigError,
    incoming, internal,
    message::{CC, TO},
    outgoing,
};
use courier_smtp::{SendError, Transport, TransportConnector};
use tokio::sync::{broadcast, mpsc};
use tracing::{Instrument, Span};

use crate::{
    error::{ConnectError, WorkerError},
    resolver::resolve_addresses,
};

pub const SMTP_HOST: &str = "smtp.address.host";
pub const SMTP_PORT: &str = "smtp.address.port";

/// Error text attached to messages still queued when the worker stops.
const SHUTTING_DOWN: &str = "Delivery worker is shutting down";

enum State {
    Serving(Box<dyn Transport>),
    Rejecting(String),
}

pub struct DeliveryWorker {
    broker: Broker,
    directory: Arc<dyn Directory>,
    settings: Arc<dyn SettingsStore>,
    connector: Arc<dyn TransportConnector>,
    inbound: mpsc::UnboundedReceiver<Payload>,
    subscription: Subscription,
    span: Span,
}

impl DeliveryWorker {
    /// Create the worker and subscribe it to `email/outgoing` straight away,
    /// so messages published before [`run`](Self::run) starts are queued
    /// rather than lost.
    pub fn new(
        broker: &Broker,
        directory: Arc<dyn Directory>,
        settings: Arc<dyn SettingsStore>,
        connector: Arc<dyn TransportConnector>,
    ) -> Self {
        let (subscription, inbound) = broker.subscribe_stream(ChannelName::outgoing());

        Self {
            broker: broker.clone(),
            directory,
            settings,
            connector,
            inbound,
            subscription,
            span: Span::current(),
        }
    }

    /// Record the worker's activity under `span` instead of the span current
    /// at construction.
    #[must_use]
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Serve until the inbound channel closes or `shutdown` fires.
    ///
    /// # Errors
    ///
    /// Returns a [`WorkerError`] when a message could not be processed for a
    /// reason other than the mail server refusing it. The outcome for that
    /// message has already been published.
    pub async fn run(self, shutdown: broadcast::Receiver<Signal>) -> Result<(), WorkerError> {
        let span = self.span.clone();
        self.serve(shutdown).instrument(span).await
    }

    async fn serve(mut self, mut shutdown: broadcast::Receiver<Signal>) -> Result<(), WorkerError> {
        internal!(level = INFO, "Delivery worker starting");

        let mut state = match self.connect().await {
            Ok(transport) => State::Serving(transport),
            Err(error) => {
                internal!(level = ERROR, %error, "Unable to reach mail server, rejecting all messages");
                State::Rejecting(error.to_string())
            }
        };

        let result = loop {
            let payload = tokio::select! {
                payload = self.inbound.recv() => payload,
                signal = shutdown.recv() => {
                    internal!(level = INFO, ?signal, "Delivery worker received shutdown signal");
                    break Ok(());
                }
            };

            let Some(payload) = payload else {
                break Ok(());
            };

            let Payload::Message(message) = payload else {
                internal!(level = WARN, "Ignoring non-message payload on {}", self.subscription.channel());
                continue;
            };

            match &mut state {
                State::Serving(transport) => {
                    if let Err(error) = self.handle(transport.as_mut(), message).await {
                        break Err(error);
                    }
                }
                State::Rejecting(reason) => {
                    if let Some(message_id) = message.message_id() {
                        report(&self.broker, DeliveryOutcome::failed(message_id, reason.as_str()));
                    }
                }
            }
        };

        self.finish(state).await;

        internal!(level = INFO, "Delivery worker stopped");
        result
    }

    /// Leave `email/outgoing`, fail whatever was queued before that, then
    /// close the connection.
    async fn finish(self, state: State) {
        let Self {
            broker,
            mut inbound,
            subscription,
            ..
        } = self;

        subscription.unsubscribe();

        // Ends once the broker and any in-flight publish drop their senders.
        while let Some(payload) = inbound.recv().await {
            if let Payload::Message(message) = payload
                && let Some(message_id) = message.message_id()
            {
                report(&broker, DeliveryOutcome::error(message_id, SHUTTING_DOWN));
            }
        }

        if let State::Serving(mut transport) = state {
            transport.close().await;
        }
    }

    async fn connect(&self) -> Result<Box<dyn Transport>, ConnectError> {
        let host = self.settings.string(SMTP_HOST).await?;
        let port = self.settings.integer(SMTP_PORT).await?;
        let port = u16::try_from(port)
            .ok()
            .filter(|port| *port != 0)
            .ok_or_else(|| ConfigError::Invalid {
                key: SMTP_PORT.to_string(),
                reason: format!("{port} is not a valid port"),
            })?;

        let transport = self
            .connector
            .connect(&host, port)
            .await
            .map_err(|source| ConnectError::Transport {
                server: format!("{host}:{port}"),
                source,
            })?;

        outgoing!(level = INFO, "Connected to {host}:{port}");
        Ok(transport)
    }

    /// Run the pipeline for one message and publish its outcome, including
    /// when the pipeline fails.
    async fn handle(
        &self,
        transport: &mut dyn Transport,
        message: OutgoingMessage,
    ) -> Result<(), WorkerError> {
        let message_id = message.message_id().map(str::to_string);

        match self.process(transport, message).await {
            Ok(outcome) => {
                if let Some(outcome) = outcome {
                    report(&self.broker, outcome);
                }
                Ok(())
            }
            Err(error) => {
                internal!(level = ERROR, ?message_id, %error, "Failed to process message");
                if let Some(message_id) = message_id {
                    report(&self.broker, DeliveryOutcome::error(message_id, error.to_string()));
                }
                Err(error)
            }
        }
    }

    /// Resolve and send one message. The returned outcome is `None` for
    /// messages without a `Message-Id`.
    async fn process(
        &self,
        transport: &mut dyn Transport,
        mut message: OutgoingMessage,
    ) -> Result<Option<DeliveryOutcome>, WorkerError> {
        let message_id = message.message_id().map(str::to_string);
        incoming!(
            level = INFO,
            ?message_id,
            subject = message.subject().unwrap_or_default(),
            "Processing message"
        );

        let to = resolve_addresses(self.directory.as_ref(), message.header(TO)).await?;
        let cc = resolve_addresses(self.directory.as_ref(), message.header(CC)).await?;

        if to.is_empty() && cc.is_empty() {
            internal!(level = INFO, ?message_id, "No recipients");
            return Ok(message_id.map(DeliveryOutcome::no_recipients));
        }

        for (header, resolved) in [(TO, to), (CC, cc)] {
            if resolved.is_empty() {
                message.remove_header(header);
            } else {
                internal!(level = INFO, ?message_id, "{header}: {resolved}");
                message.replace_header(header, resolved);
            }
        }

        let outcome = match transport.send(&message).await {
            Ok(()) => {
                outgoing!(level = INFO, ?message_id, "Sent");
                message_id.map(DeliveryOutcome::sent)
            }
            Err(SendError::RecipientsRefused { recipients }) => {
                outgoing!(
                    level = ERROR,
                    ?message_id,
                    "Recipients refused: {}",
                    recipients.join(", ")
                );
                message_id.map(|id| DeliveryOutcome::refused(id, recipients))
            }
            Err(error) => {
                outgoing!(level = ERROR, ?message_id, %error, "Failed to send message");
                message_id.map(|id| DeliveryOutcome::error(id, error.to_string()))
            }
        };

        Ok(outcome)
    }
}

fn report(broker: &Broker, outcome: DeliveryOutcome) {
    let channel = ChannelName::delivery(&outcome.message_id);
    let sent = outcome.sent;
    let receivers = broker.publish(&channel, Payload::Outcome(outcome));

    outgoing!(level = DEBUG, %channel, sent, receivers, "Published delivery outcome");
}
