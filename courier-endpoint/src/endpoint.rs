//! The send-email operation.
//!
//! A request names one recipient and a subject; its text becomes the message
//! body. The message is published on `email/outgoing` for the delivery worker.
//! When the request carries a `message_id`, the endpoint waits (bounded) for
//! the worker's outcome and returns it; otherwise it returns straight away.

use std::time::Duration;

use axum::http::Method;
use courier_common::{
    Broker, ChannelName, DeliveryOutcome, OutgoingMessage, Payload, SettingValue, SettingsStore,
    error::ConfigError, incoming, internal, outgoing,
};
use serde_json::{Map, Value};
use tracing::{Instrument, Span};

use crate::{auth::Caller, error::EndpointError, notifier::CorrelationNotifier};

pub const SYSTEM_EMAIL: &str = "system.email";
pub const SYSTEM_HOSTNAME: &str = "system.hostname";

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct SendRequest {
    pub method: Method,
    /// The body parsed as JSON, or `None` if it is not JSON.
    pub payload: Option<Value>,
    /// The body as text, used as the message content.
    pub text: String,
    pub caller: Caller,
}

impl SendRequest {
    /// Build a request from a raw body, which serves as both the JSON payload
    /// and the message text.
    #[must_use]
    pub fn from_body(method: Method, body: String, caller: Caller) -> Self {
        Self {
            method,
            payload: serde_json::from_str(&body).ok(),
            text: body,
            caller,
        }
    }
}

struct Validated {
    recipient: String,
    subject: String,
    message_id: Option<String>,
}

pub struct SendEndpoint {
    broker: Broker,
    sender: String,
    timeout: Duration,
    span: Span,
}

impl SendEndpoint {
    /// Work out the sender address: `system.email` when it is set and not
    /// empty, otherwise `courier@<system.hostname>`.
    ///
    /// # Errors
    ///
    /// [`EndpointError::Config`] if neither setting yields an address.
    pub async fn new(broker: Broker, settings: &dyn SettingsStore) -> Result<Self, EndpointError> {
        let sender = match settings.get(SYSTEM_EMAIL).await {
            Some(SettingValue::String(email)) if !email.is_empty() => email,
            Some(SettingValue::String(_)) | None => {
                format!("courier@{}", settings.string(SYSTEM_HOSTNAME).await?)
            }
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: SYSTEM_EMAIL.to_string(),
                    reason: format!("expected a string, got {other}"),
                }
                .into());
            }
        };

        Ok(Self {
            broker,
            sender,
            timeout: DEFAULT_TIMEOUT,
            span: Span::current(),
        })
    }

    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    #[must_use]
    pub fn sender(&self) -> &str {
        &self.sender
    }

    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Queue an email and, for requests with a `message_id`, wait for the
    /// delivery outcome. `Ok(None)` means the message was queued and no
    /// outcome was asked for.
    ///
    /// # Errors
    ///
    /// [`EndpointError::BadRequest`] for malformed requests and
    /// [`EndpointError::PermissionDenied`] for callers that are not
    /// administrators. Nothing is published in either case.
    pub async fn send_email(
        &self,
        request: SendRequest,
    ) -> Result<Option<DeliveryOutcome>, EndpointError> {
        self.handle(request).instrument(self.span.clone()).await
    }

    async fn handle(&self, request: SendRequest) -> Result<Option<DeliveryOutcome>, EndpointError> {
        let Validated {
            recipient,
            subject,
            message_id,
        } = validate(&request)?;

        if !request.caller.is_administrator() {
            incoming!(level = WARN, "Rejected send request from non-administrator");
            return Err(EndpointError::PermissionDenied(
                "Administrator privileges required".to_string(),
            ));
        }

        let mut builder = OutgoingMessage::builder()
            .from(self.sender.as_str())
            .to(recipient)
            .subject(subject)
            .body(request.text);
        if let Some(message_id) = &message_id {
            builder = builder.message_id(message_id.as_str());
        }
        let message = builder
            .build()
            .map_err(|error| EndpointError::BadRequest(error.to_string()))?;

        let notifier = message_id
            .as_deref()
            .map(|message_id| CorrelationNotifier::arm(&self.broker, message_id));

        let mut transaction = self.broker.transaction();
        transaction.publish(ChannelName::outgoing(), Payload::Message(message));
        let receivers = transaction.commit();
        outgoing!(level = DEBUG, ?message_id, receivers, "Queued message");

        if receivers == 0 {
            internal!(level = WARN, ?message_id, "No delivery worker is listening");
        }

        let (Some(notifier), Some(message_id)) = (notifier, message_id) else {
            return Ok(None);
        };

        let outcome = self.await_outcome(notifier, message_id).await;
        Ok(Some(outcome))
    }

    async fn await_outcome(
        &self,
        mut notifier: CorrelationNotifier,
        message_id: String,
    ) -> DeliveryOutcome {
        let outcome = match notifier.wait(self.timeout).await {
            Ok(outcome) => outcome,
            Err(timeout) => {
                internal!(level = WARN, %message_id, %timeout, "Timed out waiting for delivery");
                DeliveryOutcome::timed_out(message_id, timeout.to_string())
            }
        };
        notifier.unsubscribe();

        incoming!(level = DEBUG, message_id = %outcome.message_id, sent = outcome.sent, "Delivery outcome");
        outcome
    }
}

fn validate(request: &SendRequest) -> Result<Validated, EndpointError> {
    if request.method != Method::POST {
        return Err(EndpointError::BadRequest("Expected method: POST".to_string()));
    }

    let payload = match &request.payload {
        Some(Value::Object(payload)) => payload,
        Some(other) => {
            return Err(EndpointError::BadRequest(format!(
                "Invalid payload: must be object (got: {other})"
            )));
        }
        None => {
            return Err(EndpointError::BadRequest(
                "Invalid payload: must be JSON".to_string(),
            ));
        }
    };

    let recipient = required_string(payload, "recipient")?;
    let subject = required_string(payload, "subject")?;
    let message_id = match payload.get("message_id") {
        None | Some(Value::Null) => None,
        // A blank id would never be reported on, so don't wait for it.
        Some(Value::String(message_id)) if message_id.trim().is_empty() => None,
        Some(Value::String(message_id)) => Some(message_id.trim().to_string()),
        Some(other) => return Err(not_a_string("message_id", other)),
    };

    Ok(Validated {
        recipient,
        subject,
        message_id,
    })
}

fn required_string(payload: &Map<String, Value>, field: &str) -> Result<String, EndpointError> {
    match payload.get(field) {
        Some(Value::String(value)) => Ok(value.clone()),
        other => Err(not_a_string(field, other.unwrap_or(&Value::Null))),
    }
}

fn not_a_string(field: &str, value: &Value) -> EndpointError {
    EndpointError::BadRequest(format!(
        "Invalid payload['{field}']: must be string (got: {value})"
    ))
}
