use serde::{Deserialize, Serialize};

pub const REASON_NO_RECIPIENTS: &str = "zero resolved recipients";
pub const REASON_REFUSED: &str = "recipients refused";
pub const REASON_ERROR: &str = "error";
pub const REASON_TIMEOUT: &str = "Timeout waiting for delivery notification";

/// The terminal result of one identified send attempt.
///
/// Serialized with absent optional fields omitted, so a success is just
/// `{"message_id": "...", "sent": true}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryOutcome {
    pub message_id: String,
    pub sent: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipients: Option<Vec<String>>,
}

impl DeliveryOutcome {
    #[must_use]
    pub fn sent(message_id: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            sent: true,
            reason: None,
            error: None,
            recipients: None,
        }
    }

    #[must_use]
    pub fn failed(message_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            sent: false,
            reason: Some(reason.into()),
            error: None,
            recipients: None,
        }
    }

    #[must_use]
    pub fn no_recipients(message_id: impl Into<String>) -> Self {
        Self::failed(message_id, REASON_NO_RECIPIENTS)
    }

    #[must_use]
    pub fn refused(message_id: impl Into<String>, recipients: Vec<String>) -> Self {
        Self {
            recipients: Some(recipients),
            ..Self::failed(message_id, REASON_REFUSED)
        }
    }

    #[must_use]
    pub fn error(message_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::failed(message_id, REASON_ERROR)
        }
    }

    #[must_use]
    pub fn timed_out(message_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::failed(message_id, REASON_TIMEOUT)
        }
    }
}
