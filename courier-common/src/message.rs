//! The email document that travels from the send endpoint to the delivery
//! worker.
//!
//! Header names compare case-insensitively. The message is serializable so it
//! can be carried as a pub/sub payload, and renders to RFC 5322 text for the
//! SMTP `DATA` phase. Header values are kept as UTF-8 and only encoded as
//! RFC 2047 encoded words when rendered.

use std::{borrow::Cow, fmt::Write};

use base64::{Engine, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::address::{AddressError, AddressList};

pub const FROM: &str = "From";
pub const TO: &str = "To";
pub const CC: &str = "Cc";
pub const SUBJECT: &str = "Subject";
pub const MESSAGE_ID: &str = "Message-Id";
pub const DATE: &str = "Date";

/// Raw bytes per encoded word, keeping each word within 75 characters.
const ENCODED_WORD_BYTES: usize = 45;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MessageError {
    /// A header value would have broken the header block.
    #[error("Header {0} must not contain line breaks")]
    LineBreakInHeader(String),

    #[error("Invalid {header} header: {source}")]
    InvalidAddress {
        header: &'static str,
        #[source]
        source: AddressError,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub name: String,
    pub value: String,
}

impl Header {
    pub fn named(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }

    /// The value as written to the header block: address headers get their
    /// display names encoded, anything else is encoded whole.
    fn wire_value(&self) -> Cow<'_, str> {
        if self.value.is_ascii() {
            return Cow::Borrowed(&self.value);
        }

        if [FROM, TO, CC].into_iter().any(|name| self.named(name)) {
            return AddressList::parse(&self.value)
                .map_or(Cow::Borrowed(self.value.as_str()), |list| {
                    Cow::Owned(format!("{list:#}"))
                });
        }

        encode_text(&self.value)
    }
}

/// Encode header text as RFC 2047 `B` encoded words, unless it is plain ASCII.
#[must_use]
pub fn encode_text(text: &str) -> Cow<'_, str> {
    if text.is_ascii() {
        return Cow::Borrowed(text);
    }

    let mut encoded = String::with_capacity(text.len() * 2);
    let mut start = 0;
    for (index, ch) in text.char_indices() {
        if index + ch.len_utf8() - start > ENCODED_WORD_BYTES {
            push_encoded_word(&mut encoded, &text[start..index]);
            start = index;
        }
    }
    push_encoded_word(&mut encoded, &text[start..]);

    Cow::Owned(encoded)
}

fn push_encoded_word(out: &mut String, chunk: &str) {
    if !out.is_empty() {
        out.push(' ');
    }
    let _ = write!(out, "=?utf-8?b?{}?=", STANDARD.encode(chunk));
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    headers: Vec<Header>,
    body: String,
}

impl OutgoingMessage {
    #[must_use]
    pub fn builder() -> MessageBuilder {
        MessageBuilder::default()
    }

    pub fn headers(&self) -> &[Header] {
        &self.headers
    }

    /// The value of the first header called `name`.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|header| header.named(name))
            .map(|header| header.value.as_str())
    }

    /// Add a header after any existing ones, even if one with the same name exists.
    pub fn append_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.push(Header {
            name: name.into(),
            value: value.into(),
        });
    }

    /// Replace the value of the first header called `name`, keeping its
    /// position. Appends when there is no such header.
    pub fn replace_header(&mut self, name: &str, value: impl Into<String>) {
        match self.headers.iter_mut().find(|header| header.named(name)) {
            Some(header) => header.value = value.into(),
            None => self.append_header(name, value),
        }
    }

    /// Remove every header called `name`.
    pub fn remove_header(&mut self, name: &str) {
        self.headers.retain(|header| !header.named(name));
    }

    /// The message identifier without its angle brackets.
    ///
    /// A `Message-Id` header that is present but blank does not count: callers
    /// get `None` and treat the message as fire-and-forget.
    pub fn message_id(&self) -> Option<&str> {
        self.header(MESSAGE_ID)
            .map(|value| {
                let value = value.trim();
                value
                    .strip_prefix('<')
                    .and_then(|value| value.strip_suffix('>'))
                    .unwrap_or(value)
                    .trim()
            })
            .filter(|id| !id.is_empty())
    }

    pub fn subject(&self) -> Option<&str> {
        self.header(SUBJECT)
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    /// Parse the named address header.
    ///
    /// # Errors
    ///
    /// Returns [`MessageError::InvalidAddress`] if any entry is malformed.
    pub fn addresses(&self, header: &'static str) -> Result<Option<AddressList>, MessageError> {
        self.header(header)
            .map(|value| {
                AddressList::parse(value)
                    .map_err(|source| MessageError::InvalidAddress { header, source })
            })
            .transpose()
    }

    /// Render the message as RFC 5322 text with CRLF line endings.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::with_capacity(self.body.len() + 64 * self.headers.len());

        for header in &self.headers {
            let _ = write!(out, "{}: {}\r\n", header.name, header.wire_value());
        }
        out.push_str("\r\n");

        for line in self.body.lines() {
            out.push_str(line);
            out.push_str("\r\n");
        }

        out
    }
}

/// Builds an [`OutgoingMessage`] with the standard header set.
#[derive(Debug, Clone, Default)]
pub struct MessageBuilder {
    from: Option<String>,
    to: Vec<String>,
    cc: Vec<String>,
    subject: Option<String>,
    message_id: Option<String>,
    body: String,
}

impl MessageBuilder {
    #[must_use]
    pub fn from(mut self, from: impl Into<String>) -> Self {
        self.from = Some(from.into());
        self
    }

    #[must_use]
    pub fn to(mut self, to: impl Into<String>) -> Self {
        self.to.push(to.into());
        self
    }

    #[must_use]
    pub fn cc(mut self, cc: impl Into<String>) -> Self {
        self.cc.push(cc.into());
        self
    }

    #[must_use]
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Set the identifier; it is written as `<id>`.
    #[must_use]
    pub fn message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// # Errors
    ///
    /// Returns [`MessageError::LineBreakInHeader`] if any header value contains
    /// a CR or LF.
    pub fn build(self) -> Result<OutgoingMessage, MessageError> {
        let mut message = OutgoingMessage {
            headers: Vec::with_capacity(9),
            body: self.body,
        };

        let mut push = |name: &str, value: String| {
            if value.contains(['\r', '\n']) {
                return Err(MessageError::LineBreakInHeader(name.to_string()));
            }
            message.append_header(name, value);
            Ok(())
        };

        if let Some(from) = self.from {
            push(FROM, from)?;
        }
        if !self.to.is_empty() {
            push(TO, self.to.join(", "))?;
        }
        if !self.cc.is_empty() {
            push(CC, self.cc.join(", "))?;
        }
        if let Some(subject) = self.subject {
            push(SUBJECT, subject)?;
        }
        if let Some(id) = self.message_id {
            push(MESSAGE_ID, format!("<{id}>"))?;
        }
        push(DATE, chrono::Utc::now().to_rfc2822())?;
        push("MIME-Version", "1.0".to_string())?;
        push("Content-Type", "text/plain; charset=\"utf-8\"".to_string())?;
        push("Content-Transfer-Encoding", "8bit".to_string())?;

        Ok(message)
    }
}
