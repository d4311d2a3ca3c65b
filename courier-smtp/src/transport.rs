//! The transport the delivery worker drives.
//!
//! [`SmtpTransport`] keeps a single SMTP session open across messages and runs
//! one `MAIL`/`RCPT`/`DATA` transaction per [`Transport::send`]. A session the
//! server closed while idle is replaced when the next transaction starts; one
//! lost mid-transaction fails that send, and the following send reconnects.

use async_trait::async_trait;
use courier_common::{
    OutgoingMessage, internal,
    message::{CC, FROM, TO},
    outgoing,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::client::{ClientError, Response, SmtpClient};

#[derive(Debug, Error)]
pub enum SendError {
    /// The server refused every recipient, so nothing was sent.
    #[error("All recipients were refused: {}", recipients.join(", "))]
    RecipientsRefused { recipients: Vec<String> },

    #[error(transparent)]
    Transport(#[from] ClientError),

    /// The message could not be turned into an SMTP envelope.
    #[error("Invalid message: {0}")]
    InvalidMessage(String),
}

#[async_trait]
pub trait Transport: Send {
    /// Deliver `message` to the addresses in its `To` and `Cc` headers.
    ///
    /// Recipients the server refuses are skipped as long as at least one is
    /// accepted.
    async fn send(&mut self, message: &OutgoingMessage) -> Result<(), SendError>;

    /// End the session politely. Errors are ignored.
    async fn close(&mut self);
}

#[async_trait]
pub trait TransportConnector: Send + Sync {
    async fn connect(&self, host: &str, port: u16) -> Result<Box<dyn Transport>, ClientError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TlsPolicy {
    /// Upgrade when the server advertises STARTTLS, otherwise stay in plain text.
    #[default]
    Opportunistic,
    /// Refuse to send unless the session is upgraded.
    Required,
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmtpConfig {
    #[serde(default = "default_helo_name")]
    pub helo_name: String,
    #[serde(default)]
    pub tls: TlsPolicy,
}

fn default_helo_name() -> String {
    String::from("localhost")
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            helo_name: default_helo_name(),
            tls: TlsPolicy::default(),
        }
    }
}

/// Sender and recipients taken from the message headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub sender: String,
    pub recipients: Vec<String>,
}

impl Envelope {
    /// # Errors
    ///
    /// [`SendError::InvalidMessage`] if `From` is missing or unusable, an
    /// address header does not parse, or there are no literal recipients.
    pub fn from_message(message: &OutgoingMessage) -> Result<Self, SendError> {
        let invalid = |e: courier_common::message::MessageError| SendError::InvalidMessage(e.to_string());

        let sender = message
            .addresses(FROM)
            .map_err(invalid)?
            .and_then(|from| from.mailboxes().next().map(ToString::to_string))
            .ok_or_else(|| SendError::InvalidMessage(String::from("No sender address in From")))?;

        let mut recipients = Vec::new();
        for header in [TO, CC] {
            if let Some(list) = message.addresses(header).map_err(invalid)? {
                recipients.extend(list.mailboxes().map(ToString::to_string));
            }
        }

        if recipients.is_empty() {
            return Err(SendError::InvalidMessage(String::from(
                "No recipient addresses in To or Cc",
            )));
        }

        Ok(Self { sender, recipients })
    }
}

pub struct SmtpTransport {
    host: String,
    port: u16,
    config: SmtpConfig,
    client: Option<SmtpClient>,
}

impl SmtpTransport {
    /// Open a session with `host:port`: greeting, EHLO (HELO fallback) and
    /// STARTTLS according to the configured [`TlsPolicy`].
    ///
    /// # Errors
    ///
    /// Returns a [`ClientError`] if the session cannot be established.
    pub async fn connect(host: &str, port: u16, config: SmtpConfig) -> Result<Self, ClientError> {
        let mut transport = Self {
            host: host.to_string(),
            port,
            config,
            client: None,
        };
        transport.client = Some(transport.open().await?);

        Ok(transport)
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    fn server(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    async fn open(&self) -> Result<SmtpClient, ClientError> {
        match self.handshake(self.config.tls != TlsPolicy::Disabled).await {
            Err(ClientError::TlsError(error)) if self.config.tls == TlsPolicy::Opportunistic => {
                internal!(
                    level = INFO,
                    server = %self.server(),
                    %error,
                    "STARTTLS failed, reconnecting without TLS"
                );
                self.handshake(false).await
            }
            other => other,
        }
    }

    /// Start a transaction with `MAIL FROM`, on the existing session when it is
    /// still alive and on a new one otherwise.
    async fn begin(&mut self, sender: &str) -> Result<(SmtpClient, Response), ClientError> {
        if let Some(mut client) = self.client.take() {
            match client.mail_from(sender).await {
                Err(error) if error.is_connection_lost() => {
                    internal!(level = INFO, server = %self.server(), %error, "Session went away, reconnecting");
                }
                other => return other.map(|response| (client, response)),
            }
        }

        let mut client = self.open().await?;
        let response = client.mail_from(sender).await?;

        Ok((client, response))
    }

    async fn handshake(&self, try_tls: bool) -> Result<SmtpClient, ClientError> {
        let server = self.server();
        outgoing!(level = DEBUG, %server, "Connecting");

        let mut client = SmtpClient::connect(&server, self.host.clone()).await?;
        client.read_greeting().await?.into_success()?;

        let mut greeting = client.ehlo(&self.config.helo_name).await?;
        if !greeting.is_success() {
            client.helo(&self.config.helo_name).await?.into_success()?;
            greeting.lines.clear();
        }

        let advertised = greeting.supports("STARTTLS");
        if self.config.tls == TlsPolicy::Required && !advertised {
            return Err(ClientError::TlsError(format!(
                "{server} does not advertise STARTTLS"
            )));
        }

        if try_tls && advertised {
            let response = client.starttls().await?;
            if response.is_success() {
                client.ehlo(&self.config.helo_name).await?.into_success()?;
                internal!(level = DEBUG, %server, "Session upgraded to TLS");
            } else if self.config.tls == TlsPolicy::Required {
                return Err(ClientError::TlsError(format!(
                    "{server} rejected STARTTLS: {}",
                    response.message()
                )));
            } else {
                internal!(
                    level = INFO,
                    %server,
                    response = %response.message(),
                    "STARTTLS rejected, continuing without TLS"
                );
            }
        }

        Ok(client)
    }
}

/// Finish a mail transaction whose `MAIL FROM` has been answered with
/// `mail_from`.
async fn transact(
    client: &mut SmtpClient,
    mail_from: Response,
    envelope: &Envelope,
    content: &str,
) -> Result<(), SendError> {
    if !mail_from.is_success() {
        reset(client).await;
        return Err(mail_from.into_error().into());
    }

    let mut refused = Vec::new();
    for recipient in &envelope.recipients {
        let response = client.rcpt_to(recipient).await?;
        if !response.is_success() {
            internal!(
                level = WARN,
                %recipient,
                code = response.code,
                response = %response.message(),
                "Recipient refused"
            );
            refused.push(recipient.clone());
        }
    }

    if refused.len() == envelope.recipients.len() {
        reset(client).await;
        return Err(SendError::RecipientsRefused {
            recipients: refused,
        });
    }

    let response = client.data().await?;
    if !response.is_intermediate() {
        reset(client).await;
        return Err(response.into_error().into());
    }

    client.send_data(content).await?.into_success()?;

    Ok(())
}

/// Abandon the current transaction so the session can be reused.
async fn reset(client: &mut SmtpClient) {
    if let Err(error) = client.rset().await {
        internal!(level = DEBUG, %error, "RSET failed");
    }
}

#[async_trait]
impl Transport for SmtpTransport {
    async fn send(&mut self, message: &OutgoingMessage) -> Result<(), SendError> {
        let envelope = Envelope::from_message(message)?;

        let (mut client, mail_from) = self.begin(&envelope.sender).await?;
        let result = transact(&mut client, mail_from, &envelope, &message.render()).await;

        match &result {
            Err(SendError::Transport(error)) if error.is_connection_lost() => {
                internal!(level = WARN, server = %self.server(), %error, "Session lost");
            }
            _ => self.client = Some(client),
        }

        if result.is_ok() {
            outgoing!(
                level = DEBUG,
                server = %self.server(),
                message_id = message.message_id().unwrap_or_default(),
                recipients = envelope.recipients.len(),
                "Message accepted"
            );
        }

        result
    }

    async fn close(&mut self) {
        let Some(mut client) = self.client.take() else {
            return;
        };

        if let Err(error) = client.quit().await {
            internal!(level = DEBUG, %error, "QUIT failed");
        }
    }
}

/// Connects [`SmtpTransport`]s with a shared [`SmtpConfig`].
#[derive(Debug, Clone, Default)]
pub struct SmtpConnector {
    config: SmtpConfig,
}

impl SmtpConnector {
    #[must_use]
    pub const fn new(config: SmtpConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl TransportConnector for SmtpConnector {
    async fn connect(&self, host: &str, port: u16) -> Result<Box<dyn Transport>, ClientError> {
        let transport = SmtpTransport::connect(host, port, self.config.clone()).await?;
        Ok(Box::new(transport))
    }
}

#[cfg(test)]
mod tests {
    use courier_common::OutgoingMessage;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_envelope_from_headers() {
        let message = OutgoingMessage::builder()
            .from("Courier <courier@example.com>")
            .to("\"Alice Smith\" <alice@example.com>, bob@example.org")
            .cc("carol@example.net")
            .subject("Hi")
            .body("Hello")
            .build()
            .unwrap();

        let envelope = Envelope::from_message(&message).unwrap();
        assert_eq!(envelope.sender, "courier@example.com");
        assert_eq!(
            envelope.recipients,
            vec![
                "alice@example.com".to_string(),
                "bob@example.org".to_string(),
                "carol@example.net".to_string(),
            ]
        );
    }

    #[test]
    fn test_envelope_skips_unresolved_names() {
        let message = OutgoingMessage::builder()
            .from("courier@example.com")
            .to("alice, bob@example.org")
            .build()
            .unwrap();

        let envelope = Envelope::from_message(&message).unwrap();
        assert_eq!(envelope.recipients, vec!["bob@example.org".to_string()]);
    }

    #[test]
    fn test_envelope_requires_sender_and_recipients() {
        let no_from = OutgoingMessage::builder()
            .to("bob@example.org")
            .build()
            .unwrap();
        assert!(matches!(
            Envelope::from_message(&no_from),
            Err(SendError::InvalidMessage(_))
        ));

        let no_to = OutgoingMessage::builder()
            .from("courier@example.com")
            .build()
            .unwrap();
        assert!(matches!(
            Envelope::from_message(&no_to),
            Err(SendError::InvalidMessage(_))
        ));
    }

    #[test]
    fn test_refused_error_lists_recipients() {
        let error = SendError::RecipientsRefused {
            recipients: vec!["a@example.com".into(), "b@example.com".into()],
        };
        assert_eq!(
            error.to_string(),
            "All recipients were refused: a@example.com, b@example.com"
        );
    }

    #[test]
    fn test_config_defaults() {
        let config = SmtpConfig::default();
        assert_eq!(config.helo_name, "localhost");
        assert_eq!(config.tls, TlsPolicy::Opportunistic);
    }
}
