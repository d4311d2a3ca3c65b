//! Mail transport for courier.
//!
//! [`client`] speaks SMTP over a single TCP connection (with optional
//! STARTTLS). [`transport`] wraps it into the [`Transport`] the delivery
//! worker drives: one long-lived connection, one SMTP transaction per message.

pub mod client;
pub mod transport;

pub use client::{ClientError, Response, SmtpClient};
pub use transport::{
    SendError, SmtpConfig, SmtpConnector, SmtpTransport, TlsPolicy, Transport, TransportConnector,
};
