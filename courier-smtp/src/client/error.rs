use std::io;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to parse SMTP response: {0}")]
    ParseError(String),

    /// The server answered a command with a non-success status.
    #[error("SMTP error: {code} - {message}")]
    SmtpError { code: u16, message: String },

    #[error("TLS error: {0}")]
    TlsError(String),

    #[error("Connection closed unexpectedly")]
    ConnectionClosed,

    #[error("UTF-8 error: {0}")]
    Utf8Error(#[from] std::str::Utf8Error),
}

impl ClientError {
    /// Returns `true` if the connection can no longer be used after this error.
    #[must_use]
    pub const fn is_connection_lost(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::ConnectionClosed | Self::TlsError(_) | Self::ParseError(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
