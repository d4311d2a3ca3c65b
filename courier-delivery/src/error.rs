use courier_common::error::{ConfigError, DirectoryError};
use courier_smtp::ClientError;
use thiserror::Error;

/// Why the worker could not reach the mail server at startup. The text of this
/// error becomes the `reason` of every outcome while the worker is rejecting.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to connect to {server}: {source}")]
    Transport {
        server: String,
        #[source]
        source: ClientError,
    },
}

/// Failures that stop the delivery worker.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Recipient lookup failed: {0}")]
    Directory(#[from] DirectoryError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_error_display() {
        let error = ConnectError::from(ConfigError::Missing("smtp.address.host".to_string()));
        assert_eq!(error.to_string(), "Missing required setting: smtp.address.host");

        let error = ConnectError::Transport {
            server: "mail.example.com:25".to_string(),
            source: ClientError::ConnectionClosed,
        };
        assert_eq!(
            error.to_string(),
            "Failed to connect to mail.example.com:25: Connection closed unexpectedly"
        );
    }
}
