use axum::http::StatusCode;
use courier_common::error::ConfigError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EndpointError {
    /// The request was malformed. Nothing was published.
    #[error("{0}")]
    BadRequest(String),

    /// The caller may not send email. Nothing was published.
    #[error("{0}")]
    PermissionDenied(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to bind send endpoint to {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Send endpoint server error: {0}")]
    Server(String),
}

impl EndpointError {
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::PermissionDenied(_) => StatusCode::FORBIDDEN,
            Self::Config(_) | Self::Bind { .. } | Self::Server(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            EndpointError::BadRequest("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            EndpointError::PermissionDenied("x".into()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            EndpointError::from(ConfigError::Missing("system.hostname".into())).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
