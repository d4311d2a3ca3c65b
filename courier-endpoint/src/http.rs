//! HTTP surface: `POST /send-email`.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, Method, StatusCode, header::AUTHORIZATION},
    response::{IntoResponse, Response},
    routing::any,
};
use courier_common::{Signal, incoming, internal};
use tokio::net::TcpListener;
use tower_http::timeout::TimeoutLayer;

use crate::{
    auth::AdminTokens,
    config::EndpointConfig,
    endpoint::{SendEndpoint, SendRequest},
    error::EndpointError,
};

/// Headroom on top of the delivery wait before the server gives up on a
/// request.
const REQUEST_GRACE: Duration = Duration::from_secs(5);

#[derive(Clone)]
struct AppState {
    endpoint: Arc<SendEndpoint>,
    admin: Arc<AdminTokens>,
}

pub fn router(endpoint: Arc<SendEndpoint>, admin: AdminTokens) -> Router {
    let timeout = endpoint.timeout() + REQUEST_GRACE;

    Router::new()
        .route("/send-email", any(send_email_handler))
        .with_state(AppState {
            endpoint,
            admin: Arc::new(admin),
        })
        .layer(TimeoutLayer::new(timeout))
}

pub struct HttpServer {
    listener: TcpListener,
    router: Router,
}

impl HttpServer {
    /// Bind the listener.
    ///
    /// # Errors
    ///
    /// [`EndpointError::Bind`] if the address cannot be bound.
    pub async fn new(config: &EndpointConfig, endpoint: Arc<SendEndpoint>) -> Result<Self, EndpointError> {
        let listener = TcpListener::bind(&config.listen_address)
            .await
            .map_err(|source| EndpointError::Bind {
                address: config.listen_address.clone(),
                source,
            })?;

        internal!(level = INFO, address = %config.listen_address, "Send endpoint bound");

        Ok(Self {
            listener,
            router: router(endpoint, config.admin.clone()),
        })
    }

    /// # Errors
    ///
    /// Returns an error if the local address cannot be determined.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve until a shutdown signal arrives.
    ///
    /// # Errors
    ///
    /// [`EndpointError::Server`] if the server fails.
    pub async fn serve(
        self,
        mut shutdown: tokio::sync::broadcast::Receiver<Signal>,
    ) -> Result<(), EndpointError> {
        internal!(level = INFO, "Send endpoint starting");

        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                internal!(level = INFO, "Send endpoint received shutdown signal");
            })
            .await
            .map_err(|e| EndpointError::Server(e.to_string()))?;

        internal!(level = INFO, "Send endpoint stopped");
        Ok(())
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
}

async fn send_email_handler(
    State(state): State<AppState>,
    method: Method,
    headers: HeaderMap,
    body: String,
) -> Response {
    let caller = state.admin.caller(bearer_token(&headers));
    let request = SendRequest::from_body(method, body, caller);

    match state.endpoint.send_email(request).await {
        Ok(Some(outcome)) => (StatusCode::OK, Json(outcome)).into_response(),
        Ok(None) => StatusCode::NO_CONTENT.into_response(),
        Err(error) => {
            if error.status_code().is_server_error() {
                incoming!(level = ERROR, %error, "Send request failed");
            }
            (error.status_code(), error.to_string()).into_response()
        }
    }
}
