//! Request side of courier: accepts send requests, queues them for the
//! delivery worker and reports the outcome back to the caller.

pub mod auth;
mod config;
pub mod endpoint;
mod error;
pub mod http;
pub mod notifier;

pub use auth::{AdminTokens, Caller};
pub use config::EndpointConfig;
pub use endpoint::{SendEndpoint, SendRequest};
pub use error::EndpointError;
pub use http::HttpServer;
pub use notifier::{CorrelationNotifier, DeliveryTimeout};
