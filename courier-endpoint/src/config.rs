use std::time::Duration;

use serde::Deserialize;

use crate::auth::AdminTokens;

#[derive(Debug, Clone, Deserialize)]
pub struct EndpointConfig {
    /// Address the HTTP server binds, e.g. `127.0.0.1:8025` or `[::]:8025`.
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    /// How long a request with a `message_id` waits for its delivery outcome.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub admin: AdminTokens,
}

fn default_listen_address() -> String {
    "127.0.0.1:8025".to_string()
}

const fn default_timeout_secs() -> u64 {
    10
}

impl EndpointConfig {
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            timeout_secs: default_timeout_secs(),
            admin: AdminTokens::default(),
        }
    }
}
