//! Who is calling the endpoint.
//!
//! Administrators present a bearer token whose SHA-256 hash is listed in the
//! configuration. Tokens are never stored in plain text.

use courier_common::incoming;
use hex::encode;
use serde::Deserialize;
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Caller {
    Administrator,
    Anonymous,
}

impl Caller {
    #[must_use]
    pub const fn is_administrator(self) -> bool {
        matches!(self, Self::Administrator)
    }
}

/// Administrator bearer tokens, as hex encoded SHA-256 hashes.
///
/// ```ron
/// admin: (
///     token_hashes: [
///         // echo -n "test-token" | sha256sum
///         "4c5dc9b7708905f77f5e5d16316b5dfb425e68cb326dcd55a860e90a7707031e",
///     ],
/// )
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AdminTokens {
    #[serde(default)]
    pub token_hashes: Vec<String>,
}

impl AdminTokens {
    #[must_use]
    pub fn validate_token(&self, token: &str) -> bool {
        let hash = encode(Sha256::digest(token.as_bytes()));
        self.token_hashes
            .iter()
            .any(|configured| configured.eq_ignore_ascii_case(&hash))
    }

    /// Classify a request by the token it carried, if any.
    #[must_use]
    pub fn caller(&self, token: Option<&str>) -> Caller {
        match token {
            Some(token) if self.validate_token(token) => Caller::Administrator,
            Some(_) => {
                incoming!(level = WARN, "Rejected invalid bearer token");
                Caller::Anonymous
            }
            None => Caller::Anonymous,
        }
    }
}
