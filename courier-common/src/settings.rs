//! System settings store.
//!
//! Settings are flat dotted keys (`smtp.address.host`) mapping to a small set
//! of scalar values. The delivery worker and the send endpoint only ever read
//! from the store; absent or mistyped values surface as [`ConfigError`].

use std::fmt::{self, Display};

use ahash::AHashMap;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Bool(bool),
    Integer(i64),
    String(String),
}

impl SettingValue {
    const fn kind(&self) -> &'static str {
        match self {
            Self::Bool(_) => "boolean",
            Self::Integer(_) => "integer",
            Self::String(_) => "string",
        }
    }
}

impl Display for SettingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(value) => write!(f, "{value}"),
            Self::Integer(value) => write!(f, "{value}"),
            Self::String(value) => write!(f, "{value:?}"),
        }
    }
}

/// Read access to the system configuration.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Fetch the raw value for `key`, if present.
    async fn get(&self, key: &str) -> Option<SettingValue>;

    /// Fetch a setting that must be a string.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Missing`] if unset, [`ConfigError::Invalid`] if it is not a string.
    async fn string(&self, key: &str) -> Result<String, ConfigError> {
        match self.get(key).await {
            Some(SettingValue::String(value)) => Ok(value),
            Some(other) => Err(ConfigError::Invalid {
                key: key.to_string(),
                reason: format!("expected a string, got {} {other}", other.kind()),
            }),
            None => Err(ConfigError::Missing(key.to_string())),
        }
    }

    /// Fetch a setting that must be an integer.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Missing`] if unset, [`ConfigError::Invalid`] if it is not an integer.
    async fn integer(&self, key: &str) -> Result<i64, ConfigError> {
        match self.get(key).await {
            Some(SettingValue::Integer(value)) => Ok(value),
            Some(other) => Err(ConfigError::Invalid {
                key: key.to_string(),
                reason: format!("expected an integer, got {} {other}", other.kind()),
            }),
            None => Err(ConfigError::Missing(key.to_string())),
        }
    }
}

/// A settings store held entirely in memory, typically loaded from the
/// `settings` section of the configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemorySettings(AHashMap<String, SettingValue>);

impl MemorySettings {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: SettingValue) -> Self {
        self.0.insert(key.into(), value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: SettingValue) {
        self.0.insert(key.into(), value);
    }
}

#[async_trait]
impl SettingsStore for MemorySettings {
    async fn get(&self, key: &str) -> Option<SettingValue> {
        self.0.get(key).cloned()
    }
}
