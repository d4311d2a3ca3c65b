//! Error types shared by the courier crates.
//!
//! Anything a collaborator (settings store, directory) can report lives here so
//! the delivery and endpoint crates agree on how to classify it.

use thiserror::Error;

/// Errors raised while reading settings from a [`SettingsStore`].
///
/// [`SettingsStore`]: crate::settings::SettingsStore
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A required setting is not present in the store.
    #[error("Missing required setting: {0}")]
    Missing(String),

    /// A setting is present but holds the wrong kind of value.
    #[error("Invalid setting {key}: {reason}")]
    Invalid { key: String, reason: String },
}

/// Errors raised by a [`Directory`] lookup.
///
/// [`Directory`]: crate::directory::Directory
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DirectoryError {
    /// No user with the given name exists.
    #[error("Invalid user name: {0}")]
    InvalidName(String),

    /// The directory could not answer at all.
    #[error("Directory unavailable: {0}")]
    Unavailable(String),
}

impl DirectoryError {
    /// Returns `true` when the error only concerns the name that was looked up,
    /// rather than the directory itself.
    #[must_use]
    pub const fn is_invalid_name(&self) -> bool {
        matches!(self, Self::InvalidName(_))
    }
}
