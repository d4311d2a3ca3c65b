//! Locating and reading the RON configuration file.

use std::path::{Path, PathBuf};

use anyhow::Context;
use courier_common::{MemorySettings, User};
use courier_endpoint::EndpointConfig;
use courier_smtp::SmtpConfig;
use serde::Deserialize;

pub const CONFIG_ENV: &str = "COURIER_CONFIG";

const DEFAULT_PATHS: [&str; 2] = ["./courier.config.ron", "/etc/courier/courier.config.ron"];

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    /// Backing store for the dotted system settings (`smtp.address.host`, ...).
    #[serde(default)]
    pub settings: MemorySettings,

    #[serde(alias = "user", default)]
    pub users: Vec<User>,

    #[serde(default)]
    pub endpoint: EndpointConfig,

    #[serde(default)]
    pub smtp: SmtpConfig,
}

impl Config {
    /// Parse a configuration from RON text.
    ///
    /// # Errors
    ///
    /// Returns the RON error, with its position, when the text does not parse.
    pub fn from_ron(text: &str) -> Result<Self, ron::error::SpannedError> {
        ron::from_str(text)
    }

    /// Read and parse the configuration at `path`.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read or is not a valid configuration.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        Self::from_ron(&text).with_context(|| format!("Invalid config in {}", path.display()))
    }
}

/// Find the configuration file using the following precedence:
/// 1. `COURIER_CONFIG` environment variable
/// 2. ./courier.config.ron (current working directory)
/// 3. /etc/courier/courier.config.ron (system-wide config)
///
/// # Errors
///
/// Fails if `COURIER_CONFIG` names a missing file, or if none of the default
/// locations exist.
pub fn find_config_file() -> anyhow::Result<PathBuf> {
    let candidates = DEFAULT_PATHS.map(PathBuf::from);
    locate(std::env::var(CONFIG_ENV).ok(), &candidates)
}

fn locate(from_env: Option<String>, candidates: &[PathBuf]) -> anyhow::Result<PathBuf> {
    if let Some(env_path) = from_env {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(path);
        }
        anyhow::bail!("{CONFIG_ENV} points to non-existent file: {}", path.display());
    }

    if let Some(path) = candidates.iter().find(|path| path.exists()) {
        return Ok(path.clone());
    }

    let paths_tried = candidates
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");

    anyhow::bail!(
        "No configuration file found. Tried:\n  - {CONFIG_ENV} environment variable\n{paths_tried}"
    )
}
