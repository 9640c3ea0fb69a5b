//! Application configuration
//!
//! Configuration is loaded from:
//! 1. Default values
//! 2. Config file (~/.config/udt/config.toml)
//! 3. Environment variables (UDT_* prefix)
//!
//! Environment variables take precedence over config file values.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cloud::DataPrivacy;
use crate::error::{DatasetError, DatasetResult};
use crate::manager::BackendKind;
use crate::session::{SessionOptions, DEFAULT_SERVER_URL};

/// Environment variable prefix
const ENV_PREFIX: &str = "UDT";

/// Application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Which dataset backend to use
    #[serde(default)]
    pub backend: BackendKind,

    /// Collaboration server base URL
    #[serde(default = "default_server_url")]
    pub server_url: String,

    /// Collaborative session to join on startup
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    /// Per-request timeout for the collaboration server
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Delay between diff polls
    #[serde(default = "default_polling_interval_ms")]
    pub polling_interval_ms: u64,

    /// Directory for local and cloud storage
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Cloud project name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,

    /// Cloud privacy level
    #[serde(default)]
    pub privacy: DataPrivacy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            server_url: default_server_url(),
            session_id: None,
            request_timeout_secs: default_request_timeout_secs(),
            polling_interval_ms: default_polling_interval_ms(),
            data_dir: default_data_dir(),
            project: None,
            privacy: DataPrivacy::default(),
        }
    }
}

impl Config {
    /// Load configuration from default location and environment
    ///
    /// Order of precedence (highest to lowest):
    /// 1. Environment variables (UDT_BACKEND, UDT_SERVER_URL, UDT_SESSION_ID, ...)
    /// 2. Config file (~/.config/udt/config.toml or UDT_CONFIG)
    /// 3. Default values
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::config_file_path())
    }

    /// Load from an explicit path if given, otherwise the default location
    pub fn load_with_cli_override(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from_path(path),
            None => Self::load(),
        }
    }

    /// Load configuration from a specific path
    ///
    /// Environment variables are still applied as overrides.
    /// If the file doesn't exist, defaults are used.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?
        } else {
            Self::default()
        };

        config.apply_env_overrides()?;
        config.ensure_data_dir()?;
        Ok(config)
    }

    /// Load configuration from a TOML string (useful for testing)
    pub fn load_from_str(toml_content: &str) -> Result<Self> {
        let mut config: Config =
            toml::from_str(toml_content).context("Failed to parse config TOML")?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(val) = env_var("BACKEND") {
            self.backend = val
                .parse()
                .with_context(|| format!("Invalid {}_BACKEND", ENV_PREFIX))?;
        }

        if let Some(val) = env_var("SERVER_URL") {
            self.server_url = val;
        }

        // empty clears it
        if let Some(val) = env_var("SESSION_ID") {
            self.session_id = if val.is_empty() { None } else { Some(val) };
        }

        if let Some(val) = env_var("REQUEST_TIMEOUT_SECS") {
            self.request_timeout_secs = val
                .parse()
                .with_context(|| format!("Invalid {}_REQUEST_TIMEOUT_SECS: {}", ENV_PREFIX, val))?;
        }

        if let Some(val) = env_var("POLLING_INTERVAL_MS") {
            self.polling_interval_ms = val
                .parse()
                .with_context(|| format!("Invalid {}_POLLING_INTERVAL_MS: {}", ENV_PREFIX, val))?;
        }

        if let Some(val) = env_var("DATA_DIR") {
            self.data_dir = PathBuf::from(val);
        }

        if let Some(val) = env_var("PROJECT") {
            self.project = if val.is_empty() { None } else { Some(val) };
        }

        if let Some(val) = env_var("PRIVACY") {
            self.privacy = val
                .parse()
                .with_context(|| format!("Invalid {}_PRIVACY", ENV_PREFIX))?;
        }

        Ok(())
    }

    /// Ensure data directory exists
    fn ensure_data_dir(&self) -> Result<()> {
        if !self.data_dir.exists() {
            std::fs::create_dir_all(&self.data_dir)
                .with_context(|| format!("Failed to create data directory: {:?}", self.data_dir))?;
        }
        Ok(())
    }

    /// Save configuration to the default location
    pub fn save(&self) -> Result<()> {
        self.save_to_path(&Self::config_file_path())
    }

    /// Save configuration to a specific path
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;
        Ok(())
    }

    /// Set one field from its string form, as used by `udt config set`
    pub fn set_value(&mut self, key: &str, value: &str) -> Result<()> {
        let optional = |v: &str| if v.is_empty() { None } else { Some(v.to_string()) };
        match key {
            "backend" => self.backend = value.parse()?,
            "server_url" => self.server_url = value.to_string(),
            "session_id" => self.session_id = optional(value),
            "request_timeout_secs" => {
                self.request_timeout_secs = value
                    .parse()
                    .with_context(|| format!("Invalid timeout: {}", value))?
            }
            "polling_interval_ms" => {
                self.polling_interval_ms = value
                    .parse()
                    .with_context(|| format!("Invalid interval: {}", value))?
            }
            "data_dir" => self.data_dir = PathBuf::from(value),
            "project" => self.project = optional(value),
            "privacy" => self.privacy = value.parse()?,
            other => bail!(
                "Unknown configuration key: '{}'\n\
                 Valid keys: backend, server_url, session_id, request_timeout_secs, \
                 polling_interval_ms, data_dir, project, privacy",
                other
            ),
        }
        Ok(())
    }

    /// Get the config file path
    ///
    /// Can be overridden with UDT_CONFIG environment variable
    pub fn config_file_path() -> PathBuf {
        if let Some(path) = env_var("CONFIG") {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("udt")
            .join("config.toml")
    }

    /// Collaboration settings, validated
    pub fn session_options(&self) -> DatasetResult<SessionOptions> {
        let url = reqwest::Url::parse(&self.server_url).map_err(|e| {
            DatasetError::Validation(format!("invalid server URL '{}': {}", self.server_url, e))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(DatasetError::Validation(format!(
                "server URL '{}' must use http or https",
                self.server_url
            )));
        }

        let options = SessionOptions {
            server_url: self.server_url.clone(),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            polling_interval: Duration::from_millis(self.polling_interval_ms),
        };
        options.validate()?;
        Ok(options)
    }

    /// File holding the local backend's dataset
    pub fn local_dataset_path(&self) -> PathBuf {
        self.data_dir.join("dataset.json")
    }

    /// Root directory of the cloud backend's object store
    pub fn objects_dir(&self) -> PathBuf {
        self.data_dir.join("objects")
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(format!("{}_{}", ENV_PREFIX, name)).ok()
}

fn default_server_url() -> String {
    DEFAULT_SERVER_URL.to_string()
}

fn default_request_timeout_secs() -> u64 {
    120
}

fn default_polling_interval_ms() -> u64 {
    1000
}

/// Get the default data directory
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("udt")
}
