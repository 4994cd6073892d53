use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use url::Url;

const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path} as JSON: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to parse {path} as TOML: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("missing required value: {0}")]
    MissingValue(String),
    #[error("invalid value for {name}: {message}")]
    InvalidValue { name: String, message: String },
    #[error("failed to parse {name} as boolean: {value}")]
    ParseBool { name: String, value: String },
}

/// Run configuration: where to publish and as whom.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Micropub endpoint URL.
    #[serde(default)]
    pub endpoint: String,
    /// Bearer token for the endpoint.
    #[serde(default)]
    pub token: String,
    /// Default profile for the `profile` command.
    #[serde(default)]
    pub user: Option<String>,
    /// Syndication targets to send instead of the server's.
    #[serde(default)]
    pub syndicate_to: Vec<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl Config {
    /// Load configuration from a JSON or TOML file, then apply environment
    /// overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

        let is_toml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));

        let mut config: Self = if is_toml {
            toml::from_str(&raw).map_err(|e| ConfigError::Toml {
                path: path.to_path_buf(),
                source: e,
            })?
        } else {
            serde_json::from_str(&raw).map_err(|e| ConfigError::Json {
                path: path.to_path_buf(),
                source: e,
            })?
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// `MICROPUB_ENDPOINT`, `MICROPUB_TOKEN` and `INSTAGRAM_USER` replace the
    /// file values when set and non-empty.
    pub fn apply_env_overrides(&mut self) {
        if let Some(endpoint) = optional_env("MICROPUB_ENDPOINT") {
            self.endpoint = endpoint;
        }
        if let Some(token) = optional_env("MICROPUB_TOKEN") {
            self.token = token;
        }
        if let Some(user) = optional_env("INSTAGRAM_USER") {
            self.user = Some(user);
        }
    }

    /// Validate that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoint.is_empty() {
            return Err(ConfigError::MissingValue("endpoint".to_string()));
        }
        let endpoint = Url::parse(&self.endpoint).map_err(|e| ConfigError::InvalidValue {
            name: "endpoint".to_string(),
            message: e.to_string(),
        })?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidValue {
                name: "endpoint".to_string(),
                message: format!("must be an http(s) URL, got '{}'", endpoint.scheme()),
            });
        }
        if self.token.trim().is_empty() {
            return Err(ConfigError::MissingValue("token".to_string()));
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                name: "timeout_secs".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Create a minimal config for testing.
    #[doc(hidden)]
    #[must_use]
    pub fn for_testing(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            token: "test-token".to_string(),
            user: None,
            syndicate_to: Vec::new(),
            timeout_secs: 5,
        }
    }
}

/// Parse a yes/no style boolean.
///
/// # Errors
///
/// Returns an error for anything that is not a recognised spelling.
pub fn parse_bool(name: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "yes" | "true" | "t" | "y" | "1" => Ok(true),
        "no" | "false" | "f" | "n" | "0" => Ok(false),
        _ => Err(ConfigError::ParseBool {
            name: name.to_string(),
            value: value.to_string(),
        }),
    }
}

fn optional_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}
