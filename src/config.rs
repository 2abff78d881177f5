//! Typed configuration for networking, caching, credentials, and the relay.
//!
//! Configuration is passed explicitly to the components that need it; there
//! is no process-wide global. Values come from `Default`, optionally a JSON
//! file, and finally environment-variable overrides for the common knobs.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Errors from loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid config value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Timeouts, retry budget, identity pool, and bulk pacing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
    /// Retries after the initial attempt, per logical operation.
    pub max_retries: u32,
    /// Base delay of the backoff schedule, in seconds.
    pub base_delay_secs: f64,
    /// User-agent identities; empty means the built-in pool.
    pub user_agents: Vec<String>,
    /// Minimum delay between bulk requests to one domain, in milliseconds.
    pub pacing_delay_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            read_timeout_secs: 30,
            max_retries: 3,
            base_delay_secs: 1.0,
            user_agents: Vec::new(),
            pacing_delay_ms: 1000,
        }
    }
}

impl NetworkConfig {
    #[must_use]
    pub fn base_delay(&self) -> Duration {
        Duration::from_secs_f64(self.base_delay_secs.max(0.0))
    }

    #[must_use]
    pub fn pacing_delay(&self) -> Duration {
        Duration::from_millis(self.pacing_delay_ms)
    }
}

/// Response-cache location, ttl, and on/off switch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub directory: PathBuf,
    pub ttl_hours: u64,
    pub enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("output/sessions"),
            ttl_hours: 24,
            enabled: true,
        }
    }
}

impl CacheConfig {
    #[must_use]
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_hours * 3600)
    }
}

/// Commercial metadata API endpoint and credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL of the metadata service.
    pub endpoint: String,
    /// Value for the service's host header, when it requires one.
    pub api_host: String,
    /// Opaque credential secrets, rotated by the pool.
    pub credentials: Vec<String>,
    /// Credential acquisitions allowed per credential before giving up.
    pub max_retries_per_key: u32,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://terabox-downloader-direct-download-link-generator2.p.rapidapi.com"
                .to_string(),
            api_host: "terabox-downloader-direct-download-link-generator2.p.rapidapi.com"
                .to_string(),
            credentials: Vec::new(),
            max_retries_per_key: 2,
        }
    }
}

/// Third-party relay used by the external-relay strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Base URL of the sign/timestamp relay service.
    pub service_url: String,
    /// Hosts for wrapped mirror URLs. Relay identities churn, so none are
    /// shipped as defaults; an empty pool skips the wrapped mirror.
    pub hosts: Vec<String>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            service_url: "https://terabox.hnn.workers.dev".to_string(),
            hosts: Vec::new(),
        }
    }
}

/// Pre-configured session context for the static-session strategy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Cookie header value for authenticated metadata calls.
    pub cookie: Option<String>,
    /// Pre-obtained page token, when one is known.
    pub js_token: Option<String>,
}

/// Complete configuration bundle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub network: NetworkConfig,
    pub cache: CacheConfig,
    pub api: ApiConfig,
    pub relay: RelayConfig,
    pub session: SessionConfig,
}

impl Config {
    /// Loads configuration from a JSON file, applying environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the file is unreadable, unparseable, or
    /// fails validation.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Self =
            serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.apply_env_overrides();
        config.validate()?;
        debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Default configuration with environment overrides applied.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when an override fails validation.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Applies `TERADL_*` environment overrides for the common knobs.
    pub fn apply_env_overrides(&mut self) {
        if let Some(value) = env_parse::<u32>("TERADL_MAX_RETRIES") {
            self.network.max_retries = value;
        }
        if let Some(value) = env_parse::<f64>("TERADL_RETRY_DELAY") {
            self.network.base_delay_secs = value;
        }
        if let Some(value) = env_parse::<u64>("TERADL_CONNECT_TIMEOUT") {
            self.network.connect_timeout_secs = value;
        }
        if let Some(value) = env_parse::<u64>("TERADL_READ_TIMEOUT") {
            self.network.read_timeout_secs = value;
        }
        if let Some(value) = env_parse::<u64>("TERADL_CACHE_TTL_HOURS") {
            self.cache.ttl_hours = value;
        }
        if let Some(value) = env_parse::<bool>("TERADL_CACHE_ENABLED") {
            self.cache.enabled = value;
        }
        if let Ok(value) = std::env::var("TERADL_CACHE_DIR")
            && !value.trim().is_empty()
        {
            self.cache.directory = PathBuf::from(value);
        }
        if let Ok(value) = std::env::var("TERADL_API_CREDENTIALS") {
            let credentials: Vec<String> = value
                .split(',')
                .map(str::trim)
                .filter(|secret| !secret.is_empty())
                .map(ToString::to_string)
                .collect();
            if !credentials.is_empty() {
                self.api.credentials = credentials;
            }
        }
    }

    /// Validates ranges the rest of the crate relies on.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.network.connect_timeout_secs == 0 || self.network.connect_timeout_secs > 300 {
            return Err(ConfigError::Invalid {
                field: "network.connect_timeout_secs",
                reason: format!(
                    "{} out of range 1..=300",
                    self.network.connect_timeout_secs
                ),
            });
        }
        if self.network.read_timeout_secs == 0 || self.network.read_timeout_secs > 3600 {
            return Err(ConfigError::Invalid {
                field: "network.read_timeout_secs",
                reason: format!("{} out of range 1..=3600", self.network.read_timeout_secs),
            });
        }
        if self.network.max_retries > 10 {
            return Err(ConfigError::Invalid {
                field: "network.max_retries",
                reason: format!("{} out of range 0..=10", self.network.max_retries),
            });
        }
        if !(0.0..=60.0).contains(&self.network.base_delay_secs) {
            return Err(ConfigError::Invalid {
                field: "network.base_delay_secs",
                reason: format!("{} out of range 0..=60", self.network.base_delay_secs),
            });
        }
        if self.api.max_retries_per_key == 0 {
            return Err(ConfigError::Invalid {
                field: "api.max_retries_per_key",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.api.endpoint.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "api.endpoint",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok()?.trim().parse().ok()
}
