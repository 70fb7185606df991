//! Configuration management for Tollgate.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

use crate::error::{Result, TollgateError};

/// Main configuration for Tollgate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TollgateConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,

    /// Header hygiene filters
    #[serde(default)]
    pub headers: HeaderHygieneConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Bucket capacity and refill rate per client; non-positive means 30
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: i64,

    /// Cap on distinct tracked clients; non-positive means 500
    #[serde(default = "default_max_client_keys")]
    pub max_client_keys: i64,

    /// Forwarded-address header to trust, e.g. `X-Forwarded-For`
    #[serde(default)]
    pub trusted_header: Option<String>,

    /// Period between eviction sweeps in seconds
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,

    /// Idle time in seconds after which a client is evicted
    #[serde(default = "default_stale_after")]
    pub stale_after_secs: u64,

    /// Number of clients inspected per sweep
    #[serde(default = "default_cleanup_batch_size")]
    pub cleanup_batch_size: usize,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: default_requests_per_minute(),
            max_client_keys: default_max_client_keys(),
            trusted_header: None,
            cleanup_interval_secs: default_cleanup_interval(),
            stale_after_secs: default_stale_after(),
            cleanup_batch_size: default_cleanup_batch_size(),
        }
    }
}

impl RateLimitingConfig {
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    /// Trusted header name, empty when forwarded headers are ignored.
    pub fn trusted_header(&self) -> &str {
        self.trusted_header.as_deref().unwrap_or_default()
    }
}

fn default_requests_per_minute() -> i64 {
    30
}

fn default_max_client_keys() -> i64 {
    500
}

fn default_cleanup_interval() -> u64 {
    300
}

fn default_stale_after() -> u64 {
    600
}

fn default_cleanup_batch_size() -> usize {
    100
}

/// Header hygiene filter configuration. Every filter is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeaderHygieneConfig {
    /// Reject requests whose header value exceeds a byte length
    #[serde(default)]
    pub max_length: Option<MaxLengthRule>,

    /// Header that must not contain control or non-ASCII bytes
    #[serde(default)]
    pub control_chars_header: Option<String>,

    /// Header that must hold a token of `[A-Za-z0-9-_.#]` bytes
    #[serde(default)]
    pub token_header: Option<String>,
}

/// Maximum length for a single header.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaxLengthRule {
    pub header: String,
    pub max_len: usize,
}

impl TollgateConfig {
    /// Load configuration from an optional YAML file layered with
    /// `TOLLGATE__SECTION__KEY` environment variables.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                config::File::with_name(path).format(config::FileFormat::Yaml),
            );
        }

        builder
            .add_source(config::Environment::with_prefix("TOLLGATE").separator("__"))
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| TollgateError::Config(e.to_string()))
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| TollgateError::Config(e.to_string()))
    }

    /// Load configuration from a YAML file path.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }
}
