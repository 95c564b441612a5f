//! Cache configuration
//!
//! Settings are read once at startup, from a YAML file and/or the
//! environment, and are immutable afterwards.

use crate::error::{CacheError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// TTL tiers used by callers when caching
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TtlTier {
    /// 5 minutes
    Short,
    /// 30 minutes
    Medium,
    /// 1 hour
    Long,
    /// 1 day
    VeryLong,
}

impl TtlTier {
    pub fn as_secs(&self) -> u64 {
        match self {
            TtlTier::Short => 300,
            TtlTier::Medium => 1800,
            TtlTier::Long => 3600,
            TtlTier::VeryLong => 86400,
        }
    }
}

/// Process-wide cache behaviour
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// TTL applied when a write does not specify one
    #[serde(default = "default_ttl_seconds")]
    pub default_ttl_seconds: u64,

    /// Namespace prepended to every physical key
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// When false every operation short-circuits with `error="disabled"`
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_ttl_seconds() -> u64 {
    3600 // 1 hour
}

fn default_key_prefix() -> String {
    "app:".to_string()
}

fn default_enabled() -> bool {
    true
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_seconds: default_ttl_seconds(),
            key_prefix: default_key_prefix(),
            enabled: default_enabled(),
        }
    }
}

impl CacheConfig {
    /// Create a configuration with the given namespace and default TTL
    pub fn new(key_prefix: impl Into<String>) -> Self {
        Self {
            key_prefix: key_prefix.into(),
            ..Self::default()
        }
    }

    /// Set the default TTL in seconds
    pub fn with_default_ttl(mut self, ttl_seconds: u64) -> Self {
        self.default_ttl_seconds = ttl_seconds;
        self
    }

    /// Enable or disable caching
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// A configuration that turns every operation into a no-op
    pub fn disabled() -> Self {
        Self::default().with_enabled(false)
    }
}

/// Backing store connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Base URL of the key-value service
    #[serde(default = "default_endpoint_url")]
    pub endpoint_url: String,

    /// Bearer token sent with every request
    #[serde(default)]
    pub access_token: Option<String>,

    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_endpoint_url() -> String {
    "http://localhost:15500".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            endpoint_url: default_endpoint_url(),
            access_token: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl StoreConfig {
    /// Create a new configuration with the given endpoint URL
    pub fn new(endpoint_url: impl Into<String>) -> Self {
        Self {
            endpoint_url: endpoint_url.into(),
            ..Self::default()
        }
    }

    /// Set the access token
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    /// Set the request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = timeout.as_secs();
        self
    }

    /// Get timeout as Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// `json` or `pretty`
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Complete settings consumed by [`CacheManager`](crate::CacheManager)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheSettings {
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

pub const ENV_STORE_URL: &str = "CACHE_STORE_URL";
pub const ENV_STORE_TOKEN: &str = "CACHE_STORE_TOKEN";
pub const ENV_STORE_TIMEOUT: &str = "CACHE_STORE_TIMEOUT_SECS";
pub const ENV_DEFAULT_TTL: &str = "CACHE_DEFAULT_TTL";
pub const ENV_KEY_PREFIX: &str = "CACHE_KEY_PREFIX";
pub const ENV_ENABLED: &str = "CACHE_ENABLED";
/// Deployment environment; `test` forces caching off
pub const ENV_ENVIRONMENT: &str = "CACHE_ENV";

impl CacheSettings {
    /// Load settings from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| CacheError::Config(format!("{}: {}", path.display(), e)))?;
        serde_yaml::from_str(&content)
            .map_err(|e| CacheError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Defaults overlaid with the process environment
    pub fn from_env() -> Result<Self> {
        Self::default().apply_env()
    }

    /// Overlay environment variables on top of these settings
    pub fn apply_env(self) -> Result<Self> {
        self.apply_vars(|name| std::env::var(name).ok())
    }

    fn apply_vars(mut self, var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(url) = var(ENV_STORE_URL) {
            self.store.endpoint_url = url;
        }
        if let Some(token) = var(ENV_STORE_TOKEN).filter(|t| !t.is_empty()) {
            self.store.access_token = Some(token);
        }
        if let Some(raw) = var(ENV_STORE_TIMEOUT) {
            self.store.timeout_secs = parse_var(ENV_STORE_TIMEOUT, &raw)?;
        }
        if let Some(raw) = var(ENV_DEFAULT_TTL) {
            self.cache.default_ttl_seconds = parse_var(ENV_DEFAULT_TTL, &raw)?;
        }
        if let Some(prefix) = var(ENV_KEY_PREFIX) {
            self.cache.key_prefix = prefix;
        }
        if let Some(raw) = var(ENV_ENABLED) {
            self.cache.enabled = parse_bool(&raw).ok_or_else(|| {
                CacheError::Config(format!("{} must be a boolean, got: {}", ENV_ENABLED, raw))
            })?;
        }
        if var(ENV_ENVIRONMENT).is_some_and(|env| env.eq_ignore_ascii_case("test")) {
            self.cache.enabled = false;
        }
        Ok(self)
    }
}

fn parse_var(name: &str, raw: &str) -> Result<u64> {
    raw.trim()
        .parse()
        .map_err(|_| CacheError::Config(format!("{} must be an integer, got: {}", name, raw)))
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
