//! Client configuration.
//!
//! Configuration for the resilink client, including:
//! - HTTP pipeline settings (base URL, timeout, retries, caching)
//! - Response cache location and key prefix
//! - WebSocket endpoint, heartbeat and reconnect policy

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::DEFAULT_PREFIX;
use crate::error::ResilinkError;
use crate::http::RetryPolicy;
use crate::socket::{HeartbeatConfig, ReconnectPolicy};

/// Environment variable overriding `http.base_url`.
pub const ENV_API_BASE_URL: &str = "RESILINK_API_BASE_URL";
/// Environment variable overriding `socket.url`.
pub const ENV_WS_URL: &str = "RESILINK_WS_URL";
/// Environment variable overriding `socket.reconnect.max_attempts`.
pub const ENV_WS_RECONNECT_ATTEMPTS: &str = "RESILINK_WS_RECONNECT_ATTEMPTS";

/// HTTP pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HttpConfig {
    /// Backend base URL that endpoints are appended to.
    pub base_url: String,
    /// Per-attempt deadline in milliseconds.
    pub timeout_ms: u64,
    /// Total attempts per logical request.
    pub retry_attempts: u32,
    /// Linear retry delay unit in milliseconds.
    pub retry_base_delay_ms: u64,
    /// Whether cacheable reads go through the response cache.
    pub cache_enabled: bool,
    /// Default TTL for cached responses in milliseconds.
    pub cache_ttl_ms: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            timeout_ms: 30_000,
            retry_attempts: 3,
            retry_base_delay_ms: 1_000,
            cache_enabled: true,
            cache_ttl_ms: 3_600_000,
        }
    }
}

impl HttpConfig {
    /// Retry policy described by this section.
    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.retry_attempts,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
        }
    }

    /// Request deadline.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Default cache TTL.
    #[must_use]
    pub const fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }
}

/// Response cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CacheConfig {
    /// Directory for the durable cache. Defaults to the user cache dir.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
    /// Reserved key prefix owned by the cache.
    pub prefix: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: None,
            prefix: DEFAULT_PREFIX.to_string(),
        }
    }
}

impl CacheConfig {
    /// Directory the durable cache should live in.
    #[must_use]
    pub fn resolve_dir(&self) -> Option<PathBuf> {
        self.dir
            .clone()
            .or_else(|| dirs::cache_dir().map(|d| d.join("resilink")))
    }
}

/// Heartbeat section of the socket configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HeartbeatSection {
    /// Interval between heartbeats in milliseconds.
    pub interval_ms: u64,
    /// Unanswered heartbeats tolerated before the socket is considered dead.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_missed_acks: Option<u32>,
}

impl Default for HeartbeatSection {
    fn default() -> Self {
        Self {
            interval_ms: 30_000,
            max_missed_acks: None,
        }
    }
}

/// Reconnect section of the socket configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReconnectSection {
    /// Reconnect attempts before giving up.
    pub max_attempts: u32,
    /// Delay before the first reconnect in milliseconds.
    pub base_delay_ms: u64,
    /// Backoff multiplier.
    pub multiplier: f64,
    /// Upper bound on the delay in milliseconds.
    pub cap_delay_ms: u64,
}

impl Default for ReconnectSection {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 3_000,
            multiplier: 2.0,
            cap_delay_ms: 30_000,
        }
    }
}

/// WebSocket configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SocketConfig {
    /// WebSocket endpoint.
    pub url: String,
    /// Heartbeat settings.
    pub heartbeat: HeartbeatSection,
    /// Reconnect settings.
    pub reconnect: ReconnectSection,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:8000/ws".to_string(),
            heartbeat: HeartbeatSection::default(),
            reconnect: ReconnectSection::default(),
        }
    }
}

impl SocketConfig {
    /// Reconnect policy described by this section.
    #[must_use]
    pub const fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts: self.reconnect.max_attempts,
            base_delay: Duration::from_millis(self.reconnect.base_delay_ms),
            multiplier: self.reconnect.multiplier,
            cap_delay: Duration::from_millis(self.reconnect.cap_delay_ms),
        }
    }

    /// Heartbeat configuration described by this section.
    #[must_use]
    pub const fn heartbeat_config(&self) -> HeartbeatConfig {
        HeartbeatConfig {
            interval: Duration::from_millis(self.heartbeat.interval_ms),
            max_missed_acks: self.heartbeat.max_missed_acks,
        }
    }
}

/// Main client configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ResilinkConfig {
    /// HTTP pipeline configuration.
    pub http: HttpConfig,
    /// Response cache configuration.
    pub cache: CacheConfig,
    /// WebSocket configuration.
    pub socket: SocketConfig,
}

impl ResilinkConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ResilinkError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            ResilinkError::Config(format!(
                "failed to read config file '{}': {}",
                path.as_ref().display(),
                e
            ))
        })?;

        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid.
    pub fn from_toml(content: &str) -> Result<Self, ResilinkError> {
        let config: Self = toml::from_str(content)
            .map_err(|e| ResilinkError::Config(format!("invalid TOML: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Render the configuration as TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ResilinkError> {
        toml::to_string_pretty(self)
            .map_err(|e| ResilinkError::Config(format!("failed to serialize config: {e}")))
    }

    /// Apply environment overrides, then re-validate.
    ///
    /// `lookup` is usually `|key| std::env::var(key).ok()`.
    ///
    /// # Errors
    ///
    /// Returns an error if an override is malformed or the result is invalid.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ResilinkError> {
        if let Some(url) = lookup(ENV_API_BASE_URL) {
            self.http.base_url = url;
        }
        if let Some(url) = lookup(ENV_WS_URL) {
            self.socket.url = url;
        }
        if let Some(raw) = lookup(ENV_WS_RECONNECT_ATTEMPTS) {
            self.socket.reconnect.max_attempts = raw.trim().parse().map_err(|_| {
                ResilinkError::Config(format!(
                    "{ENV_WS_RECONNECT_ATTEMPTS} must be a non-negative integer, got '{raw}'"
                ))
            })?;
        }

        self.validate()
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<(), ResilinkError> {
        if self.http.base_url.is_empty() {
            return Err(ResilinkError::Config(
                "http.base_url cannot be empty".to_string(),
            ));
        }

        if !self.http.base_url.starts_with("http://") && !self.http.base_url.starts_with("https://")
        {
            return Err(ResilinkError::Config(
                "http.base_url must start with http:// or https://".to_string(),
            ));
        }

        if self.http.timeout_ms == 0 {
            return Err(ResilinkError::Config(
                "http.timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.http.retry_attempts == 0 {
            return Err(ResilinkError::Config(
                "http.retry_attempts must be at least 1".to_string(),
            ));
        }

        if self.cache.prefix.is_empty() {
            return Err(ResilinkError::Config(
                "cache.prefix cannot be empty".to_string(),
            ));
        }

        if self.socket.url.is_empty() {
            return Err(ResilinkError::Config("socket.url cannot be empty".to_string()));
        }

        if !self.socket.url.starts_with("ws://") && !self.socket.url.starts_with("wss://") {
            return Err(ResilinkError::Config(
                "socket.url must start with ws:// or wss://".to_string(),
            ));
        }

        if self.socket.heartbeat.interval_ms == 0 {
            return Err(ResilinkError::Config(
                "socket.heartbeat.interval_ms must be greater than 0".to_string(),
            ));
        }

        if self.socket.heartbeat.max_missed_acks == Some(0) {
            return Err(ResilinkError::Config(
                "socket.heartbeat.max_missed_acks must be greater than 0".to_string(),
            ));
        }

        let multiplier = self.socket.reconnect.multiplier;
        if multiplier.is_nan() || multiplier < 1.0 {
            return Err(ResilinkError::Config(
                "socket.reconnect.multiplier must be at least 1.0".to_string(),
            ));
        }

        if self.socket.reconnect.cap_delay_ms < self.socket.reconnect.base_delay_ms {
            return Err(ResilinkError::Config(
                "socket.reconnect.cap_delay_ms must not be below base_delay_ms".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    // Helper to create a temporary config file
    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("failed to create temp file");
        file.write_all(content.as_bytes())
            .expect("failed to write temp file");
        file
    }

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_parse_empty_config_uses_defaults() {
        let config = ResilinkConfig::from_toml("").expect("should parse empty config");

        assert_eq!(config, ResilinkConfig::default());
        assert_eq!(config.http.timeout_ms, 30_000);
        assert_eq!(config.http.retry_attempts, 3);
        assert_eq!(config.http.cache_ttl_ms, 3_600_000);
        assert_eq!(config.cache.prefix, "api_cache_");
        assert_eq!(config.socket.heartbeat.interval_ms, 30_000);
        assert!(config.socket.heartbeat.max_missed_acks.is_none());
        assert_eq!(config.socket.reconnect.max_attempts, 5);
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
            [http]
            base_url = "https://api.example.com"
            timeout_ms = 5000
            retry_attempts = 4
            retry_base_delay_ms = 250
            cache_enabled = false
            cache_ttl_ms = 60000

            [cache]
            dir = "/var/cache/resilink"
            prefix = "svc_cache_"

            [socket]
            url = "wss://api.example.com/ws"

            [socket.heartbeat]
            interval_ms = 15000
            max_missed_acks = 2

            [socket.reconnect]
            max_attempts = 8
            base_delay_ms = 500
            multiplier = 1.5
            cap_delay_ms = 10000
        "#;

        let config = ResilinkConfig::from_toml(toml).expect("should parse full config");

        assert_eq!(config.http.base_url, "https://api.example.com");
        assert_eq!(config.http.timeout(), Duration::from_secs(5));
        assert_eq!(config.http.retry_policy().attempts, 4);
        assert_eq!(config.http.retry_policy().base_delay, Duration::from_millis(250));
        assert!(!config.http.cache_enabled);
        assert_eq!(config.http.cache_ttl(), Duration::from_secs(60));
        assert_eq!(config.cache.dir, Some(PathBuf::from("/var/cache/resilink")));
        assert_eq!(config.cache.prefix, "svc_cache_");
        assert_eq!(config.socket.url, "wss://api.example.com/ws");

        let heartbeat = config.socket.heartbeat_config();
        assert_eq!(heartbeat.interval, Duration::from_secs(15));
        assert_eq!(heartbeat.max_missed_acks, Some(2));

        let policy = config.socket.reconnect_policy();
        assert_eq!(policy.max_attempts, 8);
        assert_eq!(policy.base_delay, Duration::from_millis(500));
        assert!((policy.multiplier - 1.5).abs() < f64::EPSILON);
        assert_eq!(policy.cap_delay, Duration::from_secs(10));
    }

    #[test]
    fn test_load_from_file() {
        let toml = r#"
            [socket]
            url = "ws://localhost:9000/ws"
        "#;

        let temp_file = create_temp_config(toml);
        let config = ResilinkConfig::from_file(temp_file.path()).expect("should load from file");

        assert_eq!(config.socket.url, "ws://localhost:9000/ws");
    }

    #[test]
    fn test_file_not_found() {
        let result = ResilinkConfig::from_file("/nonexistent/path/resilink.toml");
        assert!(matches!(result, Err(ResilinkError::Config(_))));
    }

    #[test]
    fn test_invalid_toml_rejected() {
        let result = ResilinkConfig::from_toml("this is not valid toml {{{");
        let err = result.unwrap_err();
        assert!(err.to_string().contains("invalid TOML"));
    }

    #[test]
    fn test_invalid_base_url_scheme_rejected() {
        let toml = r#"
            [http]
            base_url = "ftp://api.example.com"
        "#;

        let err = ResilinkConfig::from_toml(toml).unwrap_err();
        assert!(err.to_string().contains("http:// or https://"));
    }

    #[test]
    fn test_invalid_socket_url_scheme_rejected() {
        let toml = r#"
            [socket]
            url = "https://api.example.com/ws"
        "#;

        let err = ResilinkConfig::from_toml(toml).unwrap_err();
        assert!(err.to_string().contains("ws:// or wss://"));
    }

    #[test]
    fn test_zero_retry_attempts_rejected() {
        let toml = r#"
            [http]
            retry_attempts = 0
        "#;

        let err = ResilinkConfig::from_toml(toml).unwrap_err();
        assert!(err.to_string().contains("retry_attempts must be at least 1"));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let toml = r#"
            [http]
            timeout_ms = 0
        "#;

        let err = ResilinkConfig::from_toml(toml).unwrap_err();
        assert!(err.to_string().contains("timeout_ms must be greater than 0"));
    }

    #[test]
    fn test_zero_missed_acks_rejected() {
        let toml = r#"
            [socket.heartbeat]
            max_missed_acks = 0
        "#;

        let err = ResilinkConfig::from_toml(toml).unwrap_err();
        assert!(err.to_string().contains("max_missed_acks"));
    }

    #[test]
    fn test_shrinking_multiplier_rejected() {
        let toml = r#"
            [socket.reconnect]
            multiplier = 0.5
        "#;

        let err = ResilinkConfig::from_toml(toml).unwrap_err();
        assert!(err.to_string().contains("multiplier"));
    }

    #[test]
    fn test_cap_below_base_rejected() {
        let toml = r#"
            [socket.reconnect]
            base_delay_ms = 5000
            cap_delay_ms = 1000
        "#;

        let err = ResilinkConfig::from_toml(toml).unwrap_err();
        assert!(err.to_string().contains("cap_delay_ms"));
    }

    #[test]
    fn test_env_overrides_applied() {
        let mut config = ResilinkConfig::default();
        config
            .apply_overrides(lookup_from(&[
                (ENV_API_BASE_URL, "https://prod.example.com"),
                (ENV_WS_URL, "wss://prod.example.com/ws"),
                (ENV_WS_RECONNECT_ATTEMPTS, "9"),
            ]))
            .expect("overrides should apply");

        assert_eq!(config.http.base_url, "https://prod.example.com");
        assert_eq!(config.socket.url, "wss://prod.example.com/ws");
        assert_eq!(config.socket.reconnect.max_attempts, 9);
    }

    #[test]
    fn test_env_override_bad_attempts_rejected() {
        let mut config = ResilinkConfig::default();
        let err = config
            .apply_overrides(lookup_from(&[(ENV_WS_RECONNECT_ATTEMPTS, "many")]))
            .unwrap_err();
        assert!(err.to_string().contains(ENV_WS_RECONNECT_ATTEMPTS));
    }

    #[test]
    fn test_env_override_invalid_url_rejected() {
        let mut config = ResilinkConfig::default();
        let result = config.apply_overrides(lookup_from(&[(ENV_WS_URL, "localhost/ws")]));
        assert!(result.is_err());
    }

    #[test]
    fn test_config_serialization_roundtrip() {
        let mut original = ResilinkConfig::default();
        original.http.base_url = "https://roundtrip.example.com".to_string();
        original.cache.dir = Some(PathBuf::from("/tmp/resilink-cache"));
        original.socket.heartbeat.max_missed_acks = Some(3);

        let toml_str = original.to_toml().expect("should serialize");
        let parsed = ResilinkConfig::from_toml(&toml_str).expect("should parse");

        assert_eq!(original, parsed);
    }

    #[test]
    fn test_explicit_cache_dir_wins() {
        let cache = CacheConfig {
            dir: Some(PathBuf::from("/srv/cache")),
            ..CacheConfig::default()
        };
        assert_eq!(cache.resolve_dir(), Some(PathBuf::from("/srv/cache")));
    }
}
