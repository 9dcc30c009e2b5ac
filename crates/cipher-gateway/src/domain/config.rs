//! Gateway configuration with validation.
//!
//! Every section carries `#[serde(default)]`, so a partial TOML file only
//! overrides what it names.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main gateway configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// HTTP server configuration
    pub http: HttpConfig,
    /// Request authentication parameters
    pub security: SecurityConfig,
    /// Session key and device secret parameters
    pub keys: KeysConfig,
    /// Method route table source
    pub dispatch: DispatchConfig,
    /// Management endpoint protection
    pub admin: AdminConfig,
    /// CORS configuration
    pub cors: CorsConfig,
    /// Log output
    pub logging: LoggingConfig,
}

impl GatewayConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.security.rate_limit_capacity == 0 {
            return Err(ConfigError::InvalidRateLimit(
                "rate_limit_capacity cannot be 0".into(),
            ));
        }

        if self.security.rate_limit_window.as_secs() == 0 {
            return Err(ConfigError::InvalidRateLimit(
                "rate_limit_window must be at least 1s".into(),
            ));
        }

        if self.security.nonce_ttl < self.security.timestamp_skew {
            // A nonce forgotten before its timestamp goes stale could be replayed.
            return Err(ConfigError::InvalidTtl(
                "nonce_ttl must be >= timestamp_skew".into(),
            ));
        }

        if self.keys.session_ttl.as_secs() == 0 {
            return Err(ConfigError::InvalidTtl("session_ttl cannot be 0".into()));
        }

        if self.security.fallback_secret.is_empty() {
            return Err(ConfigError::Invalid("fallback_secret cannot be empty".into()));
        }

        if self.http.max_body_size == 0 {
            return Err(ConfigError::Invalid("max_body_size cannot be 0".into()));
        }

        Ok(())
    }

    /// Get HTTP server bind address
    pub fn http_addr(&self) -> SocketAddr {
        SocketAddr::new(self.http.host, self.http.port)
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Bind address
    pub host: IpAddr,
    /// Port (default: 8080)
    pub port: u16,
    /// Max request body size in bytes (default: 1MB)
    pub max_body_size: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)),
            port: 8080,
            max_body_size: 1024 * 1024,
        }
    }
}

/// Request authentication parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Max |now - x-timestamp|
    #[serde(with = "humantime_serde")]
    pub timestamp_skew: Duration,
    /// How long a consumed nonce is remembered
    #[serde(with = "humantime_serde")]
    pub nonce_ttl: Duration,
    /// Rate limit window per (device, method)
    #[serde(with = "humantime_serde")]
    pub rate_limit_window: Duration,
    /// Calls allowed per window
    pub rate_limit_capacity: u32,
    /// Signing secret used when a device has none cached
    pub fallback_secret: String,
    /// Authenticate and decrypt in a tower layer ahead of the gateway handler
    pub pre_authenticate: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            timestamp_skew: Duration::from_secs(300),
            nonce_ttl: Duration::from_secs(300),
            rate_limit_window: Duration::from_secs(60),
            rate_limit_capacity: 60,
            fallback_secret: "test_secret_key_123456".to_string(),
            pre_authenticate: false,
        }
    }
}

/// Session key and device secret parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeysConfig {
    /// Session key lifetime
    #[serde(with = "humantime_serde")]
    pub session_ttl: Duration,
    /// Device signing secret lifetime
    #[serde(with = "humantime_serde")]
    pub device_secret_ttl: Duration,
    /// RSA private key candidates, first existing non-empty file wins
    pub private_key_paths: Vec<PathBuf>,
    /// RSA public key candidates handed out at handshake
    pub public_key_paths: Vec<PathBuf>,
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            session_ttl: Duration::from_secs(1800),
            device_secret_ttl: Duration::from_secs(86_400),
            private_key_paths: vec![
                PathBuf::from("keys/rsa_private_key.pem"),
                PathBuf::from("rsa_private.pem"),
                PathBuf::from("rsa_private_real.pem"),
            ],
            public_key_paths: vec![
                PathBuf::from("keys/rsa_public_key.pem"),
                PathBuf::from("rsa_public.pem"),
            ],
        }
    }
}

/// Method route table source
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Opaque method name -> handler target
    pub routes: BTreeMap<String, String>,
    /// Optional TOML file with a `[routes]` table, re-read on every reload
    pub routes_file: Option<PathBuf>,
}

/// Management endpoint protection
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Bearer key required by management calls (None = open)
    pub api_key: Option<String>,
}

/// CORS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    /// Enable CORS
    pub enabled: bool,
    /// Allowed origins ("*" for all)
    pub allowed_origins: Vec<String>,
    /// Allowed methods
    pub allowed_methods: Vec<String>,
    /// Allowed headers ("*" for all)
    pub allowed_headers: Vec<String>,
    /// Max age for preflight cache
    pub max_age: u64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allowed_origins: vec!["*".to_string()],
            allowed_methods: vec!["GET".to_string(), "POST".to_string(), "OPTIONS".to_string()],
            allowed_headers: vec![
                "Content-Type".to_string(),
                "Authorization".to_string(),
                "x-timestamp".to_string(),
                "x-nonce".to_string(),
                "x-signature".to_string(),
                "x-device-id".to_string(),
                "x-key-id".to_string(),
                "x-enc-key".to_string(),
                "x-enc-mode".to_string(),
            ],
            max_age: 86400, // 24 hours
        }
    }
}

/// Log output
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// EnvFilter directive used when RUST_LOG is unset
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Configuration errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config: {0}")]
    Io(String),
    #[error("cannot parse config: {0}")]
    Parse(String),
    /// Invalid rate limiting configuration
    #[error("invalid rate limit: {0}")]
    InvalidRateLimit(String),
    /// Invalid TTL combination
    #[error("invalid ttl: {0}")]
    InvalidTtl(String),
    /// General configuration error
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Humantime serde module for Duration serialization
mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{}s", duration.as_secs()))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub(super) fn parse_duration(s: &str) -> Result<Duration, &'static str> {
        let s = s.trim();
        if let Some(ms) = s.strip_suffix("ms") {
            ms.trim()
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|_| "invalid milliseconds")
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| "invalid seconds")
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.trim()
                .parse::<u64>()
                .ok()
                .and_then(|m| m.checked_mul(60))
                .map(Duration::from_secs)
                .ok_or("invalid minutes")
        } else if let Some(hours) = s.strip_suffix('h') {
            hours
                .trim()
                .parse::<u64>()
                .ok()
                .and_then(|h| h.checked_mul(3600))
                .map(Duration::from_secs)
                .ok_or("invalid hours")
        } else {
            // Try parsing as plain seconds
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| "invalid duration format")
        }
    }
}
