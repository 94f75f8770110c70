//! Gateway configuration loaded from environment variables.
//!
//! # Configuration Hierarchy
//!
//! All configuration is loaded from environment variables with sensible defaults
//! for development. In production, configure via environment variables or a `.env` file.
//!
//! # Identity Configuration
//!
//! - `MASTER_USERNAME` / `MASTER_PASSWORD`: bootstrap identity that seeds the first
//!   admin user. Both must be set, or neither.
//!
//! # Pipeline Composition
//!
//! - `EXTENSIONS`: comma-separated subset of registered extensions to load (default: all)
//! - `SEQUENCED_EXTENSIONS`: priority order for extensions whose position is fixed by name
//!
//! # Admission Control
//!
//! - `RATE_LIMIT_RPS`: default requests per second per identity (default: 100, 0 = no default)
//! - `RATE_LIMIT_BURST`: default burst capacity per identity (default: 50)

use std::collections::HashSet;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{GatewayError, GatewayResult};

/// Priority order of sequenced extensions when `SEQUENCED_EXTENSIONS` is unset.
pub const DEFAULT_SEQUENCED_EXTENSIONS: [&str; 5] = [
    "searchrelevancy",
    "rules",
    "functions",
    "analytics",
    "suggestions",
];

/// Which store backs users, permissions and analytics records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    /// Indices on the search cluster itself.
    Elasticsearch,
    /// Process-local maps; contents are lost on restart.
    Memory,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "elasticsearch" | "es" => Ok(Self::Elasticsearch),
            "memory" => Ok(Self::Memory),
            other => Err(format!("unknown store backend `{other}`")),
        }
    }
}

impl fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreBackend::Elasticsearch => write!(f, "elasticsearch"),
            StoreBackend::Memory => write!(f, "memory"),
        }
    }
}

/// Gateway configuration loaded from environment variables.
///
/// # Example
///
/// ```rust,ignore
/// let config = Config::from_env()?;
/// println!("Gateway will listen on {}", config.server_addr());
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Server host address (default: "0.0.0.0")
    pub host: String,

    /// Server port (default: 8000)
    pub port: u16,

    /// Maximum request body size in bytes (default: 10MB)
    pub max_request_body_size: usize,

    /// Largest search response buffered for analytics (default: 10MB).
    /// Bigger responses are relayed without a record.
    pub analytics_max_response_size: usize,

    // =========================================================================
    // Search Backend Configuration
    // =========================================================================
    /// Base URL of the search cluster, optionally carrying `user:pass@`
    /// Default: "http://localhost:9200"
    pub elasticsearch_url: String,

    /// Upper bound on a single forwarded backend call (default: 30 seconds)
    pub backend_timeout: Duration,

    /// Number of consecutive failures before opening the circuit (default: 5)
    pub circuit_breaker_failure_threshold: u32,

    /// Number of consecutive successes in half-open state to close circuit (default: 2)
    pub circuit_breaker_success_threshold: u32,

    /// How long the circuit stays open before transitioning to half-open (default: 30s)
    pub circuit_breaker_open_duration: Duration,

    // =========================================================================
    // Store Configuration
    // =========================================================================
    /// Store implementation (default: elasticsearch)
    pub store_backend: StoreBackend,

    /// Index holding user records (default: ".users")
    pub users_index: String,

    /// Index holding permission records (default: ".permissions")
    pub permissions_index: String,

    /// Index receiving analytics records (default: ".analytics")
    pub analytics_index: String,

    // =========================================================================
    // Identity Configuration
    // =========================================================================
    /// Master bootstrap username (bootstrap disabled when unset)
    pub master_username: Option<String>,

    /// Master bootstrap password
    pub master_password: Option<String>,

    // =========================================================================
    // Pipeline Composition
    // =========================================================================
    /// Extensions to load; `None` loads every registered extension
    pub extensions: Option<Vec<String>>,

    /// Priority order of sequenced extensions
    pub sequenced_extensions: Vec<String>,

    // =========================================================================
    // Rate Limiting Configuration
    // =========================================================================
    /// Default requests per second per identity (default: 100)
    /// Set to 0 to admit identities that carry no limits of their own
    pub rate_limit_rps: u32,

    /// Default burst capacity per identity (default: 50)
    pub rate_limit_burst: u32,

    // =========================================================================
    // Security Configuration
    // =========================================================================
    /// Comma-separated list of allowed CORS origins
    /// Use "*" to allow all origins (not recommended for production)
    pub cors_allowed_origins: Vec<String>,

    /// Trusted proxy CIDR ranges for IP spoofing mitigation.
    ///
    /// Format: Comma-separated CIDR notation (e.g., "10.0.0.0/8,172.16.0.0/12")
    /// Default: Empty (trust all sources - NOT recommended for production)
    pub trusted_proxies: Vec<String>,

    // =========================================================================
    // Analytics Configuration
    // =========================================================================
    /// Base URL of an ipapi-style lookup service (`{base}/{ip}/json`)
    /// Geolocation is skipped when unset.
    pub geo_lookup_url: Option<String>,

    // =========================================================================
    // Observability Configuration
    // =========================================================================
    /// Log level (e.g., "info", "debug", "trace")
    pub log_level: String,

    /// Interval for background gauge refresh (default: 15 seconds)
    pub gauge_refresh_interval: Duration,

    /// Port for Prometheus metrics endpoint (default: 9090, 0 = disabled)
    pub metrics_port: u16,
}

impl Config {
    /// Load configuration from environment variables with sensible defaults.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Config` if any configuration value is invalid
    /// (e.g., non-numeric PORT value, half-configured master identity).
    pub fn from_env() -> GatewayResult<Self> {
        // Load an .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let config = Self {
            // Server
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: Self::parse_env("PORT", 8000)?,
            // 10MB
            max_request_body_size: Self::parse_env("MAX_REQUEST_BODY_SIZE", 10 * 1024 * 1024)?,
            analytics_max_response_size: Self::parse_env(
                "ANALYTICS_MAX_RESPONSE_SIZE",
                10 * 1024 * 1024,
            )?,

            // Search backend
            elasticsearch_url: env::var("ELASTICSEARCH_URL")
                .unwrap_or_else(|_| "http://localhost:9200".to_string()),
            backend_timeout: Duration::from_secs(Self::parse_env("BACKEND_TIMEOUT_SECS", 30)?),
            circuit_breaker_failure_threshold: Self::parse_env(
                "CIRCUIT_BREAKER_FAILURE_THRESHOLD",
                5,
            )?,
            circuit_breaker_success_threshold: Self::parse_env(
                "CIRCUIT_BREAKER_SUCCESS_THRESHOLD",
                2,
            )?,
            circuit_breaker_open_duration: Duration::from_secs(Self::parse_env(
                "CIRCUIT_BREAKER_OPEN_DURATION_SECS",
                30,
            )?),

            // Store
            store_backend: Self::parse_env("STORE_BACKEND", StoreBackend::Elasticsearch)?,
            users_index: env::var("USERS_INDEX").unwrap_or_else(|_| ".users".to_string()),
            permissions_index: env::var("PERMISSIONS_INDEX")
                .unwrap_or_else(|_| ".permissions".to_string()),
            analytics_index: env::var("ANALYTICS_INDEX")
                .unwrap_or_else(|_| ".analytics".to_string()),

            // Identity
            master_username: Self::non_empty_env("MASTER_USERNAME"),
            master_password: Self::non_empty_env("MASTER_PASSWORD"),

            // Pipeline
            extensions: Self::non_empty_env("EXTENSIONS").map(|s| Self::split_list(&s)),
            sequenced_extensions: Self::non_empty_env("SEQUENCED_EXTENSIONS")
                .map(|s| Self::split_list(&s))
                .unwrap_or_else(default_sequenced_extensions),

            // Rate limiting
            rate_limit_rps: Self::parse_env("RATE_LIMIT_RPS", 100)?,
            rate_limit_burst: Self::parse_env("RATE_LIMIT_BURST", 50)?,

            // Security
            cors_allowed_origins: Self::split_list(
                &env::var("CORS_ALLOWED_ORIGINS").unwrap_or_else(|_| "*".to_string()),
            ),
            trusted_proxies: Self::non_empty_env("TRUSTED_PROXIES")
                .map(|s| Self::split_list(&s))
                .unwrap_or_default(),

            // Analytics
            geo_lookup_url: Self::non_empty_env("GEO_LOOKUP_URL"),

            // Observability
            log_level: env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            gauge_refresh_interval: Duration::from_secs(Self::parse_env(
                "GAUGE_REFRESH_INTERVAL_SECS",
                15,
            )?),
            metrics_port: Self::parse_env("METRICS_PORT", 9090)?,
        };

        // Validate configuration before returning
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values for consistency and correctness.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Config` if validation fails.
    pub fn validate(&self) -> GatewayResult<()> {
        if self.master_username.is_some() != self.master_password.is_some() {
            return Err(GatewayError::Config(
                "MASTER_USERNAME and MASTER_PASSWORD must be set together".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for name in &self.sequenced_extensions {
            if !seen.insert(name.as_str()) {
                return Err(GatewayError::Config(format!(
                    "SEQUENCED_EXTENSIONS lists `{name}` more than once"
                )));
            }
        }

        if self.max_request_body_size == 0 {
            return Err(GatewayError::Config(
                "MAX_REQUEST_BODY_SIZE must be greater than 0".to_string(),
            ));
        }

        if self.analytics_max_response_size == 0 {
            return Err(GatewayError::Config(
                "ANALYTICS_MAX_RESPONSE_SIZE must be greater than 0".to_string(),
            ));
        }

        if self.backend_timeout.is_zero() {
            return Err(GatewayError::Config(
                "BACKEND_TIMEOUT_SECS must be greater than 0".to_string(),
            ));
        }

        if self.circuit_breaker_failure_threshold == 0
            || self.circuit_breaker_success_threshold == 0
        {
            return Err(GatewayError::Config(
                "circuit breaker thresholds must be greater than 0".to_string(),
            ));
        }

        if self.gauge_refresh_interval.is_zero() {
            return Err(GatewayError::Config(
                "GAUGE_REFRESH_INTERVAL_SECS must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Get the full server address for binding.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if a default per-identity rate limit applies.
    pub fn rate_limiting_enabled(&self) -> bool {
        self.rate_limit_rps > 0
    }

    /// Master credentials, when both halves are configured.
    pub fn master_identity(&self) -> Option<(&str, &str)> {
        match (&self.master_username, &self.master_password) {
            (Some(user), Some(pass)) => Some((user.as_str(), pass.as_str())),
            _ => None,
        }
    }

    /// Check if trusted proxy validation is enabled.
    pub fn proxy_validation_enabled(&self) -> bool {
        !self.trusted_proxies.is_empty()
    }

    /// Check if Prometheus metrics export is enabled.
    pub fn metrics_enabled(&self) -> bool {
        self.metrics_port > 0
    }

    /// Get the metrics endpoint address.
    ///
    /// Returns `None` if metrics are disabled (port = 0).
    pub fn metrics_addr(&self) -> Option<std::net::SocketAddr> {
        if self.metrics_enabled() {
            Some(std::net::SocketAddr::from((
                [0, 0, 0, 0],
                self.metrics_port,
            )))
        } else {
            None
        }
    }

    /// Parse an environment variable into the specified type with a default value.
    fn parse_env<T>(name: &str, default: T) -> GatewayResult<T>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match env::var(name) {
            Ok(val) => val
                .trim()
                .parse()
                .map_err(|e| GatewayError::Config(format!("Invalid {name}: {e}"))),
            Err(_) => Ok(default),
        }
    }

    fn non_empty_env(name: &str) -> Option<String> {
        env::var(name).ok().filter(|v| !v.trim().is_empty())
    }

    /// Split a comma-separated list, dropping blanks.
    fn split_list(raw: &str) -> Vec<String> {
        raw.split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

fn default_sequenced_extensions() -> Vec<String> {
    DEFAULT_SEQUENCED_EXTENSIONS
        .iter()
        .map(|s| (*s).to_string())
        .collect()
}

/// Default configuration for testing and development.
///
/// Production deployments should use `Config::from_env()` instead.
impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            max_request_body_size: 10 * 1024 * 1024, // 10MB
            analytics_max_response_size: 10 * 1024 * 1024,
            elasticsearch_url: "http://localhost:9200".to_string(),
            backend_timeout: Duration::from_secs(30),
            circuit_breaker_failure_threshold: 5,
            circuit_breaker_success_threshold: 2,
            circuit_breaker_open_duration: Duration::from_secs(30),
            store_backend: StoreBackend::Elasticsearch,
            users_index: ".users".to_string(),
            permissions_index: ".permissions".to_string(),
            analytics_index: ".analytics".to_string(),
            master_username: None,
            master_password: None,
            extensions: None,
            sequenced_extensions: default_sequenced_extensions(),
            rate_limit_rps: 100,
            rate_limit_burst: 50,
            cors_allowed_origins: vec!["*".to_string()],
            trusted_proxies: vec![], // Empty = trust all (dev mode)
            geo_lookup_url: None,
            log_level: "info".to_string(),
            gauge_refresh_interval: Duration::from_secs(15),
            metrics_port: 9090,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = Config::default();

        assert_eq!(config.port, 8000);
        assert_eq!(config.users_index, ".users");
        assert_eq!(config.sequenced_extensions.len(), 5);
        assert_eq!(config.sequenced_extensions[3], "analytics");
        assert!(config.master_identity().is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_server_addr_format() {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 8080,
            ..Config::default()
        };

        assert_eq!(config.server_addr(), "127.0.0.1:8080");
    }

    #[test]
    fn test_master_identity_requires_both_halves() {
        let config = Config {
            master_username: Some("admin".to_string()),
            ..Config::default()
        };

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("MASTER_USERNAME"));

        let config = Config {
            master_username: Some("admin".to_string()),
            master_password: Some("hunter2".to_string()),
            ..Config::default()
        };
        assert!(config.validate().is_ok());
        assert_eq!(config.master_identity(), Some(("admin", "hunter2")));
    }

    #[test]
    fn test_duplicate_sequenced_extension_rejected() {
        let config = Config {
            sequenced_extensions: vec!["rules".to_string(), "rules".to_string()],
            ..Config::default()
        };

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("rules"));
    }

    #[test]
    fn test_validate_body_size_zero() {
        let config = Config {
            max_request_body_size: 0,
            ..Config::default()
        };

        assert!(
            config
                .validate()
                .unwrap_err()
                .to_string()
                .contains("MAX_REQUEST_BODY_SIZE")
        );
    }

    #[test]
    fn test_rate_limiting_enabled() {
        assert!(Config::default().rate_limiting_enabled());

        let config = Config {
            rate_limit_rps: 0,
            ..Config::default()
        };
        assert!(!config.rate_limiting_enabled());
    }

    #[test]
    fn test_store_backend_parse() {
        assert_eq!(
            "memory".parse::<StoreBackend>().unwrap(),
            StoreBackend::Memory
        );
        assert_eq!(
            "Elasticsearch".parse::<StoreBackend>().unwrap(),
            StoreBackend::Elasticsearch
        );
        assert!("redis".parse::<StoreBackend>().is_err());
    }

    #[test]
    fn test_split_list_drops_blanks() {
        assert_eq!(
            Config::split_list(" a, ,b ,"),
            vec!["a".to_string(), "b".to_string()]
        );
    }
}
