//! Cache, Redis and rate-limit configuration.
//!
//! # Example (TOML)
//!
//! ```toml
//! [redis]
//! enabled = true
//! host = "cache.internal"
//! port = 6379
//! timeout_ms = 2000
//!
//! [cache]
//! sweep_interval = "60s"
//! refresh_token_lifetime = "7d"
//! otp_lifetime = "5m"
//!
//! [rate_limiting.auth]
//! max_requests = 5
//! window = "15m"
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Redis (networked store) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Use Redis as the entry store (falls back to local when unreachable)
    /// Default: false (single-instance deployments)
    #[serde(default = "default_redis_enabled")]
    pub enabled: bool,

    /// Full connection URL. When set, host/port/password/db are ignored.
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default = "default_redis_host")]
    pub host: String,

    #[serde(default = "default_redis_port")]
    pub port: u16,

    #[serde(default)]
    pub password: Option<String>,

    /// Logical database index
    #[serde(default)]
    pub db: u8,

    /// Connection pool size
    #[serde(default = "default_redis_pool_size")]
    pub pool_size: usize,

    /// Bound applied to connection checkout and to every command, in milliseconds
    #[serde(default = "default_redis_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_redis_enabled() -> bool {
    false
}

fn default_redis_host() -> String {
    "localhost".to_string()
}

fn default_redis_port() -> u16 {
    6379
}

fn default_redis_pool_size() -> usize {
    10
}

fn default_redis_timeout_ms() -> u64 {
    2000
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            enabled: default_redis_enabled(),
            url: None,
            host: default_redis_host(),
            port: default_redis_port(),
            password: None,
            db: 0,
            pool_size: default_redis_pool_size(),
            timeout_ms: default_redis_timeout_ms(),
        }
    }
}

impl RedisConfig {
    /// Connection URL built from `url` or from the individual fields.
    pub fn connection_url(&self) -> String {
        if let Some(url) = self.url.as_deref().filter(|u| !u.is_empty()) {
            return url.to_string();
        }
        match self.password.as_deref().filter(|p| !p.is_empty()) {
            Some(password) => format!(
                "redis://:{}@{}:{}/{}",
                password, self.host, self.port, self.db
            ),
            None => format!("redis://{}:{}/{}", self.host, self.port, self.db),
        }
    }

    /// Connection URL safe for logs.
    pub fn redacted_url(&self) -> String {
        redact_url(&self.connection_url())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn redact_url(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***{}", &url[..scheme_end], &url[at..])
        }
        _ => url.to_string(),
    }
}

/// Lifetimes of the derived primitives and local store housekeeping.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// How often the local store sweeps expired entries.
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,

    /// Refresh credential lifetime.
    #[serde(with = "humantime_serde")]
    pub refresh_token_lifetime: Duration,

    /// One-time passcode lifetime.
    #[serde(with = "humantime_serde")]
    pub otp_lifetime: Duration,

    /// Password-reset credential lifetime.
    #[serde(with = "humantime_serde")]
    pub reset_token_lifetime: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(60),
            refresh_token_lifetime: Duration::from_secs(7 * 24 * 3600), // 7 days
            otp_lifetime: Duration::from_secs(300),                     // 5 minutes
            reset_token_lifetime: Duration::from_secs(3600),            // 1 hour
        }
    }
}

/// Fixed-window ceilings for the two request classes.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitingConfig {
    /// Authentication endpoints, keyed by `{ip}:{email}`.
    pub auth: RateLimitRule,

    /// General API traffic, keyed by client IP.
    pub api: RateLimitRule,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            auth: RateLimitRule {
                max_requests: 5,
                window: Duration::from_secs(15 * 60),
            },
            api: RateLimitRule {
                max_requests: 100,
                window: Duration::from_secs(15 * 60),
            },
        }
    }
}

/// A single fixed-window rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct RateLimitRule {
    /// Requests allowed per window.
    pub max_requests: u32,

    /// Window length.
    #[serde(with = "humantime_serde")]
    pub window: Duration,
}

/// Configuration validation errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// An invalid configuration value was provided.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// A required configuration value is missing.
    #[error("Missing required configuration: {0}")]
    Missing(String),
}

impl RedisConfig {
    /// Validates the Redis section. Only checked when Redis is enabled.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.enabled {
            return Ok(());
        }
        if self.url.as_deref().is_none_or(str::is_empty) && self.host.is_empty() {
            return Err(ConfigError::Missing("redis.host or redis.url".to_string()));
        }
        if self.pool_size == 0 {
            return Err(ConfigError::InvalidValue(
                "redis.pool_size must be > 0".to_string(),
            ));
        }
        if self.timeout_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "redis.timeout_ms must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

impl CacheConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let lifetimes = [
            ("cache.sweep_interval", self.sweep_interval),
            ("cache.refresh_token_lifetime", self.refresh_token_lifetime),
            ("cache.otp_lifetime", self.otp_lifetime),
            ("cache.reset_token_lifetime", self.reset_token_lifetime),
        ];
        for (name, value) in lifetimes {
            if value.as_secs() == 0 {
                return Err(ConfigError::InvalidValue(format!(
                    "{name} must be at least 1s"
                )));
            }
        }
        Ok(())
    }
}

impl RateLimitingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, rule) in [("auth", &self.auth), ("api", &self.api)] {
            if rule.max_requests == 0 {
                return Err(ConfigError::InvalidValue(format!(
                    "rate_limiting.{name}.max_requests must be > 0"
                )));
            }
            if rule.window.as_secs() == 0 {
                return Err(ConfigError::InvalidValue(format!(
                    "rate_limiting.{name}.window must be at least 1s"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_url_from_parts() {
        let config = RedisConfig {
            host: "cache.internal".to_string(),
            port: 6380,
            db: 2,
            ..RedisConfig::default()
        };
        assert_eq!(config.connection_url(), "redis://cache.internal:6380/2");
    }

    #[test]
    fn test_connection_url_with_password_is_redacted() {
        let config = RedisConfig {
            password: Some("s3cret".to_string()),
            ..RedisConfig::default()
        };
        assert_eq!(config.connection_url(), "redis://:s3cret@localhost:6379/0");
        assert_eq!(config.redacted_url(), "redis://***@localhost:6379/0");
    }

    #[test]
    fn test_explicit_url_wins() {
        let config = RedisConfig {
            url: Some("redis://10.0.0.5:7000".to_string()),
            host: "ignored".to_string(),
            ..RedisConfig::default()
        };
        assert_eq!(config.connection_url(), "redis://10.0.0.5:7000");
    }

    #[test]
    fn test_disabled_redis_skips_validation() {
        let config = RedisConfig {
            pool_size: 0,
            ..RedisConfig::default()
        };
        assert!(config.validate().is_ok());

        let enabled = RedisConfig {
            enabled: true,
            ..config
        };
        assert!(enabled.validate().is_err());
    }

    #[test]
    fn test_default_lifetimes() {
        let config = CacheConfig::default();
        assert_eq!(config.refresh_token_lifetime, Duration::from_secs(604_800));
        assert_eq!(config.otp_lifetime, Duration::from_secs(300));
        assert_eq!(config.reset_token_lifetime, Duration::from_secs(3600));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_rate_limit_rejected() {
        let mut config = RateLimitingConfig::default();
        config.api.max_requests = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("rate_limiting.api.max_requests"));
    }
}
