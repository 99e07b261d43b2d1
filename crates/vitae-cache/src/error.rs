//! Cache error types.
//!
//! "Key not found" is never an error in this crate. Every variant here means
//! the backend could not answer, and callers of security-sensitive
//! primitives must treat it as a denial.

use std::time::Duration;

/// Errors that can occur during cache operations.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Could not obtain a connection to the networked store.
    #[error("Cache connection error: {message}")]
    Connection {
        /// Description of the connection failure.
        message: String,
    },

    /// The networked store rejected or failed a command.
    #[error("Cache backend error: {command} failed: {message}")]
    Backend {
        /// The command that failed (e.g. `GET`, `INCR`).
        command: &'static str,
        /// Description of the failure.
        message: String,
    },

    /// The networked store did not answer within the configured bound.
    #[error("Cache operation timed out: {command} after {}ms", .after.as_millis())]
    Timeout {
        /// The command that timed out.
        command: &'static str,
        /// The bound that was exceeded.
        after: Duration,
    },

    /// Calendar arithmetic fell outside the representable range.
    #[error("Clock error: {message}")]
    Clock {
        /// Description of the clock failure.
        message: String,
    },
}

impl CacheError {
    /// Creates a new `Connection` error.
    #[must_use]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a new `Backend` error.
    #[must_use]
    pub fn backend(command: &'static str, message: impl Into<String>) -> Self {
        Self::Backend {
            command,
            message: message.into(),
        }
    }

    /// Creates a new `Clock` error.
    #[must_use]
    pub fn clock(message: impl Into<String>) -> Self {
        Self::Clock {
            message: message.into(),
        }
    }

    /// Whether the error means the backend is unreachable rather than
    /// misbehaving. Both lead to the same caller behavior; this only feeds
    /// log levels and health reporting.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Timeout { .. })
    }
}

impl From<deadpool_redis::PoolError> for CacheError {
    fn from(e: deadpool_redis::PoolError) -> Self {
        Self::connection(format!("failed to get Redis connection: {e}"))
    }
}

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_message_includes_bound() {
        let err = CacheError::Timeout {
            command: "GET",
            after: Duration::from_millis(1500),
        };
        assert_eq!(err.to_string(), "Cache operation timed out: GET after 1500ms");
        assert!(err.is_unavailable());
    }

    #[test]
    fn test_backend_error_is_not_unavailable() {
        let err = CacheError::backend("EVALSHA", "NOSCRIPT");
        assert!(!err.is_unavailable());
        assert!(err.to_string().contains("EVALSHA"));
    }
}
