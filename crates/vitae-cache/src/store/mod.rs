//! Entry stores: the TTL-aware key/value mappings behind [`CacheService`].
//!
//! ## Backends
//!
//! - **Local**: in-process [`DashMap`](dashmap::DashMap) with lazy expiry on
//!   access and a periodic sweep
//! - **Redis**: pooled connections, expiry and atomicity delegated to Redis
//!
//! Both implement [`EntryStore`] with the same observable contract, so
//! nothing above the facade can tell which one is active.
//!
//! [`CacheService`]: crate::CacheService

pub mod local;
pub mod redis;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

use crate::CacheResult;

pub use self::local::LocalStore;
pub use self::redis::RedisStore;

/// Remaining lifetime of a key, as reported by [`EntryStore::ttl`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTtl {
    /// Live key that expires after this many whole seconds (rounded up).
    Expires(u64),
    /// Live key without expiry.
    Persistent,
    /// No live key.
    Missing,
}

impl KeyTtl {
    /// Numeric form: seconds remaining, `-1` for no expiry, `-2` for absent.
    pub fn as_seconds(self) -> i64 {
        match self {
            Self::Expires(secs) => i64::try_from(secs).unwrap_or(i64::MAX),
            Self::Persistent => -1,
            Self::Missing => -2,
        }
    }

    /// Parses the reply of Redis `PTTL`, rounding partial seconds up.
    pub fn from_millis(millis: i64) -> Self {
        match millis {
            -1 => Self::Persistent,
            m if m < 0 => Self::Missing,
            m => Self::Expires(m.unsigned_abs().div_ceil(1000)),
        }
    }
}

/// TTL in the millisecond resolution both stores share. A non-zero TTL
/// below one millisecond becomes one millisecond; huge values saturate.
pub(crate) fn ttl_millis(ttl: Duration) -> u64 {
    if ttl.is_zero() {
        return 0;
    }
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

/// Counters must be canonical integers, the same strings Redis `INCR`
/// accepts. Anything else counts as 0.
pub(crate) fn parse_counter(value: &str) -> i64 {
    value
        .parse::<i64>()
        .ok()
        .filter(|n| n.to_string() == value)
        .unwrap_or(0)
}

/// Which backend is serving the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBackendKind {
    Local,
    Redis,
}

impl CacheBackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Redis => "redis",
        }
    }
}

impl fmt::Display for CacheBackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trait for TTL-aware key/value stores.
///
/// Every method is total over its inputs: an absent key yields `None`,
/// `false`, `0` or [`KeyTtl::Missing`]. Errors are reserved for a backend
/// that cannot answer.
///
/// A zero `ttl` means "already expired": `set` removes the key, `expire`
/// removes a live key and reports `true`, and `increment` ignores it.
#[async_trait]
pub trait EntryStore: Send + Sync {
    /// Get a live value.
    async fn get(&self, key: &str) -> CacheResult<Option<String>>;

    /// Store a value, replacing any previous value and TTL.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> CacheResult<()>;

    /// Remove a key. Idempotent.
    async fn delete(&self, key: &str) -> CacheResult<()>;

    /// Whether a live value exists.
    async fn exists(&self, key: &str) -> CacheResult<bool>;

    /// Add one to the counter at `key` and return the new value.
    ///
    /// Absent or non-numeric values count as 0. When this call creates the
    /// key, `ttl` is attached atomically with the creation; an existing
    /// key keeps its current expiry.
    async fn increment(&self, key: &str, ttl: Option<Duration>) -> CacheResult<i64>;

    /// Remaining lifetime of `key`.
    async fn ttl(&self, key: &str) -> CacheResult<KeyTtl>;

    /// Replace the TTL of a live key. Returns `false` if the key is absent.
    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool>;

    /// Remove `key` only if it currently holds `expected`.
    ///
    /// Atomic: of several concurrent callers with the matching value,
    /// exactly one observes `true`.
    async fn delete_if_equals(&self, key: &str, expected: &str) -> CacheResult<bool>;

    /// Check that the backend answers.
    async fn health_check(&self) -> CacheResult<bool>;

    fn kind(&self) -> CacheBackendKind;

    /// Remove expired entries eagerly. Returns the number removed.
    ///
    /// Default implementation is a no-op (for backends like Redis with native TTL).
    fn sweep_expired(&self) -> usize {
        0
    }

    /// Release backend resources.
    fn close(&self) {}
}
