//! Redis-backed entry store.
//!
//! Uses a `deadpool_redis` pool. Every command is bounded by the configured
//! timeout; a timeout is reported as [`CacheError::Timeout`], never as a
//! missing key.
//!
//! Read-modify-write operations run as Lua scripts so they are atomic on the
//! server without any locking on our side.

use std::future::Future;
use std::sync::LazyLock;
use std::time::Duration;

use ::redis::{AsyncCommands, RedisResult, Script};
use async_trait::async_trait;
use deadpool_redis::{Config, Connection, Pool, PoolConfig, Runtime, Timeouts};

use super::{CacheBackendKind, EntryStore, KeyTtl, ttl_millis};
use crate::config::RedisConfig;
use crate::{CacheError, CacheResult};

/// INCR that treats a non-integer value as 0 and attaches the TTL only when
/// the key is created by this call.
///
/// KEYS[1] = counter key, ARGV[1] = TTL in milliseconds (0 = none).
static INCREMENT_SCRIPT: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r"
local existed = redis.call('EXISTS', KEYS[1]) == 1
local n = redis.pcall('INCR', KEYS[1])
if type(n) == 'table' and n.err then
  redis.call('SET', KEYS[1], '1', 'KEEPTTL')
  return 1
end
local ttl = tonumber(ARGV[1])
if not existed and ttl and ttl > 0 then
  redis.call('PEXPIRE', KEYS[1], ttl)
end
return n
",
    )
});

/// KEYS[1] = key, ARGV[1] = expected value. Returns 1 if deleted.
static DELETE_IF_EQUALS_SCRIPT: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('DEL', KEYS[1])
end
return 0
",
    )
});

/// Networked entry store.
#[derive(Clone)]
pub struct RedisStore {
    pool: Pool,
    timeout: Duration,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("pool_status", &self.pool.status())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl RedisStore {
    /// Build the pool and verify the server answers `PING`.
    ///
    /// Fails with [`CacheError::Connection`] or [`CacheError::Timeout`] when
    /// Redis is unreachable; the caller decides whether to fall back.
    pub async fn connect(config: &RedisConfig) -> CacheResult<Self> {
        let timeout = config.timeout();

        let mut timeouts = Timeouts::default();
        timeouts.wait = Some(timeout);
        timeouts.create = Some(timeout);
        timeouts.recycle = Some(timeout);

        let mut pool_config = PoolConfig::new(config.pool_size);
        pool_config.timeouts = timeouts;

        let mut redis_config = Config::from_url(config.connection_url());
        redis_config.pool = Some(pool_config);

        let pool = redis_config
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| CacheError::connection(format!("failed to create Redis pool: {e}")))?;

        let store = Self { pool, timeout };
        if !store.health_check().await? {
            return Err(CacheError::connection("Redis did not answer PING"));
        }

        tracing::debug!(url = %config.redacted_url(), "Redis entry store connected");
        Ok(store)
    }

    async fn connection(&self) -> CacheResult<Connection> {
        match tokio::time::timeout(self.timeout, self.pool.get()).await {
            Ok(conn) => Ok(conn?),
            Err(_) => Err(CacheError::Timeout {
                command: "CONNECT",
                after: self.timeout,
            }),
        }
    }

    /// Run one command under the configured timeout.
    async fn bounded<T, F>(&self, command: &'static str, fut: F) -> CacheResult<T>
    where
        F: Future<Output = RedisResult<T>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                tracing::warn!(command = command, error = %e, "Redis command failed");
                Err(CacheError::backend(command, e.to_string()))
            }
            Err(_) => {
                tracing::warn!(
                    command = command,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Redis command timed out"
                );
                Err(CacheError::Timeout {
                    command,
                    after: self.timeout,
                })
            }
        }
    }
}

#[async_trait]
impl EntryStore for RedisStore {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let mut conn = self.connection().await?;
        let value: Option<String> = self.bounded("GET", conn.get(key)).await?;

        if value.is_some() {
            tracing::debug!(key = %key, "cache hit");
        } else {
            tracing::debug!(key = %key, "cache miss");
        }
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> CacheResult<()> {
        let mut conn = self.connection().await?;

        match ttl.map(ttl_millis) {
            None => self.bounded::<(), _>("SET", conn.set(key, value)).await?,
            Some(0) => self.bounded::<(), _>("DEL", conn.del(key)).await?,
            Some(ms) => {
                self.bounded::<(), _>("PSETEX", conn.pset_ex(key, value, ms))
                    .await?
            }
        }

        tracing::debug!(key = %key, ttl_ms = ttl.map(ttl_millis), "cache set");
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        let mut conn = self.connection().await?;
        self.bounded::<(), _>("DEL", conn.del(key)).await?;
        tracing::debug!(key = %key, "cache delete");
        Ok(())
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        let mut conn = self.connection().await?;
        self.bounded("EXISTS", conn.exists(key)).await
    }

    async fn increment(&self, key: &str, ttl: Option<Duration>) -> CacheResult<i64> {
        let mut conn = self.connection().await?;
        let mut invocation = INCREMENT_SCRIPT.prepare_invoke();
        invocation.key(key).arg(ttl.map(ttl_millis).unwrap_or(0));

        self.bounded("INCR", invocation.invoke_async(&mut conn)).await
    }

    async fn ttl(&self, key: &str) -> CacheResult<KeyTtl> {
        let mut conn = self.connection().await?;
        let remaining: i64 = self.bounded("PTTL", conn.pttl(key)).await?;
        Ok(KeyTtl::from_millis(remaining))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool> {
        let mut conn = self.connection().await?;
        let ms = i64::try_from(ttl_millis(ttl)).unwrap_or(i64::MAX);
        self.bounded("PEXPIRE", conn.pexpire(key, ms)).await
    }

    async fn delete_if_equals(&self, key: &str, expected: &str) -> CacheResult<bool> {
        let mut conn = self.connection().await?;
        let mut invocation = DELETE_IF_EQUALS_SCRIPT.prepare_invoke();
        invocation.key(key).arg(expected);

        let deleted: i64 = self
            .bounded("DELIFEQ", invocation.invoke_async(&mut conn))
            .await?;
        Ok(deleted == 1)
    }

    async fn health_check(&self) -> CacheResult<bool> {
        let mut conn = self.connection().await?;
        let pong: String = self
            .bounded("PING", ::redis::cmd("PING").query_async(&mut conn))
            .await?;
        Ok(pong == "PONG")
    }

    fn kind(&self) -> CacheBackendKind {
        CacheBackendKind::Redis
    }

    fn close(&self) {
        self.pool.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_to_closed_port_fails_within_timeout() {
        let config = RedisConfig {
            enabled: true,
            host: "127.0.0.1".to_string(),
            port: 1,
            timeout_ms: 500,
            ..RedisConfig::default()
        };

        let started = std::time::Instant::now();
        let err = RedisStore::connect(&config).await.unwrap_err();
        assert!(err.is_unavailable(), "unexpected error: {err}");
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
