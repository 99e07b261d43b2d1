//! The cache facade.
//!
//! [`CacheService`] is the only handle the rest of the application holds.
//! It is constructed once at startup, cloned into every primitive that needs
//! it, and shut down explicitly.
//!
//! ## Backend selection
//!
//! - **Redis disabled**: local store with a background sweep
//! - **Redis enabled**: connect and `PING`; on failure, fall back to the
//!   local store for the rest of the process lifetime
//!
//! There is no automatic switch back to Redis. A restart is required.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::CacheResult;
use crate::clock::{SharedClock, system_clock};
use crate::config::{CacheConfig, RedisConfig};
use crate::store::{CacheBackendKind, EntryStore, KeyTtl, LocalStore, RedisStore};

struct Inner {
    store: Arc<dyn EntryStore>,
    clock: SharedClock,
    shutdown: CancellationToken,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Uniform key/value operations over whichever entry store is active.
#[derive(Clone)]
pub struct CacheService {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for CacheService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheService")
            .field("backend", &self.backend())
            .field("shut_down", &self.inner.shutdown.is_cancelled())
            .finish()
    }
}

impl CacheService {
    /// Create the cache service from configuration with graceful degradation.
    ///
    /// Never fails: if Redis is enabled but unreachable, logs a warning and
    /// returns a local-store service instead.
    pub async fn connect(redis: &RedisConfig, cache: &CacheConfig) -> Self {
        Self::connect_with_clock(redis, cache, system_clock()).await
    }

    /// [`connect`](Self::connect) with an explicit clock.
    pub async fn connect_with_clock(
        redis: &RedisConfig,
        cache: &CacheConfig,
        clock: SharedClock,
    ) -> Self {
        if !redis.enabled {
            tracing::info!("Redis disabled, using local cache store");
            return Self::local(cache.sweep_interval, clock);
        }

        tracing::info!(url = %redis.redacted_url(), "Connecting to Redis");

        match RedisStore::connect(redis).await {
            Ok(store) => {
                tracing::info!("Connected to Redis successfully");
                Self::with_store(Arc::new(store), clock)
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "Failed to connect to Redis. Falling back to local cache store until restart."
                );
                Self::local(cache.sweep_interval, clock)
            }
        }
    }

    /// Local store with a background sweep every `sweep_interval`
    /// (at least [`MIN_SWEEP_INTERVAL`](crate::store::local::MIN_SWEEP_INTERVAL)).
    ///
    /// Must be called from within a Tokio runtime.
    pub fn local(sweep_interval: Duration, clock: SharedClock) -> Self {
        let store = Arc::new(LocalStore::new(clock.clone()));
        let shutdown = CancellationToken::new();
        let sweeper = store.spawn_sweeper(sweep_interval, shutdown.clone());

        Self {
            inner: Arc::new(Inner {
                store,
                clock,
                shutdown,
                sweeper: Mutex::new(Some(sweeper)),
            }),
        }
    }

    /// Wrap an existing store. No background task is started.
    pub fn with_store(store: Arc<dyn EntryStore>, clock: SharedClock) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                clock,
                shutdown: CancellationToken::new(),
                sweeper: Mutex::new(None),
            }),
        }
    }

    /// Stop the sweep and release backend connections. Idempotent.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();

        let sweeper = self.inner.sweeper.lock().take();
        if let Some(handle) = sweeper {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "cache sweeper ended abnormally");
            }
        }

        self.inner.store.close();
        tracing::info!(backend = %self.backend(), "Cache service shut down");
    }

    pub fn backend(&self) -> CacheBackendKind {
        self.inner.store.kind()
    }

    pub fn clock(&self) -> &SharedClock {
        &self.inner.clock
    }

    pub async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> CacheResult<()> {
        self.inner.store.set(key, value, ttl).await
    }

    pub async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        self.inner.store.get(key).await
    }

    pub async fn delete(&self, key: &str) -> CacheResult<()> {
        self.inner.store.delete(key).await
    }

    pub async fn exists(&self, key: &str) -> CacheResult<bool> {
        self.inner.store.exists(key).await
    }

    /// See [`EntryStore::increment`].
    pub async fn increment(&self, key: &str, ttl: Option<Duration>) -> CacheResult<i64> {
        self.inner.store.increment(key, ttl).await
    }

    pub async fn ttl(&self, key: &str) -> CacheResult<KeyTtl> {
        self.inner.store.ttl(key).await
    }

    pub async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool> {
        self.inner.store.expire(key, ttl).await
    }

    /// See [`EntryStore::delete_if_equals`].
    pub async fn delete_if_equals(&self, key: &str, expected: &str) -> CacheResult<bool> {
        self.inner.store.delete_if_equals(key, expected).await
    }

    pub async fn health_check(&self) -> CacheResult<bool> {
        self.inner.store.health_check().await
    }

    /// Run one sweep now. Always 0 for Redis.
    pub fn sweep_expired(&self) -> usize {
        self.inner.store.sweep_expired()
    }
}
