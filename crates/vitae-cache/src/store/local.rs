//! In-process entry store.
//!
//! Entries live in a [`DashMap`]. Expiry is checked lazily on every access,
//! which is the source of truth; the background sweep only bounds memory.
//!
//! Read-modify-write operations (`increment`, `expire`, `delete_if_equals`)
//! run while holding the shard lock for the key, so concurrent callers on
//! the same key are serialized and the sweep can never drop an update.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::{CacheBackendKind, EntryStore, KeyTtl, parse_counter, ttl_millis};
use crate::CacheResult;
use crate::clock::SharedClock;

/// Floor for the sweep period; `tokio::time::interval` rejects zero.
pub const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(1);

/// A stored value with optional expiry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CachedEntry {
    pub value: String,
    pub expires_at: Option<OffsetDateTime>,
}

impl CachedEntry {
    fn new(value: String, ttl: Option<Duration>, now: OffsetDateTime) -> Self {
        Self {
            value,
            expires_at: ttl.filter(|t| !t.is_zero()).and_then(|t| deadline(now, t)),
        }
    }

    /// An entry is dead from the instant `now >= expires_at`.
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }

    fn remaining(&self, now: OffsetDateTime) -> KeyTtl {
        match self.expires_at {
            None => KeyTtl::Persistent,
            Some(at) if now >= at => KeyTtl::Missing,
            Some(at) => {
                let millis = (at - now).whole_milliseconds();
                let secs = (millis + 999) / 1000;
                KeyTtl::Expires(u64::try_from(secs).unwrap_or(u64::MAX))
            }
        }
    }
}

/// `now + ttl` at millisecond resolution, or `None` when the deadline is
/// beyond the calendar range (treated as "never").
fn deadline(now: OffsetDateTime, ttl: Duration) -> Option<OffsetDateTime> {
    let millis = i64::try_from(ttl_millis(ttl)).ok()?;
    now.checked_add(time::Duration::milliseconds(millis))
}

/// Local store statistics.
#[derive(Debug, Clone, Default)]
pub struct LocalStoreStats {
    /// Entries physically present, expired or not.
    pub entries: usize,
    /// Entries removed because they expired (lazily or by the sweep).
    pub evictions: u64,
}

/// Single-process entry store.
pub struct LocalStore {
    entries: DashMap<String, CachedEntry>,
    clock: SharedClock,
    evictions: AtomicU64,
}

impl std::fmt::Debug for LocalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalStore")
            .field("entries", &self.entries.len())
            .field("clock", &self.clock)
            .finish()
    }
}

impl LocalStore {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
            evictions: AtomicU64::new(0),
        }
    }

    pub fn stats(&self) -> LocalStoreStats {
        LocalStoreStats {
            entries: self.entries.len(),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    /// Start the background sweep. It stops when `shutdown` is cancelled.
    ///
    /// A zero interval is raised to [`MIN_SWEEP_INTERVAL`].
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let store = Arc::clone(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(MIN_SWEEP_INTERVAL));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::debug!("local store sweeper stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        let removed = store.remove_expired();
                        if removed > 0 {
                            tracing::debug!(removed = removed, "swept expired cache entries");
                        }
                    }
                }
            }
        })
    }

    fn remove_expired(&self) -> usize {
        let now = self.clock.now();
        let mut removed = 0;

        self.entries.retain(|_, entry| {
            if entry.is_expired(now) {
                removed += 1;
                false
            } else {
                true
            }
        });

        if removed > 0 {
            self.evictions.fetch_add(removed as u64, Ordering::Relaxed);
        }
        removed
    }

    /// Lazy expiry. Only removes the entry if it is still expired under the
    /// lock, so a value written in between survives.
    fn evict_if_expired(&self, key: &str, now: OffsetDateTime) {
        if self
            .entries
            .remove_if(key, |_, entry| entry.is_expired(now))
            .is_some()
        {
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[async_trait]
impl EntryStore for LocalStore {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let now = self.clock.now();
        let found = self
            .entries
            .get(key)
            .map(|entry| (!entry.is_expired(now)).then(|| entry.value.clone()));

        match found {
            Some(Some(value)) => Ok(Some(value)),
            Some(None) => {
                self.evict_if_expired(key, now);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> CacheResult<()> {
        if ttl.is_some_and(|t| t.is_zero()) {
            self.entries.remove(key);
            return Ok(());
        }

        let now = self.clock.now();
        self.entries
            .insert(key.to_string(), CachedEntry::new(value.to_string(), ttl, now));
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        Ok(self.get(key).await?.is_some())
    }

    async fn increment(&self, key: &str, ttl: Option<Duration>) -> CacheResult<i64> {
        let now = self.clock.now();

        let next = match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) if !occupied.get().is_expired(now) => {
                let entry = occupied.get_mut();
                let next = parse_counter(&entry.value).checked_add(1).unwrap_or(1);
                entry.value = next.to_string();
                next
            }
            Entry::Occupied(mut occupied) => {
                // Dead entry: this increment starts a new key.
                occupied.insert(CachedEntry::new("1".to_string(), ttl, now));
                self.evictions.fetch_add(1, Ordering::Relaxed);
                1
            }
            Entry::Vacant(vacant) => {
                vacant.insert(CachedEntry::new("1".to_string(), ttl, now));
                1
            }
        };

        Ok(next)
    }

    async fn ttl(&self, key: &str) -> CacheResult<KeyTtl> {
        let now = self.clock.now();
        let remaining = self.entries.get(key).map(|entry| entry.remaining(now));

        match remaining {
            Some(KeyTtl::Missing) => {
                self.evict_if_expired(key, now);
                Ok(KeyTtl::Missing)
            }
            Some(ttl) => Ok(ttl),
            None => Ok(KeyTtl::Missing),
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool> {
        let now = self.clock.now();

        if ttl.is_zero() {
            let removed = self
                .entries
                .remove_if(key, |_, entry| !entry.is_expired(now))
                .is_some();
            if !removed {
                self.evict_if_expired(key, now);
            }
            return Ok(removed);
        }

        let updated = match self.entries.get_mut(key) {
            Some(mut entry) if !entry.is_expired(now) => {
                entry.expires_at = deadline(now, ttl);
                true
            }
            _ => false,
        };

        if !updated {
            self.evict_if_expired(key, now);
        }
        Ok(updated)
    }

    async fn delete_if_equals(&self, key: &str, expected: &str) -> CacheResult<bool> {
        let now = self.clock.now();
        let removed = self
            .entries
            .remove_if(key, |_, entry| {
                !entry.is_expired(now) && entry.value == expected
            })
            .is_some();
        Ok(removed)
    }

    async fn health_check(&self) -> CacheResult<bool> {
        Ok(true)
    }

    fn kind(&self) -> CacheBackendKind {
        CacheBackendKind::Local
    }

    fn sweep_expired(&self) -> usize {
        self.remove_expired()
    }
}
