//! Refresh credential storage.
//!
//! One live refresh token per user under `refresh_token:{user_id}`. Issuing
//! a new token overwrites the old one, which is how rotation invalidates
//! previous tokens without a revocation list.

use std::time::Duration;

use crate::config::CacheConfig;
use crate::{CacheResult, CacheService};

/// Session token store.
#[derive(Debug, Clone)]
pub struct SessionStore {
    cache: CacheService,
    refresh_lifetime: Duration,
}

impl SessionStore {
    pub fn new(cache: CacheService, refresh_lifetime: Duration) -> Self {
        Self {
            cache,
            refresh_lifetime,
        }
    }

    pub fn from_config(cache: CacheService, config: &CacheConfig) -> Self {
        Self::new(cache, config.refresh_token_lifetime)
    }

    fn refresh_key(user_id: &str) -> String {
        format!("refresh_token:{}", user_id)
    }

    /// Store the user's refresh token with the configured lifetime,
    /// replacing any previous one.
    pub async fn store_refresh_token(&self, user_id: &str, token: &str) -> CacheResult<()> {
        self.store_refresh_token_with_ttl(user_id, token, self.refresh_lifetime)
            .await
    }

    pub async fn store_refresh_token_with_ttl(
        &self,
        user_id: &str,
        token: &str,
        ttl: Duration,
    ) -> CacheResult<()> {
        let key = Self::refresh_key(user_id);
        self.cache.set(&key, token, Some(ttl)).await?;
        tracing::debug!(user_id = %user_id, ttl_secs = ttl.as_secs(), "refresh token stored");
        Ok(())
    }

    /// Whether `token` is the user's current refresh token.
    ///
    /// Does not consume the token. A backend error is returned as `Err`;
    /// callers must treat it as a failed verification.
    pub async fn verify_refresh_token(&self, user_id: &str, token: &str) -> CacheResult<bool> {
        let key = Self::refresh_key(user_id);
        let stored = self.cache.get(&key).await?;
        Ok(stored.is_some_and(|stored| stored == token))
    }

    /// Revoke the user's refresh token (logout).
    pub async fn delete_refresh_token(&self, user_id: &str) -> CacheResult<()> {
        let key = Self::refresh_key(user_id);
        self.cache.delete(&key).await?;
        tracing::debug!(user_id = %user_id, "refresh token revoked");
        Ok(())
    }
}
