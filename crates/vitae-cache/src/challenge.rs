//! One-time challenges: login/verification passcodes and password-reset
//! credentials.
//!
//! ## Key patterns
//!
//! ```text
//! otp:{identifier}       → 6-digit passcode (5 min)
//! reset_token:{email}    → password-reset credential (1 hour)
//! ```
//!
//! Both are single-use: a successful verification deletes the entry with an
//! atomic compare-and-delete, so two concurrent attempts with the right code
//! cannot both succeed. A wrong code leaves the entry in place for a retry
//! within its lifetime. Attempt counting is the rate limiter's job.

use std::time::Duration;

use rand::Rng;

use crate::config::CacheConfig;
use crate::{CacheResult, CacheService};

/// Generate a uniformly random 6-digit numeric passcode.
pub fn generate_otp() -> String {
    let code: u32 = rand::thread_rng().gen_range(0..1_000_000);
    format!("{code:06}")
}

/// Challenge store.
#[derive(Debug, Clone)]
pub struct ChallengeStore {
    cache: CacheService,
    otp_lifetime: Duration,
    reset_lifetime: Duration,
}

impl ChallengeStore {
    pub fn new(cache: CacheService, otp_lifetime: Duration, reset_lifetime: Duration) -> Self {
        Self {
            cache,
            otp_lifetime,
            reset_lifetime,
        }
    }

    pub fn from_config(cache: CacheService, config: &CacheConfig) -> Self {
        Self::new(cache, config.otp_lifetime, config.reset_token_lifetime)
    }

    fn otp_key(identifier: &str) -> String {
        format!("otp:{}", identifier)
    }

    fn reset_key(email: &str) -> String {
        format!("reset_token:{}", email)
    }

    /// Store a passcode for `identifier`, replacing any outstanding one.
    pub async fn store_otp(&self, identifier: &str, code: &str) -> CacheResult<()> {
        let key = Self::otp_key(identifier);
        self.cache.set(&key, code, Some(self.otp_lifetime)).await
    }

    /// Check a passcode, consuming it on success.
    pub async fn verify_otp(&self, identifier: &str, code: &str) -> CacheResult<bool> {
        let key = Self::otp_key(identifier);
        let verified = consume(&self.cache, &key, code).await?;
        tracing::debug!(identifier = %identifier, verified = verified, "otp verification");
        Ok(verified)
    }

    /// Store a password-reset credential for `email`.
    pub async fn store_reset_token(&self, email: &str, token: &str) -> CacheResult<()> {
        let key = Self::reset_key(email);
        self.cache.set(&key, token, Some(self.reset_lifetime)).await
    }

    /// Check a password-reset credential, consuming it on success.
    pub async fn verify_reset_token(&self, email: &str, token: &str) -> CacheResult<bool> {
        let key = Self::reset_key(email);
        consume(&self.cache, &key, token).await
    }

    pub async fn delete_reset_token(&self, email: &str) -> CacheResult<()> {
        self.cache.delete(&Self::reset_key(email)).await
    }
}

async fn consume(cache: &CacheService, key: &str, presented: &str) -> CacheResult<bool> {
    // An empty string never matches, even if one was stored.
    if presented.is_empty() {
        return Ok(false);
    }
    cache.delete_if_equals(key, presented).await
}
