//! Fixed-window rate limiting.
//!
//! Each identity gets a counter at `rate_limit:{identity}` that is created
//! with the window as its TTL. The first request in a window starts it; the
//! counter disappears when the window ends and the next request starts a
//! fresh one.
//!
//! A client that spends its whole allowance at the end of one window and
//! again at the start of the next can get up to `2 * max_requests` through
//! in a short span. That is the accepted cost of a single counter per
//! identity.

use std::time::Duration;

use time::OffsetDateTime;

use crate::config::RateLimitRule;
use crate::store::KeyTtl;
use crate::{CacheResult, CacheService};

/// Identity for authentication endpoints: per client and per account.
pub fn auth_identity(ip: &str, email: &str) -> String {
    format!("{ip}:{email}")
}

/// Identity for general API traffic: per client.
pub fn client_identity(ip: &str) -> String {
    ip.to_string()
}

/// Outcome of one rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Seconds until the current window ends.
    pub reset_in_secs: u64,
}

impl RateLimitDecision {
    /// Absolute end of the window, as a unix timestamp.
    pub fn reset_at(&self, now: OffsetDateTime) -> i64 {
        let reset_in = i64::try_from(self.reset_in_secs).unwrap_or(i64::MAX);
        now.unix_timestamp().saturating_add(reset_in)
    }
}

/// A fixed-window limiter for one request class.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    cache: CacheService,
    rule: RateLimitRule,
}

impl RateLimiter {
    pub fn new(cache: CacheService, rule: RateLimitRule) -> Self {
        Self { cache, rule }
    }

    pub fn rule(&self) -> RateLimitRule {
        self.rule
    }

    pub fn cache(&self) -> &CacheService {
        &self.cache
    }

    fn key(identity: &str) -> String {
        format!("rate_limit:{}", identity)
    }

    /// Count one request for `identity` and decide whether it may proceed.
    ///
    /// Every call counts, including denied ones. A backend error is returned
    /// as `Err` and must be treated as a denial.
    pub async fn check(&self, identity: &str) -> CacheResult<RateLimitDecision> {
        let key = Self::key(identity);
        let limit = i64::from(self.rule.max_requests);

        let count = self.cache.increment(&key, Some(self.rule.window)).await?;
        let remaining = (limit - count).max(0);
        let allowed = count <= limit;

        let reset_in_secs = match self.cache.ttl(&key).await? {
            KeyTtl::Expires(secs) => secs,
            // Expired between the two calls, or a TTL-less leftover.
            KeyTtl::Persistent | KeyTtl::Missing => window_secs(self.rule.window),
        };

        if !allowed {
            tracing::debug!(
                identity = %identity,
                count = count,
                limit = limit,
                reset_in_secs = reset_in_secs,
                "rate limit exceeded"
            );
        }

        Ok(RateLimitDecision {
            allowed,
            limit: self.rule.max_requests,
            remaining: u32::try_from(remaining).unwrap_or(0),
            reset_in_secs,
        })
    }
}

fn window_secs(window: Duration) -> u64 {
    window.as_secs() + u64::from(window.subsec_nanos() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::Arc;
    use time::macros::datetime;

    fn limiter(clock: Arc<ManualClock>, max_requests: u32, window_secs: u64) -> RateLimiter {
        let cache = CacheService::local(Duration::from_secs(3600), clock);
        RateLimiter::new(
            cache,
            RateLimitRule {
                max_requests,
                window: Duration::from_secs(window_secs),
            },
        )
    }

    #[tokio::test]
    async fn test_five_per_minute_then_denied() {
        let clock = Arc::new(ManualClock::new(datetime!(2024-05-10 12:00:00 UTC)));
        let limiter = limiter(clock, 5, 60);
        let identity = auth_identity("1.2.3.4", "a@b.com");

        for expected_remaining in [4, 3, 2, 1, 0] {
            let decision = limiter.check(&identity).await.unwrap();
            assert!(decision.allowed);
            assert_eq!(decision.remaining, expected_remaining);
            assert_eq!(decision.limit, 5);
            assert!(decision.reset_in_secs <= 60);
        }

        let denied = limiter.check(&identity).await.unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
    }

    #[tokio::test]
    async fn test_window_resets_after_ttl() {
        let clock = Arc::new(ManualClock::new(datetime!(2024-05-10 12:00:00 UTC)));
        let limiter = limiter(clock.clone(), 2, 60);

        for _ in 0..3 {
            limiter.check("9.9.9.9").await.unwrap();
        }
        assert!(!limiter.check("9.9.9.9").await.unwrap().allowed);

        clock.advance(Duration::from_secs(30));
        let mid = limiter.check("9.9.9.9").await.unwrap();
        assert!(!mid.allowed);
        assert_eq!(mid.reset_in_secs, 30);

        clock.advance(Duration::from_secs(30));
        let fresh = limiter.check("9.9.9.9").await.unwrap();
        assert!(fresh.allowed);
        assert_eq!(fresh.remaining, 1);
        assert_eq!(fresh.reset_in_secs, 60);
    }

    #[tokio::test]
    async fn test_identities_are_independent() {
        let clock = Arc::new(ManualClock::new(datetime!(2024-05-10 12:00:00 UTC)));
        let limiter = limiter(clock, 1, 60);

        assert!(limiter.check(&client_identity("1.1.1.1")).await.unwrap().allowed);
        assert!(!limiter.check(&client_identity("1.1.1.1")).await.unwrap().allowed);
        assert!(limiter.check(&client_identity("2.2.2.2")).await.unwrap().allowed);
        assert!(
            limiter
                .check(&auth_identity("1.1.1.1", "x@y.z"))
                .await
                .unwrap()
                .allowed
        );
    }

    #[tokio::test]
    async fn test_persistent_counter_reports_full_window() {
        let clock = Arc::new(ManualClock::new(datetime!(2024-05-10 12:00:00 UTC)));
        let limiter = limiter(clock, 5, 90);
        limiter
            .cache()
            .set("rate_limit:stale", "2", None)
            .await
            .unwrap();

        let decision = limiter.check("stale").await.unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 2);
        assert_eq!(decision.reset_in_secs, 90);
    }

    #[test]
    fn test_reset_at_is_unix_timestamp() {
        let decision = RateLimitDecision {
            allowed: true,
            limit: 5,
            remaining: 4,
            reset_in_secs: 60,
        };
        let now = datetime!(2024-01-01 00:00:00 UTC);
        assert_eq!(decision.reset_at(now), now.unix_timestamp() + 60);
    }
}
