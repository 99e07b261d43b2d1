//! Integration tests for the primitives built on the cache facade, including
//! their behavior when the backend fails.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use time::macros::datetime;
use vitae_cache::{
    CacheBackendKind, CacheConfig, CacheError, CacheResult, CacheService, ChallengeStore,
    EntryStore, KeyTtl, ManualClock, QuotaMeter, RateLimitRule, RateLimiter, SessionStore,
    auth_identity, generate_otp, system_clock,
};

/// A store whose backend is always down.
struct UnreachableStore;

#[async_trait]
impl EntryStore for UnreachableStore {
    async fn get(&self, _key: &str) -> CacheResult<Option<String>> {
        Err(down("GET"))
    }

    async fn set(&self, _key: &str, _value: &str, _ttl: Option<Duration>) -> CacheResult<()> {
        Err(down("SET"))
    }

    async fn delete(&self, _key: &str) -> CacheResult<()> {
        Err(down("DEL"))
    }

    async fn exists(&self, _key: &str) -> CacheResult<bool> {
        Err(down("EXISTS"))
    }

    async fn increment(&self, _key: &str, _ttl: Option<Duration>) -> CacheResult<i64> {
        Err(down("INCR"))
    }

    async fn ttl(&self, _key: &str) -> CacheResult<KeyTtl> {
        Err(down("PTTL"))
    }

    async fn expire(&self, _key: &str, _ttl: Duration) -> CacheResult<bool> {
        Err(down("PEXPIRE"))
    }

    async fn delete_if_equals(&self, _key: &str, _expected: &str) -> CacheResult<bool> {
        Err(down("DELIFEQ"))
    }

    async fn health_check(&self) -> CacheResult<bool> {
        Err(down("PING"))
    }

    fn kind(&self) -> CacheBackendKind {
        CacheBackendKind::Redis
    }
}

fn down(command: &'static str) -> CacheError {
    CacheError::Timeout {
        command,
        after: Duration::from_millis(2000),
    }
}

fn unreachable_cache() -> CacheService {
    CacheService::with_store(Arc::new(UnreachableStore), system_clock())
}

#[tokio::test]
async fn test_refresh_token_rotation_invalidates_previous() {
    let cache = CacheService::local(Duration::from_secs(60), system_clock());
    let sessions = SessionStore::from_config(cache, &CacheConfig::default());

    sessions.store_refresh_token("user-1", "first").await.unwrap();
    sessions.store_refresh_token("user-1", "second").await.unwrap();

    assert!(!sessions.verify_refresh_token("user-1", "first").await.unwrap());
    assert!(sessions.verify_refresh_token("user-1", "second").await.unwrap());
}

#[tokio::test]
async fn test_otp_is_single_use() {
    let cache = CacheService::local(Duration::from_secs(60), system_clock());
    let challenges = ChallengeStore::from_config(cache, &CacheConfig::default());
    let code = generate_otp();

    challenges.store_otp("a@b.com", &code).await.unwrap();
    assert!(challenges.verify_otp("a@b.com", &code).await.unwrap());
    assert!(!challenges.verify_otp("a@b.com", &code).await.unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_otp_verification_succeeds_once() {
    let cache = CacheService::local(Duration::from_secs(60), system_clock());
    let challenges = ChallengeStore::from_config(cache, &CacheConfig::default());
    challenges.store_otp("race@b.com", "424242").await.unwrap();

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let challenges = challenges.clone();
            tokio::spawn(async move {
                challenges
                    .verify_otp("race@b.com", "424242")
                    .await
                    .unwrap()
            })
        })
        .collect();

    let mut successes = 0;
    for handle in handles {
        if handle.await.unwrap() {
            successes += 1;
        }
    }
    assert_eq!(successes, 1);
}

#[tokio::test]
async fn test_rate_limit_and_quota_share_one_cache() {
    let clock = Arc::new(ManualClock::new(datetime!(2024-01-31 23:59:00 UTC)));
    let cache = CacheService::local(Duration::from_secs(60), clock.clone());
    let limiter = RateLimiter::new(
        cache.clone(),
        RateLimitRule {
            max_requests: 5,
            window: Duration::from_secs(60),
        },
    );
    let quota = QuotaMeter::new(cache);
    let identity = auth_identity("10.0.0.1", "a@b.com");

    let remaining: Vec<u32> = {
        let mut out = Vec::new();
        for _ in 0..5 {
            out.push(limiter.check(&identity).await.unwrap().remaining);
        }
        out
    };
    assert_eq!(remaining, vec![4, 3, 2, 1, 0]);
    assert!(!limiter.check(&identity).await.unwrap().allowed);

    assert_eq!(quota.record_usage("u1").await.unwrap(), 1);
    assert_eq!(quota.record_usage("u1").await.unwrap(), 2);

    clock.advance(Duration::from_secs(60));
    assert!(limiter.check(&identity).await.unwrap().allowed);
    assert_eq!(quota.record_usage("u1").await.unwrap(), 1);
}

#[tokio::test]
async fn test_backend_errors_fail_closed() {
    let cache = unreachable_cache();

    let sessions = SessionStore::from_config(cache.clone(), &CacheConfig::default());
    let err = sessions.verify_refresh_token("u", "t").await.unwrap_err();
    assert!(err.is_unavailable());

    let challenges = ChallengeStore::from_config(cache.clone(), &CacheConfig::default());
    assert!(challenges.verify_otp("a@b.com", "123456").await.is_err());
    assert!(challenges.verify_reset_token("a@b.com", "tok").await.is_err());

    let limiter = RateLimiter::new(
        cache.clone(),
        RateLimitRule {
            max_requests: 5,
            window: Duration::from_secs(60),
        },
    );
    assert!(limiter.check("1.2.3.4").await.is_err());

    let quota = QuotaMeter::new(cache.clone());
    assert!(quota.record_usage("u").await.is_err());
    assert!(quota.current_usage("u").await.is_err());

    assert!(cache.health_check().await.is_err());
}
