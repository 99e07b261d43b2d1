//! Startup fallback: an enabled but unreachable Redis must not prevent the
//! service from starting.

use std::time::Duration;

use vitae_cache::{CacheBackendKind, CacheConfig, CacheService, KeyTtl, RedisConfig};

fn unreachable_redis() -> RedisConfig {
    RedisConfig {
        enabled: true,
        host: "127.0.0.1".to_string(),
        // Nothing listens on port 1.
        port: 1,
        timeout_ms: 300,
        ..RedisConfig::default()
    }
}

#[tokio::test]
async fn test_unreachable_redis_falls_back_to_local() {
    let cache = CacheService::connect(&unreachable_redis(), &CacheConfig::default()).await;
    assert_eq!(cache.backend(), CacheBackendKind::Local);
    assert!(cache.health_check().await.unwrap());

    cache
        .set("k", "v", Some(Duration::from_secs(30)))
        .await
        .unwrap();
    assert_eq!(cache.get("k").await.unwrap(), Some("v".to_string()));
    assert_eq!(cache.increment("n", None).await.unwrap(), 1);
    assert_eq!(cache.ttl("n").await.unwrap(), KeyTtl::Persistent);

    cache.shutdown().await;
}

#[tokio::test]
async fn test_fallback_is_fast() {
    let started = std::time::Instant::now();
    let cache = CacheService::connect(&unreachable_redis(), &CacheConfig::default()).await;
    assert!(started.elapsed() < Duration::from_secs(5));
    cache.shutdown().await;
}
