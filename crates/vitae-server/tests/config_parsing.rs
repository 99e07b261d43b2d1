use std::{env, fs, time::Duration};

use vitae_server::config::loader::load_config;

#[test]
fn config_parsing_and_env_overrides_and_validation() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let path = dir.path().join("vitae.toml");

    let toml_content = r#"
[server]
host = "127.0.0.1"
port = 8081

[logging]
level = "debug"

[redis]
enabled = false
host = "cache.internal"
port = 6380
timeout_ms = 1500

[cache]
sweep_interval = "30s"
refresh_token_lifetime = "14d"
otp_lifetime = "10m"

[rate_limiting.auth]
max_requests = 3
window = "1m"

[rate_limiting.api]
max_requests = 50
window = "15m"
"#;
    fs::write(&path, toml_content).expect("write toml");

    // 1) Valid config parses; unset keys keep their defaults
    let cfg = load_config(path.to_str()).expect("should parse config");
    assert_eq!(cfg.server.port, 8081);
    assert_eq!(cfg.logging.level, "debug");
    assert_eq!(cfg.redis.port, 6380);
    assert_eq!(cfg.redis.timeout_ms, 1500);
    assert_eq!(cfg.redis.pool_size, 10);
    assert_eq!(cfg.cache.sweep_interval, Duration::from_secs(30));
    assert_eq!(
        cfg.cache.refresh_token_lifetime,
        Duration::from_secs(14 * 86_400)
    );
    assert_eq!(cfg.cache.otp_lifetime, Duration::from_secs(600));
    assert_eq!(cfg.cache.reset_token_lifetime, Duration::from_secs(3600));
    assert_eq!(cfg.rate_limiting.auth.max_requests, 3);
    assert_eq!(cfg.rate_limiting.auth.window, Duration::from_secs(60));
    assert_eq!(cfg.rate_limiting.api.max_requests, 50);

    // 2) Env override should win over file
    unsafe {
        env::set_var("VITAE__REDIS__ENABLED", "true");
        env::set_var("VITAE__RATE_LIMITING__API__MAX_REQUESTS", "7");
    }
    let cfg_env = load_config(path.to_str()).expect("should parse config with env overrides");
    assert!(cfg_env.redis.enabled);
    assert_eq!(cfg_env.rate_limiting.api.max_requests, 7);
    unsafe {
        env::remove_var("VITAE__REDIS__ENABLED");
        env::remove_var("VITAE__RATE_LIMITING__API__MAX_REQUESTS");
    }

    // 3) Missing file means defaults
    let missing = dir.path().join("absent.toml");
    let cfg_default = load_config(missing.to_str()).expect("defaults should be valid");
    assert_eq!(cfg_default.server.port, 8080);
    assert!(!cfg_default.redis.enabled);

    // 4) Invalid config should error
    let invalid_path = dir.path().join("invalid.toml");
    let invalid_toml = r#"
[rate_limiting.auth]
max_requests = 0
window = "1m"
"#;
    fs::write(&invalid_path, invalid_toml).expect("write invalid toml");
    let err = load_config(invalid_path.to_str()).expect_err("expected validation error");
    assert!(err.contains("rate_limiting.auth.max_requests"));

    // 5) Unparseable duration is a deserialize error
    let bad_duration = dir.path().join("bad_duration.toml");
    fs::write(&bad_duration, "[cache]\notp_lifetime = \"soon\"\n").expect("write toml");
    let err = load_config(bad_duration.to_str()).expect_err("expected deserialize error");
    assert!(err.contains("deserialize"));
}
