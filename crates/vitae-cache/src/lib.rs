//! # vitae-cache
//!
//! Unified cache and quota service for the Vitae platform.
//!
//! This crate provides:
//! - A TTL-aware key/value store with two interchangeable backends: Redis,
//!   and an in-process fallback used when Redis is disabled or unreachable
//! - Refresh-token storage (one live token per user)
//! - Single-use passcodes and password-reset credentials
//! - Fixed-window rate limiting
//! - Monthly usage quotas
//!
//! ## Modules
//!
//! - [`service`] - The cache facade every primitive is built on
//! - [`store`] - Entry store trait and its Redis/local implementations
//! - [`session`] - Refresh-token storage
//! - [`challenge`] - One-time passcodes and reset credentials
//! - [`rate_limit`] - Fixed-window rate limiter
//! - [`quota`] - Monthly usage counters
//! - [`config`] - Configuration sections owned by this crate
//! - [`clock`] - Injectable wall clock
//!
//! ## Failure semantics
//!
//! A missing key is never an error. A backend that cannot answer is always
//! an error ([`CacheError`]), and every security-relevant check built here
//! returns it to the caller instead of guessing.

pub mod challenge;
pub mod clock;
pub mod config;
pub mod error;
pub mod quota;
pub mod rate_limit;
pub mod service;
pub mod session;
pub mod store;

pub use challenge::{ChallengeStore, generate_otp};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock, system_clock};
pub use config::{CacheConfig, ConfigError, RateLimitRule, RateLimitingConfig, RedisConfig};
pub use error::{CacheError, CacheResult};
pub use quota::{PlanCeiling, QuotaMeter, seconds_until_next_month};
pub use rate_limit::{RateLimitDecision, RateLimiter, auth_identity, client_identity};
pub use service::CacheService;
pub use session::SessionStore;
pub use store::{CacheBackendKind, EntryStore, KeyTtl, LocalStore, RedisStore};
