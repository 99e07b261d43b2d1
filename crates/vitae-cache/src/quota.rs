//! Monthly usage quotas.
//!
//! Counters live at `ai_usage:{user_id}` and expire at the next calendar
//! month boundary in UTC. The TTL is computed before the increment and
//! attached atomically when the counter is created. A first count that lands
//! on a counter without expiry (a malformed leftover) gets the TTL attached
//! afterwards.
//!
//! The quota ceiling itself belongs to the caller's plan; this module only
//! counts.

use std::time::Duration;

use time::{Date, OffsetDateTime, UtcOffset};

use crate::store::{KeyTtl, parse_counter};
use crate::{CacheError, CacheResult, CacheService};

/// A plan's monthly allowance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanCeiling {
    Limited(u64),
    Unlimited,
}

impl PlanCeiling {
    /// Decode the stored representation: `-1` means unlimited.
    ///
    /// Any other negative value permits nothing.
    pub fn from_raw(raw: i64) -> Self {
        match raw {
            -1 => Self::Unlimited,
            n => Self::Limited(u64::try_from(n).unwrap_or(0)),
        }
    }

    /// Whether a user who has used `count` units may use one more.
    /// A negative count is treated as 0.
    pub fn permits(&self, count: i64) -> bool {
        match self {
            Self::Unlimited => true,
            Self::Limited(max) => u64::try_from(count).unwrap_or(0) < *max,
        }
    }
}

/// Time left until the first instant of the next calendar month (UTC),
/// rounded up to whole seconds. Never zero.
pub fn seconds_until_next_month(now: OffsetDateTime) -> CacheResult<Duration> {
    let now = now.to_offset(UtcOffset::UTC);
    let (year, month) = match now.month() {
        time::Month::December => (now.year() + 1, time::Month::January),
        month => (now.year(), month.next()),
    };

    let boundary = Date::from_calendar_date(year, month, 1)
        .map_err(|e| CacheError::clock(format!("no month after {}: {e}", now.date())))?
        .midnight()
        .assume_utc();

    let remaining = boundary - now;
    let whole = u64::try_from(remaining.whole_seconds()).unwrap_or(0);
    let secs = whole + u64::from(remaining.subsec_nanoseconds() > 0);
    Ok(Duration::from_secs(secs.max(1)))
}

/// Per-user monthly usage counter.
#[derive(Debug, Clone)]
pub struct QuotaMeter {
    cache: CacheService,
}

impl QuotaMeter {
    pub fn new(cache: CacheService) -> Self {
        Self { cache }
    }

    fn usage_key(user_id: &str) -> String {
        format!("ai_usage:{}", user_id)
    }

    /// Record one unit of usage and return the count for the current month,
    /// including this one.
    pub async fn record_usage(&self, user_id: &str) -> CacheResult<i64> {
        let until_reset = seconds_until_next_month(self.cache.clock().now())?;
        let key = Self::usage_key(user_id);
        let count = self.cache.increment(&key, Some(until_reset)).await?;

        if count == 1 && self.cache.ttl(&key).await? == KeyTtl::Persistent {
            self.cache.expire(&key, until_reset).await?;
            tracing::debug!(user_id = %user_id, "attached month expiry to stale usage counter");
        }

        tracing::debug!(
            user_id = %user_id,
            count = count,
            resets_in_secs = until_reset.as_secs(),
            "usage recorded"
        );
        Ok(count)
    }

    /// Units used so far this month. A missing or malformed counter reads
    /// as 0, the same value an increment would start from.
    pub async fn current_usage(&self, user_id: &str) -> CacheResult<i64> {
        let key = Self::usage_key(user_id);
        let value = self.cache.get(&key).await?;
        Ok(value.as_deref().map_or(0, parse_counter))
    }
}
