//! Sliding-window rate limiting over the shared cache.
use std::sync::Arc;

use crate::{
    core::model::{RateLimitScope, RateLimitSettings},
    ports::{CacheResult, SharedCache},
    utils::now_millis,
};

/// The counting window. Fixed at one second; burst size widens the limit,
/// not the window.
pub const WINDOW_MS: u64 = 1_000;

/// Outcome of one rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Requests left in the window after this one.
    pub remaining: u32,
    /// When the window frees up, in epoch milliseconds.
    pub reset_at_ms: u64,
    /// Effective window limit.
    pub limit: u32,
}

impl RateLimitDecision {
    /// Seconds a denied caller should wait before retrying, rounded up and
    /// never zero.
    pub fn retry_after_secs(&self, now_ms: u64) -> u64 {
        let wait_ms = self.reset_at_ms.saturating_sub(now_ms);
        wait_ms.div_ceil(1_000).max(1)
    }
}

/// Sliding-window limiter backed by shared-cache sorted sets.
///
/// Every check is one atomic pipeline: evict entries older than the window,
/// count the survivors, record the candidate, refresh the TTL and read the
/// oldest score. A denied request's member is removed again so denials never
/// consume future quota. Nonced members disambiguate simultaneous requests
/// with identical timestamps.
pub struct SlidingWindowLimiter {
    cache: Arc<dyn SharedCache>,
}

impl SlidingWindowLimiter {
    pub fn new(cache: Arc<dyn SharedCache>) -> Self {
        Self { cache }
    }

    fn window_key(scope: &RateLimitScope) -> String {
        format!("ratelimit:{scope}")
    }

    /// Check and record one request against the scope's window.
    ///
    /// Cache failures here are critical-path errors: the caller surfaces
    /// them as 500 rather than silently admitting unmetered traffic.
    pub async fn check(
        &self,
        scope: &RateLimitScope,
        settings: &RateLimitSettings,
    ) -> CacheResult<RateLimitDecision> {
        let limit = settings.effective_limit();
        let now = now_millis() as u64;
        let member = format!("{now}:{}", uuid::Uuid::new_v4().simple());
        let key = Self::window_key(scope);
        let ttl_secs = WINDOW_MS.div_ceil(1_000) + 1;

        let snapshot = self
            .cache
            .window_record(&key, now.saturating_sub(WINDOW_MS), &member, now, ttl_secs)
            .await?;

        let reset_at_ms = snapshot.oldest_score.unwrap_or(now) + WINDOW_MS;

        if snapshot.count_before >= u64::from(limit) {
            self.cache.window_remove(&key, &member).await?;
            return Ok(RateLimitDecision {
                allowed: false,
                remaining: 0,
                reset_at_ms,
                limit,
            });
        }

        let remaining = (i64::from(limit) - snapshot.count_before as i64 - 1).max(0) as u32;
        Ok(RateLimitDecision {
            allowed: true,
            remaining,
            reset_at_ms,
            limit,
        })
    }
}
