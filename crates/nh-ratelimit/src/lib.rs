//! Token-bucket rate limiting, keyed per platform (spec.md §4.2).
//!
//! One mutex guards each bucket's state; refill is computed lazily on every
//! access rather than via a background ticker, so an idle bucket costs
//! nothing between calls. No lock is held across an `await` — `tryConsume`
//! is synchronous and `consumeWithDeadline` re-acquires the lock each poll.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Per-platform tunables. `requests_per_second <= 0` or `enabled == false`
/// produces a no-op limiter that always yields.
#[derive(Debug, Clone, Copy)]
pub struct RateLimiterConfig {
    pub requests_per_second: f64,
    pub burst_size: u32,
    pub enabled: bool,
}

impl RateLimiterConfig {
    pub fn new(requests_per_second: f64, burst_size: u32) -> Self {
        Self {
            requests_per_second,
            burst_size,
            enabled: true,
        }
    }

    pub fn disabled() -> Self {
        Self {
            requests_per_second: 0.0,
            burst_size: 0,
            enabled: false,
        }
    }

    fn is_noop(&self) -> bool {
        !self.enabled || self.requests_per_second <= 0.0
    }
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self::new(10.0, 10)
    }
}

struct BucketState {
    tokens: f64,
    last_refill_at: Instant,
}

/// A single token bucket. `tryConsume`/`consumeWithDeadline`/`available` are
/// the only operations; all are O(1) plus the cost of the mutex.
pub struct RateLimiter {
    config: RateLimiterConfig,
    state: Option<Mutex<BucketState>>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        let state = if config.is_noop() {
            None
        } else {
            Some(Mutex::new(BucketState {
                tokens: config.burst_size as f64,
                last_refill_at: Instant::now(),
            }))
        };
        Self { config, state }
    }

    pub fn disabled() -> Self {
        Self::new(RateLimiterConfig::disabled())
    }

    pub fn config(&self) -> RateLimiterConfig {
        self.config
    }

    fn refill_locked(&self, state: &mut BucketState) {
        let elapsed = state.last_refill_at.elapsed();
        let refilled = elapsed.as_secs_f64() * self.config.requests_per_second;
        if refilled > 0.0 {
            state.tokens = (state.tokens + refilled).min(self.config.burst_size as f64);
            state.last_refill_at = Instant::now();
        }
    }

    /// Atomically refills, then deducts `n` tokens if available.
    pub fn try_consume(&self, n: u32) -> bool {
        let Some(state) = &self.state else {
            return true;
        };
        let mut guard = state.lock();
        self.refill_locked(&mut guard);
        if guard.tokens >= n as f64 {
            guard.tokens -= n as f64;
            true
        } else {
            false
        }
    }

    /// Polls `tryConsume` roughly every 10ms until it succeeds or `deadline` passes.
    pub async fn consume_with_deadline(&self, n: u32, deadline: Instant) -> Result<(), RateLimitTimeout> {
        loop {
            if self.try_consume(n) {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(RateLimitTimeout);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            tokio::time::sleep(remaining.min(Duration::from_millis(10))).await;
        }
    }

    /// Current token count after a lazy refill.
    pub fn available(&self) -> f64 {
        let Some(state) = &self.state else {
            return f64::INFINITY;
        };
        let mut guard = state.lock();
        self.refill_locked(&mut guard);
        guard.tokens
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitTimeout;

impl std::fmt::Display for RateLimitTimeout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("rate limit wait exceeded deadline")
    }
}

impl std::error::Error for RateLimitTimeout {}

/// Holds one `RateLimiter` per platform name, swappable at runtime so a
/// config reload can change a platform's rate without restarting workers.
pub struct PlatformRateLimiters {
    buckets: dashmap::DashMap<String, Arc<RateLimiter>>,
    default_config: RateLimiterConfig,
}

impl PlatformRateLimiters {
    pub fn new(default_config: RateLimiterConfig) -> Self {
        Self {
            buckets: dashmap::DashMap::new(),
            default_config,
        }
    }

    pub fn configure(&self, platform: impl Into<String>, config: RateLimiterConfig) {
        self.buckets
            .insert(platform.into(), Arc::new(RateLimiter::new(config)));
    }

    /// Returns the limiter for `platform`, creating one from the default
    /// config on first access.
    pub fn get_or_default(&self, platform: &str) -> Arc<RateLimiter> {
        if let Some(existing) = self.buckets.get(platform) {
            return Arc::clone(&existing);
        }
        let limiter = Arc::new(RateLimiter::new(self.default_config));
        self.buckets.insert(platform.to_string(), Arc::clone(&limiter));
        limiter
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_limiter_always_yields() {
        let limiter = RateLimiter::disabled();
        for _ in 0..1000 {
            assert!(limiter.try_consume(1));
        }
        assert_eq!(limiter.available(), f64::INFINITY);
    }

    #[test]
    fn bucket_exhausts_then_blocks() {
        let limiter = RateLimiter::new(RateLimiterConfig::new(1000.0, 5));
        for _ in 0..5 {
            assert!(limiter.try_consume(1));
        }
        assert!(!limiter.try_consume(1));
    }

    #[test]
    fn bucket_refills_over_time() {
        let limiter = RateLimiter::new(RateLimiterConfig::new(1000.0, 2));
        assert!(limiter.try_consume(2));
        assert!(!limiter.try_consume(1));
        std::thread::sleep(Duration::from_millis(20));
        assert!(limiter.try_consume(1));
    }

    #[tokio::test]
    async fn consume_with_deadline_times_out() {
        let limiter = RateLimiter::new(RateLimiterConfig::new(1.0, 1));
        assert!(limiter.try_consume(1));
        let deadline = Instant::now() + Duration::from_millis(30);
        let result = limiter.consume_with_deadline(1, deadline).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn consume_with_deadline_succeeds_after_refill() {
        let limiter = RateLimiter::new(RateLimiterConfig::new(200.0, 1));
        assert!(limiter.try_consume(1));
        let deadline = Instant::now() + Duration::from_millis(200);
        let result = limiter.consume_with_deadline(1, deadline).await;
        assert!(result.is_ok());
    }

    #[test]
    fn platform_limiters_are_independently_keyed() {
        let limiters = PlatformRateLimiters::new(RateLimiterConfig::new(1000.0, 3));
        let email = limiters.get_or_default("email");
        let sms = limiters.get_or_default("sms");
        assert!(email.try_consume(3));
        assert!(!email.try_consume(1));
        assert!(sms.try_consume(3));
    }

    #[test]
    fn reconfiguring_a_platform_replaces_its_bucket() {
        let limiters = PlatformRateLimiters::new(RateLimiterConfig::default());
        limiters.configure("webhook", RateLimiterConfig::new(5.0, 5));
        let limiter = limiters.get_or_default("webhook");
        assert_eq!(limiter.config().burst_size, 5);
    }
}
