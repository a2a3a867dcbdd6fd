//! Retry controller (spec.md §4.7): decides whether a failed attempt
//! should be retried and how long to wait before the next one. Attempts
//! are tracked on the `QueueMessage` (`attempts` field), not here — this
//! type is pure decision logic so it can be unit tested deterministically.

use std::time::Duration;

use nh_common::NotifyError;
use rand::Rng;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Exponential,
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Jitter {
    Full,
    None,
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff: Backoff,
    pub factor: f64,
    pub jitter: Jitter,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(30),
            backoff: Backoff::Exponential,
            factor: 2.0,
            jitter: Jitter::Full,
        }
    }
}

impl RetryPolicy {
    /// `attempt` is 1-based: the attempt number that just failed.
    pub fn should_retry(&self, attempt: u32, err: &NotifyError) -> bool {
        attempt < self.max_attempts && err.is_retryable()
    }

    /// Delay before attempt `attempt + 1`, given that `attempt` just failed.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let raw_ms = match self.backoff {
            Backoff::Exponential => self.base_delay.as_millis() as f64 * self.factor.powi(exponent),
            Backoff::Linear => self.base_delay.as_millis() as f64 * attempt as f64,
        };
        let clamped_ms = raw_ms
            .max(self.base_delay.as_millis() as f64)
            .min(self.max_delay.as_millis() as f64);

        let delay_ms = match self.jitter {
            Jitter::None => clamped_ms,
            Jitter::Full => {
                if clamped_ms <= 0.0 {
                    0.0
                } else {
                    rand::thread_rng().gen_range(0.0..=clamped_ms)
                }
            }
        };
        Duration::from_millis(delay_ms.round() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nh_common::ErrorCode;

    fn retryable_err() -> NotifyError {
        NotifyError::new(ErrorCode::ServerError, "boom")
    }

    fn non_retryable_err() -> NotifyError {
        NotifyError::validation("bad input")
    }

    #[test]
    fn stops_retrying_past_max_attempts() {
        let policy = RetryPolicy { max_attempts: 3, ..Default::default() };
        assert!(policy.should_retry(1, &retryable_err()));
        assert!(policy.should_retry(2, &retryable_err()));
        assert!(!policy.should_retry(3, &retryable_err()));
    }

    #[test]
    fn never_retries_non_retryable_errors() {
        let policy = RetryPolicy::default();
        assert!(!policy.should_retry(1, &non_retryable_err()));
    }

    #[test]
    fn exponential_backoff_grows_and_clamps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
            backoff: Backoff::Exponential,
            factor: 2.0,
            jitter: Jitter::None,
        };
        assert_eq!(policy.next_delay(1), Duration::from_millis(10));
        assert_eq!(policy.next_delay(2), Duration::from_millis(20));
        assert_eq!(policy.next_delay(3), Duration::from_millis(40));
        assert_eq!(policy.next_delay(10), Duration::from_millis(100));
    }

    #[test]
    fn full_jitter_stays_within_bounds() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(1000),
            backoff: Backoff::Exponential,
            factor: 2.0,
            jitter: Jitter::Full,
        };
        for attempt in 1..=5 {
            let delay = policy.next_delay(attempt);
            assert!(delay <= Duration::from_millis(1000));
        }
    }
}
