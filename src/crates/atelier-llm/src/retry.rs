//! Retry policy for transient provider failures.
//!
//! Capped exponential backoff with optional jitter. Permanent errors
//! (auth, invalid request) are never retried; classification lives on
//! [`crate::LlmError::is_retryable`].

use rand::Rng;
use std::time::Duration;

/// Configuration for retrying failed invocations.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first).
    pub max_attempts: usize,
    /// Initial interval between retries in seconds.
    pub initial_interval: f64,
    /// Multiplier for the interval after each retry.
    pub backoff_factor: f64,
    /// Maximum interval between retries in seconds.
    pub max_interval: f64,
    /// Whether to add random jitter to intervals.
    pub jitter: bool,
}

impl RetryPolicy {
    pub fn new(max_attempts: usize) -> Self {
        Self {
            max_attempts,
            initial_interval: 0.5,
            backoff_factor: 2.0,
            max_interval: 30.0,
            jitter: true,
        }
    }

    /// A policy that never retries (tests, fail-fast contexts).
    pub fn none() -> Self {
        Self::new(1).with_jitter(false)
    }

    pub fn with_initial_interval(mut self, seconds: f64) -> Self {
        self.initial_interval = seconds;
        self
    }

    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    pub fn with_max_interval(mut self, seconds: f64) -> Self {
        self.max_interval = seconds;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before the retry following attempt number `attempt`
    /// (0-indexed): `initial_interval * backoff_factor^attempt`, capped at
    /// `max_interval`, with jitter in `[0.5, 1.5]` when enabled.
    pub fn calculate_delay(&self, attempt: usize) -> Duration {
        let base_delay = self.initial_interval * self.backoff_factor.powi(attempt as i32);
        let capped = base_delay.min(self.max_interval);

        let final_delay = if self.jitter {
            let factor = rand::thread_rng().gen_range(0.5..=1.5);
            capped * factor
        } else {
            capped
        };

        Duration::from_secs_f64(final_delay)
    }

    /// Whether another attempt is allowed after `attempts_made` attempts.
    pub fn should_retry(&self, attempts_made: usize) -> bool {
        attempts_made < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_growth_without_jitter() {
        let policy = RetryPolicy::new(5)
            .with_initial_interval(1.0)
            .with_backoff_factor(2.0)
            .with_jitter(false);

        assert_eq!(policy.calculate_delay(0), Duration::from_secs_f64(1.0));
        assert_eq!(policy.calculate_delay(1), Duration::from_secs_f64(2.0));
        assert_eq!(policy.calculate_delay(2), Duration::from_secs_f64(4.0));
    }

    #[test]
    fn test_delay_capped_at_max_interval() {
        let policy = RetryPolicy::new(10)
            .with_initial_interval(1.0)
            .with_max_interval(5.0)
            .with_jitter(false);

        assert_eq!(policy.calculate_delay(8), Duration::from_secs_f64(5.0));
    }

    #[test]
    fn test_should_retry_bounds() {
        let policy = RetryPolicy::new(3);
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
    }

    #[test]
    fn test_jitter_stays_in_band() {
        let policy = RetryPolicy::new(3).with_initial_interval(2.0);
        for _ in 0..50 {
            let delay = policy.calculate_delay(0).as_secs_f64();
            assert!((1.0..=3.0).contains(&delay), "delay {delay} out of band");
        }
    }
}
