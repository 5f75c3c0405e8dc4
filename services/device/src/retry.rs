//! Bounded retry policy for capture attempts.

use crate::config::RetryConfig;
use backoff::{backoff::Backoff, ExponentialBackoff};
use std::time::Duration;

/// Max attempts plus the delay schedule between them.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl RetryPolicy {
    /// Same delay between every attempt.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay: delay,
            max_delay: delay,
            multiplier: 1.0,
        }
    }

    /// Delay grows by `multiplier` after each attempt, capped at `max_delay`.
    pub fn exponential(
        max_attempts: u32,
        initial_delay: Duration,
        max_delay: Duration,
        multiplier: f64,
    ) -> Self {
        Self {
            max_attempts,
            initial_delay,
            max_delay,
            multiplier,
        }
    }

    /// Fresh delay schedule for one cycle.
    pub fn backoff(&self) -> RetryBackoff {
        RetryBackoff {
            inner: ExponentialBackoff {
                current_interval: self.initial_delay,
                initial_interval: self.initial_delay,
                max_interval: self.max_delay,
                multiplier: self.multiplier,
                randomization_factor: 0.0,
                max_elapsed_time: None,
                ..Default::default()
            },
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self::exponential(
            config.max_attempts,
            Duration::from_millis(config.initial_delay_ms),
            Duration::from_millis(config.max_delay_ms),
            config.multiplier,
        )
    }
}

/// Delay schedule of a single cycle.
pub struct RetryBackoff {
    inner: ExponentialBackoff,
}

impl RetryBackoff {
    /// Delay to wait before the next attempt.
    pub fn next_delay(&mut self) -> Duration {
        self.inner
            .next_backoff()
            .unwrap_or(self.inner.max_interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_policy() {
        let policy = RetryPolicy::fixed(3, Duration::from_millis(250));
        let mut backoff = policy.backoff();
        assert_eq!(backoff.next_delay(), Duration::from_millis(250));
        assert_eq!(backoff.next_delay(), Duration::from_millis(250));
    }

    #[test]
    fn test_exponential_policy_is_capped() {
        let policy = RetryPolicy::exponential(
            5,
            Duration::from_millis(100),
            Duration::from_millis(300),
            2.0,
        );
        let mut backoff = policy.backoff();
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
        assert_eq!(backoff.next_delay(), Duration::from_millis(200));
        assert_eq!(backoff.next_delay(), Duration::from_millis(300));
        assert_eq!(backoff.next_delay(), Duration::from_millis(300));
    }

    #[test]
    fn test_zero_delay_policy() {
        let mut backoff = RetryPolicy::fixed(3, Duration::ZERO).backoff();
        assert_eq!(backoff.next_delay(), Duration::ZERO);
    }

    #[test]
    fn test_from_config() {
        let policy = RetryPolicy::from(&RetryConfig::default());
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.initial_delay, Duration::from_millis(500));
    }
}
