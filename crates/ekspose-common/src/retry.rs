//! Per-key exponential backoff.
//!
//! The work queue asks this policy how long a key should wait before it is
//! handed out again after its N-th consecutive failure. Delays grow as
//! `initial_delay * 2^attempt` and are capped at `max_delay`, so the
//! sequence for one key is non-decreasing until the ceiling.
//!
//! No jitter is applied.

use std::time::Duration;

/// Default base delay (matches the usual controller rate limiter)
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_millis(5);

/// Default ceiling for a single key's delay
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(1000);

/// Exponential backoff configuration for requeued work items.
#[derive(Clone, Debug, PartialEq)]
pub struct BackoffPolicy {
    /// Delay after the first failure
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay: DEFAULT_INITIAL_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl BackoffPolicy {
    /// Create a policy with the given base and ceiling
    pub fn new(initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            initial_delay,
            max_delay,
        }
    }

    /// Delay before the retry that follows `attempt` previous failures.
    ///
    /// `attempt == 0` yields `initial_delay`. The result never exceeds
    /// `max_delay`, and very large attempt counts saturate instead of
    /// overflowing.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        2u32.checked_pow(attempt)
            .and_then(|factor| self.initial_delay.checked_mul(factor))
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_retry_uses_initial_delay() {
        let policy = BackoffPolicy::new(Duration::from_millis(5), Duration::from_secs(10));
        assert_eq!(policy.delay_for(0), Duration::from_millis(5));
    }

    #[test]
    fn delay_doubles_per_attempt() {
        let policy = BackoffPolicy::new(Duration::from_millis(10), Duration::from_secs(10));
        assert_eq!(policy.delay_for(1), Duration::from_millis(20));
        assert_eq!(policy.delay_for(2), Duration::from_millis(40));
        assert_eq!(policy.delay_for(3), Duration::from_millis(80));
    }

    #[test]
    fn delay_caps_at_max() {
        let policy = BackoffPolicy::new(Duration::from_secs(30), Duration::from_secs(300));
        assert_eq!(policy.delay_for(3), Duration::from_secs(240));
        // 30 * 2^4 = 480 -> capped at 300
        assert_eq!(policy.delay_for(4), Duration::from_secs(300));
        // Large attempt counts are safe
        assert_eq!(policy.delay_for(10_000), Duration::from_secs(300));
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_secs(300));
    }

    #[test]
    fn delays_never_decrease() {
        let policy = BackoffPolicy::default();
        let mut previous = Duration::ZERO;
        for attempt in 0..64 {
            let delay = policy.delay_for(attempt);
            assert!(delay >= previous, "attempt {attempt} went backwards");
            assert!(delay <= policy.max_delay);
            previous = delay;
        }
        assert_eq!(previous, DEFAULT_MAX_DELAY);
    }

    #[test]
    fn default_policy_matches_controller_defaults() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.initial_delay, Duration::from_millis(5));
        assert_eq!(policy.max_delay, Duration::from_secs(1000));
    }
}
