//! Per-chunk retry policy with exponential backoff.

use std::time::Duration;

use thothcraft_protocol::constants::DEFAULT_RETRY_ATTEMPTS;

/// How often and how patiently a failed chunk is retried.
///
/// A chunk is attempted at most `max_retries + 1` times. Retries reuse the
/// chunk's slot in the concurrency pool, so a struggling chunk delays the
/// chunks queued behind it rather than being revisited later.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Backoff cap.
    pub max_delay: Duration,
    /// Multiplier for each subsequent retry.
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_RETRY_ATTEMPTS,
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
            backoff_factor: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Maximum attempts per chunk, first try included.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Calculates the delay before retry `retry` (1-based),
    /// with ±25% jitter so parallel chunks do not retry in lockstep.
    pub fn delay_for_attempt(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(63) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(exp);
        let capped = secs.min(self.max_delay.as_secs_f64());
        if capped <= 0.0 {
            return Duration::ZERO;
        }
        let jitter = capped * 0.25;
        let offset = (std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .subsec_nanos() as f64
            / 1_000_000_000.0)
            * 2.0
            - 1.0; // [-1.0, 1.0)
        Duration::from_secs_f64((capped + jitter * offset).max(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.max_attempts(), 4);
        assert_eq!(policy.initial_delay, Duration::from_millis(250));
        assert_eq!(policy.max_delay, Duration::from_secs(5));
    }

    #[test]
    fn delay_backoff_with_jitter() {
        let policy = RetryPolicy::default();
        // Base delays: 250ms, 500ms, 1s, 2s, 4s, 5s (capped), 5s...
        let expected_base = [0.25, 0.5, 1.0, 2.0, 4.0, 5.0, 5.0];
        for (i, &base) in expected_base.iter().enumerate() {
            let secs = policy.delay_for_attempt((i + 1) as u32).as_secs_f64();
            let lo = base * 0.74;
            let hi = base * 1.26;
            assert!(
                secs >= lo && secs <= hi,
                "retry {}: {secs:.3}s not in [{lo:.3}, {hi:.3}]",
                i + 1
            );
        }
    }

    #[test]
    fn zero_delay_policy() {
        let policy = RetryPolicy {
            initial_delay: Duration::ZERO,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay_for_attempt(1), Duration::ZERO);
        assert_eq!(policy.delay_for_attempt(10), Duration::ZERO);
    }

    #[test]
    fn huge_retry_number_does_not_overflow() {
        let policy = RetryPolicy::default();
        let delay = policy.delay_for_attempt(u32::MAX);
        assert!(delay <= Duration::from_secs_f64(5.0 * 1.26));
    }
}
