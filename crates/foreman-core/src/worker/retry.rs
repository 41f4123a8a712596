//! Retry policy: backoff between source-control attempts.

use std::time::Duration;

/// Exponential backoff with optional jitter.
///
/// delay(n) = base_delay * multiplier^(n - 1), then scaled by a random factor
/// in `[1 - jitter, 1 + jitter]` and capped at `max_delay`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    /// Fraction of the delay to randomize, 0.0..=1.0.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(2),
            multiplier: 2.0,
            max_delay: Duration::from_secs(60),
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Fixed delay, no growth and no jitter.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            base_delay: delay,
            multiplier: 1.0,
            max_delay: delay,
            jitter: 0.0,
        }
    }

    /// Delay before retry number `attempts` (1-indexed; 0 is treated as 1).
    ///
    /// Example with base_delay=2s, multiplier=2.0 and no jitter:
    /// - attempt 1: 2s
    /// - attempt 2: 4s
    /// - attempt 3: 8s
    pub fn next_delay(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(i32::MAX as u32) as i32;
        let mut secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);

        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter > 0.0 {
            let factor = 1.0 + jitter * (rand::random::<f64>() * 2.0 - 1.0);
            secs *= factor;
        }

        let secs = secs.clamp(0.0, self.max_delay.as_secs_f64());
        Duration::from_secs_f64(secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn without_jitter() -> RetryPolicy {
        RetryPolicy {
            jitter: 0.0,
            ..RetryPolicy::default()
        }
    }

    #[test]
    fn exponential_backoff_increases() {
        let policy = without_jitter();

        assert_eq!(policy.next_delay(0), Duration::from_secs(2));
        assert_eq!(policy.next_delay(1), Duration::from_secs(2));
        assert_eq!(policy.next_delay(2), Duration::from_secs(4));
        assert_eq!(policy.next_delay(3), Duration::from_secs(8));
    }

    #[test]
    fn delay_is_capped() {
        let policy = without_jitter();
        assert_eq!(policy.next_delay(30), Duration::from_secs(60));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let policy = RetryPolicy {
            jitter: 0.5,
            ..RetryPolicy::default()
        };
        for _ in 0..100 {
            let delay = policy.next_delay(2);
            assert!(delay >= Duration::from_secs(2), "{delay:?}");
            assert!(delay <= Duration::from_secs(6), "{delay:?}");
        }
    }

    #[test]
    fn fixed_policy_never_grows() {
        let policy = RetryPolicy::fixed(Duration::from_millis(5));
        assert_eq!(policy.next_delay(1), Duration::from_millis(5));
        assert_eq!(policy.next_delay(9), Duration::from_millis(5));
    }
}
