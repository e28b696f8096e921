use crate::constants::retry as retry_constants;
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Backoff {
    Fixed(Duration),
    Exponential { base: Duration, max: Duration },
}

/// Attempt budget plus the wait between attempts. The policy only computes
/// delays; callers decide whether to sleep on a thread or on the runtime.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn fixed(max_attempts: usize, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: Backoff::Fixed(delay),
        }
    }

    pub fn exponential(max_attempts: usize, base: Duration, max: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: Backoff::Exponential { base, max },
        }
    }

    pub fn from_name(name: &str, max_attempts: usize, base: Duration) -> Self {
        match name.trim().to_lowercase().as_str() {
            "exponential" | "exp" => Self::exponential(
                max_attempts,
                base,
                Duration::from_millis(retry_constants::MAX_DELAY_MS),
            ),
            _ => Self::fixed(max_attempts, base),
        }
    }

    /// Delay after the given failed attempt (1-based).
    pub fn delay_after(&self, attempt: usize) -> Duration {
        match &self.backoff {
            Backoff::Fixed(delay) => *delay,
            Backoff::Exponential { base, max } => {
                let exponent = attempt.saturating_sub(1).min(16) as u32;
                let factor = 2u32.saturating_pow(exponent);
                base.saturating_mul(factor).min(*max)
            }
        }
    }

    pub fn has_attempts_left(&self, attempt: usize) -> bool {
        attempt < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(
            retry_constants::MAX_ATTEMPTS,
            Duration::from_millis(retry_constants::BASE_DELAY_MS),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::{Backoff, RetryPolicy};
    use std::time::Duration;

    #[test]
    fn default_is_three_attempts_one_second_apart() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.backoff, Backoff::Fixed(Duration::from_secs(1)));
        assert_eq!(policy.delay_after(2), Duration::from_secs(1));
        assert!(policy.has_attempts_left(2));
        assert!(!policy.has_attempts_left(3));
    }

    #[test]
    fn exponential_backoff_is_capped() {
        let policy = RetryPolicy::exponential(
            6,
            Duration::from_millis(100),
            Duration::from_millis(500),
        );
        assert_eq!(policy.delay_after(1), Duration::from_millis(100));
        assert_eq!(policy.delay_after(2), Duration::from_millis(200));
        assert_eq!(policy.delay_after(3), Duration::from_millis(400));
        assert_eq!(policy.delay_after(4), Duration::from_millis(500));
    }

    #[test]
    fn zero_attempts_is_clamped_to_one() {
        assert_eq!(RetryPolicy::fixed(0, Duration::ZERO).max_attempts, 1);
        assert_eq!(
            RetryPolicy::from_name("exp", 2, Duration::from_millis(5)).backoff,
            Backoff::Exponential {
                base: Duration::from_millis(5),
                max: Duration::from_secs(10)
            }
        );
    }
}
