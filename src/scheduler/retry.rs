//! Exponential backoff with bounded jitter.
//!
//! `delay = min(cap, base * 2^(attempt - 1) + jitter)`, with jitter drawn
//! uniformly from `[0, jitter)`.

use std::time::Duration;

use rand::RngExt;

pub const DEFAULT_BASE: Duration = Duration::from_secs(10);
pub const DEFAULT_CAP: Duration = Duration::from_secs(300);
pub const DEFAULT_JITTER: Duration = Duration::from_secs(5);

/// Retry-or-give-up decision for a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryDecision {
    pub retry: bool,
    /// Wait before the next attempt. Zero when `retry` is false.
    pub delay: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: DEFAULT_BASE,
            cap: DEFAULT_CAP,
            jitter: DEFAULT_JITTER,
        }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base(mut self, base: Duration) -> Self {
        self.base = base;
        self
    }

    pub fn with_cap(mut self, cap: Duration) -> Self {
        self.cap = cap;
        self
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Capped exponential delay for `attempt` (1-based), without jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(62) as i32;
        let secs = self.base.as_secs_f64() * 2f64.powi(exponent);
        Duration::from_secs_f64(secs.min(self.cap.as_secs_f64()))
    }

    /// Pure decision; `jitter_fraction` in `[0, 1)` selects the jitter addend.
    pub fn decide_with_jitter(
        &self,
        attempt: u32,
        max_attempts: u32,
        jitter_fraction: f64,
    ) -> RetryDecision {
        if attempt >= max_attempts {
            return RetryDecision {
                retry: false,
                delay: Duration::ZERO,
            };
        }

        let fraction = jitter_fraction.clamp(0.0, 1.0);
        let secs = self.base_delay(attempt).as_secs_f64() + self.jitter.as_secs_f64() * fraction;
        RetryDecision {
            retry: true,
            delay: Duration::from_secs_f64(secs.min(self.cap.as_secs_f64())),
        }
    }

    /// Decision with randomly sampled jitter.
    pub fn decide(&self, attempt: u32, max_attempts: u32) -> RetryDecision {
        let mut rng = rand::rng();
        let fraction: f64 = rng.random_range(0.0..1.0);
        self.decide_with_jitter(attempt, max_attempts, fraction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_iff_below_max() {
        let policy = RetryPolicy::new();
        assert!(policy.decide(1, 3).retry);
        assert!(policy.decide(2, 3).retry);
        assert!(!policy.decide(3, 3).retry);
        assert_eq!(policy.decide(3, 3).delay, Duration::ZERO);
        assert!(!policy.decide(4, 3).retry);
    }

    #[test]
    fn test_base_delay_doubles_then_caps() {
        let policy = RetryPolicy::new();
        assert_eq!(policy.base_delay(1), Duration::from_secs(10));
        assert_eq!(policy.base_delay(2), Duration::from_secs(20));
        assert_eq!(policy.base_delay(3), Duration::from_secs(40));
        assert_eq!(policy.base_delay(6), Duration::from_secs(300));
        assert_eq!(policy.base_delay(1000), Duration::from_secs(300));
    }

    #[test]
    fn test_base_delay_is_monotonic() {
        let policy = RetryPolicy::new();
        let mut previous = Duration::ZERO;
        for attempt in 1..40 {
            let delay = policy.base_delay(attempt);
            assert!(delay >= previous, "attempt {attempt}");
            previous = delay;
        }
    }

    #[test]
    fn test_jitter_window() {
        let policy = RetryPolicy::new();
        let low = policy.decide_with_jitter(1, 3, 0.0);
        let high = policy.decide_with_jitter(1, 3, 0.999);
        assert_eq!(low.delay, Duration::from_secs(10));
        assert!(high.delay < Duration::from_secs(15));

        for _ in 0..100 {
            let d = policy.decide(1, 3).delay;
            assert!(d >= Duration::from_secs(10) && d < Duration::from_secs(15));
        }
    }

    #[test]
    fn test_jitter_never_exceeds_cap() {
        let policy = RetryPolicy::new();
        let decision = policy.decide_with_jitter(9, 10, 0.99);
        assert_eq!(decision.delay, Duration::from_secs(300));
    }
}
