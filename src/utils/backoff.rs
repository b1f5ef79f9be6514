//! Exponential backoff timing for fallible network operations.
//!
//! The delay schedule is a pure function of the attempt number so the policy
//! can be unit tested without any I/O, and retry loops stay inspectable:
//! callers hold an explicit [`Backoff`] cursor rather than hiding the attempt
//! counter inside a future chain.

use std::time::Duration;

/// Default base delay for the first retry (milliseconds).
pub const DEFAULT_BASE_MS: u64 = 100;

/// Default cap on any single delay (milliseconds).
pub const DEFAULT_CAP_MS: u64 = 5000;

/// Exponential backoff policy: `min(cap, base * 2^attempt)`.
///
/// No jitter is applied; delays are strictly non-decreasing in the attempt
/// number and never exceed the cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay before the first retry (milliseconds).
    pub base_ms: u64,
    /// Upper bound on any delay (milliseconds).
    pub cap_ms: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_ms: DEFAULT_BASE_MS,
            cap_ms: DEFAULT_CAP_MS,
        }
    }
}

impl BackoffPolicy {
    /// Delay for a given attempt number (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let exp = self.base_ms.saturating_mul(factor).min(self.cap_ms);
        Duration::from_millis(exp)
    }
}

/// Retry cursor pairing a policy with the current attempt number.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    attempt: u32,
}

impl Backoff {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    /// Attempts consumed so far.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Delay to wait before the next retry, advancing the cursor.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.policy.delay_for(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(BackoffPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_are_non_decreasing_and_capped() {
        let policy = BackoffPolicy::default();
        let mut prev = Duration::ZERO;
        for attempt in 0..64 {
            let delay = policy.delay_for(attempt);
            assert!(delay >= prev, "delay decreased at attempt {attempt}");
            assert!(delay <= Duration::from_millis(DEFAULT_CAP_MS));
            prev = delay;
        }
    }

    #[test]
    fn first_delays_follow_doubling() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for(5), Duration::from_millis(3200));
        assert_eq!(policy.delay_for(6), Duration::from_millis(5000));
    }

    #[test]
    fn delay_is_pure_in_attempt_number() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay_for(3), policy.delay_for(3));
    }

    #[test]
    fn shift_overflow_saturates_to_cap() {
        let policy = BackoffPolicy::default();
        assert_eq!(
            policy.delay_for(u32::MAX),
            Duration::from_millis(DEFAULT_CAP_MS)
        );
    }

    #[test]
    fn cursor_advances_attempt() {
        let mut backoff = Backoff::default();
        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
        assert_eq!(backoff.next_delay(), Duration::from_millis(200));
        assert_eq!(backoff.attempt(), 2);
    }
}
