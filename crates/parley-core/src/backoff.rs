//! Reconnect backoff.

use std::time::Duration;

/// Initial reconnect delay.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(500);

/// Upper bound for the exponential part of the delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Consecutive failed attempts before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Bounded exponential backoff with up to 50% additive jitter.
///
/// `delay(n) = min(base * 2^n, max) + jitter`, where the jitter is drawn from
/// `[0, min(base * 2^n, max) / 2)` using caller-provided entropy. The policy
/// holds no RNG so it stays a pure function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay before the first retry, before jitter.
    pub base_delay: Duration,
    /// Cap on the exponential part.
    pub max_delay: Duration,
    /// Attempts before the manager stops retrying on its own.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before retry number `attempt` (0-based).
    pub fn delay(&self, attempt: u32, entropy: u64) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(31)).unwrap_or(u32::MAX);
        let exponential = self.base_delay.saturating_mul(factor).min(self.max_delay);

        let half_ms = (exponential.as_millis() / 2) as u64;
        let jitter = if half_ms == 0 { 0 } else { entropy % half_ms };

        exponential + Duration::from_millis(jitter)
    }

    /// Whether another attempt is allowed after `failures` consecutive
    /// failures.
    pub fn allows(&self, failures: u32) -> bool {
        failures < self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn delay_doubles_without_jitter() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay(0, 0), Duration::from_millis(500));
        assert_eq!(policy.delay(1, 0), Duration::from_secs(1));
        assert_eq!(policy.delay(3, 0), Duration::from_secs(4));
    }

    #[test]
    fn delay_is_capped() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay(20, 0), DEFAULT_MAX_DELAY);
        assert_eq!(policy.delay(u32::MAX, 0), DEFAULT_MAX_DELAY);
    }

    #[test]
    fn attempts_are_bounded() {
        let policy = ReconnectPolicy { max_attempts: 2, ..Default::default() };
        assert!(policy.allows(0));
        assert!(policy.allows(1));
        assert!(!policy.allows(2));
    }

    proptest! {
        #[test]
        fn jitter_stays_below_half(attempt in 0u32..40, entropy in any::<u64>()) {
            let policy = ReconnectPolicy::default();
            let floor = policy.delay(attempt, 0);
            let delay = policy.delay(attempt, entropy);

            prop_assert!(delay >= floor);
            prop_assert!(delay < floor + floor / 2 + Duration::from_millis(1));
        }
    }
}
