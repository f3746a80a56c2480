// ABOUTME: Exponential backoff policy shared by every retryable operation.
// ABOUTME: Attempt k waits initial * multiplier^k, capped, and gives up after max_attempts.

use std::time::Duration;

/// Backoff policy for retrying a failing operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay after the first failed attempt
    pub initial_delay: Duration,
    /// Maximum delay between attempts
    pub max_delay: Duration,
    /// Multiplier applied to the delay after each failure
    pub multiplier: u32,
    /// Total attempts before giving up (0 = unlimited)
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2,
            max_attempts: 5,
        }
    }
}

/// Tracks consecutive failures of one operation
#[derive(Debug)]
pub struct BackoffState {
    policy: BackoffPolicy,
    consecutive_failures: u32,
    current_delay: Duration,
}

impl BackoffState {
    pub fn new(policy: BackoffPolicy) -> Self {
        let current_delay = policy.initial_delay;
        Self {
            policy,
            consecutive_failures: 0,
            current_delay,
        }
    }

    /// Record a success (resets backoff)
    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.current_delay = self.policy.initial_delay;
    }

    /// Record a failed attempt and return the delay before the next one, or
    /// None once `max_attempts` attempts have failed
    pub fn record_failure(&mut self) -> Option<Duration> {
        self.consecutive_failures += 1;

        if self.policy.max_attempts > 0 && self.consecutive_failures >= self.policy.max_attempts {
            return None;
        }

        let delay = self.current_delay;
        self.current_delay = self
            .current_delay
            .checked_mul(self.policy.multiplier)
            .unwrap_or(self.policy.max_delay)
            .min(self.policy.max_delay);

        Some(delay)
    }

    /// Number of consecutive failures
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Delay that would be returned by the next failure
    pub fn current_delay(&self) -> Duration {
        self.current_delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_attempts: u32) -> BackoffPolicy {
        BackoffPolicy {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2,
            max_attempts,
        }
    }

    #[test]
    fn test_exponential_sequence_caps_at_max() {
        let mut state = BackoffState::new(policy(0));
        let delays: Vec<u64> = (0..8)
            .map(|_| state.record_failure().unwrap().as_secs())
            .collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 32, 60, 60]);
        assert_eq!(state.consecutive_failures(), 8);
    }

    #[test]
    fn test_gives_up_after_exactly_max_attempts() {
        let mut state = BackoffState::new(policy(3));

        // attempt 1 fails -> wait b, attempt 2 fails -> wait 2b, attempt 3 fails -> give up
        assert_eq!(state.record_failure(), Some(Duration::from_secs(1)));
        assert_eq!(state.record_failure(), Some(Duration::from_secs(2)));
        assert_eq!(state.record_failure(), None);
        assert_eq!(state.consecutive_failures(), 3);
    }

    #[test]
    fn test_single_attempt_never_waits() {
        let mut state = BackoffState::new(policy(1));
        assert_eq!(state.record_failure(), None);
    }

    #[test]
    fn test_success_resets_backoff() {
        let mut state = BackoffState::new(policy(3));
        state.record_failure();
        state.record_failure();

        state.record_success();
        assert_eq!(state.consecutive_failures(), 0);
        assert_eq!(state.current_delay(), Duration::from_secs(1));
        assert_eq!(state.record_failure(), Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_unlimited_attempts() {
        let mut state = BackoffState::new(policy(0));
        for _ in 0..100 {
            assert!(state.record_failure().is_some());
        }
    }

    #[test]
    fn test_multiplier_overflow_saturates_to_max() {
        let mut state = BackoffState::new(BackoffPolicy {
            initial_delay: Duration::from_secs(u64::MAX / 2),
            max_delay: Duration::from_secs(u64::MAX),
            multiplier: 4,
            max_attempts: 0,
        });
        state.record_failure();
        assert_eq!(state.current_delay(), Duration::from_secs(u64::MAX));
    }
}
