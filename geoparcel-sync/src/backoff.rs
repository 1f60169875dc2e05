//! Reconnect delay schedule

use crate::config::ReconnectPolicy;
use std::time::Duration;

/// Delay calculator driven by a [`ReconnectPolicy`]
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: ReconnectPolicy,
    attempt: u32,
}

impl Backoff {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    /// Delay before the next attempt; advances the attempt counter.
    pub fn next_delay(&mut self) -> Duration {
        let exp = self
            .policy
            .base_ms
            .saturating_mul(1u64.checked_shl(self.attempt).unwrap_or(u64::MAX));
        let capped = exp.min(self.policy.max_ms);
        let jitter = if self.policy.jitter {
            rand::random::<u64>() % (capped / 4 + 1)
        } else {
            0
        };
        self.attempt = self.attempt.saturating_add(1);
        Duration::from_millis(capped + jitter)
    }

    /// Number of delays handed out so far.
    pub fn attempts(&self) -> u32 {
        self.attempt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_is_fixed_one_second() {
        let mut backoff = Backoff::new(ReconnectPolicy::default());
        for _ in 0..5 {
            assert_eq!(backoff.next_delay(), Duration::from_secs(1));
        }
        assert_eq!(backoff.attempts(), 5);
    }

    #[test]
    fn test_exponential_grows_and_caps() {
        let mut backoff = Backoff::new(ReconnectPolicy::exponential(100, 500));

        let d1 = backoff.next_delay();
        let d2 = backoff.next_delay();
        assert!(d1.as_millis() >= 100);
        assert!(d2.as_millis() >= 200);

        for _ in 0..70 {
            // cap plus at most 25% jitter; large attempt counts must not overflow
            assert!(backoff.next_delay().as_millis() <= 625);
        }
    }
}
