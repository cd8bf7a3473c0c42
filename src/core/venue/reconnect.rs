//! Exponential backoff policy for venue WebSocket sessions.

use rand::Rng;
use std::time::Duration;

/// Reconnect backoff: `min(base × 2^attempt, max)`, optionally with full
/// jitter. After `max_attempts` failures the session gives up and the
/// adapter parks in the `error` state until externally re-initialized.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
    pub jitter: bool,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            max_attempts: 10,
            jitter: true,
        }
    }
}

impl ReconnectPolicy {
    /// Deterministic capped exponential delay for `attempt` (0-based).
    #[must_use]
    pub fn base_backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.min(31);
        let delay = self
            .base_delay
            .saturating_mul(2_u32.saturating_pow(exp));
        delay.min(self.max_delay)
    }

    /// Delay to sleep before reconnect attempt `attempt`, with full jitter
    /// applied when enabled.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let capped = self.base_backoff(attempt);
        if !self.jitter || capped.is_zero() {
            return capped;
        }
        let millis = capped.as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(0..=millis))
    }

    #[must_use]
    pub fn exhausted(&self, attempt: u32) -> bool {
        attempt >= self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> ReconnectPolicy {
        ReconnectPolicy {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            max_attempts: 10,
            jitter: false,
        }
    }

    #[test]
    fn backoff_doubles_until_cap() {
        let policy = policy();
        assert_eq!(policy.base_backoff(0), Duration::from_secs(1));
        assert_eq!(policy.base_backoff(1), Duration::from_secs(2));
        assert_eq!(policy.base_backoff(4), Duration::from_secs(16));
        assert_eq!(policy.base_backoff(6), Duration::from_secs(60));
        assert_eq!(policy.base_backoff(20), Duration::from_secs(60));
    }

    #[test]
    fn delay_without_jitter_matches_base_backoff() {
        let policy = policy();
        for attempt in 0..8 {
            assert_eq!(policy.delay(attempt), policy.base_backoff(attempt));
        }
    }

    #[test]
    fn jittered_delay_stays_within_envelope() {
        let policy = ReconnectPolicy {
            jitter: true,
            ..policy()
        };
        for attempt in 0..8 {
            let delay = policy.delay(attempt);
            assert!(delay <= policy.base_backoff(attempt));
        }
    }

    #[test]
    fn exhaustion_after_max_attempts() {
        let policy = policy();
        assert!(!policy.exhausted(9));
        assert!(policy.exhausted(10));
    }
}
