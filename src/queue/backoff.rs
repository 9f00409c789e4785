//! Retry delays for queued writes
//!
//! Equal-jitter exponential backoff: the n-th retry waits between half and
//! all of `base * 2^(n-1)`, capped at `max`. Because each window starts
//! where the previous one ended, delays grow strictly until the cap.

use rand::Rng;
use std::time::Duration;

use crate::config::QueueSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
    /// Failed attempts after which an item is dead-lettered
    pub max_retries: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_settings(&QueueSettings::default())
    }
}

impl BackoffPolicy {
    pub fn from_settings(settings: &QueueSettings) -> Self {
        Self {
            base: Duration::from_millis(settings.base_delay_ms),
            max: Duration::from_millis(settings.max_delay_ms),
            max_retries: settings.max_retries,
        }
    }

    /// Upper bound of the delay window for the given retry count (1-based)
    pub fn ceiling(&self, retry_count: u32) -> Duration {
        let exponent = retry_count.saturating_sub(1).min(31);
        self.base.saturating_mul(1u32 << exponent).min(self.max)
    }

    /// Delay before the next attempt, `jitter` in `[0, 1)`
    pub fn delay_with(&self, retry_count: u32, jitter: f64) -> Duration {
        let half = self.ceiling(retry_count) / 2;
        half + half.mul_f64(jitter.clamp(0.0, 1.0))
    }

    pub fn delay(&self, retry_count: u32) -> Duration {
        let jitter = rand::thread_rng().gen_range(0.0..1.0);
        self.delay_with(retry_count, jitter)
    }

    pub fn is_exhausted(&self, retry_count: u32) -> bool {
        retry_count >= self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> BackoffPolicy {
        BackoffPolicy {
            base: Duration::from_secs(2),
            max: Duration::from_secs(300),
            max_retries: 5,
        }
    }

    #[test]
    fn test_ceiling_doubles_until_cap() {
        let p = policy();
        assert_eq!(p.ceiling(1), Duration::from_secs(2));
        assert_eq!(p.ceiling(2), Duration::from_secs(4));
        assert_eq!(p.ceiling(4), Duration::from_secs(16));
        assert_eq!(p.ceiling(9), Duration::from_secs(300));
        assert_eq!(p.ceiling(200), Duration::from_secs(300));
    }

    #[test]
    fn test_delay_stays_in_window() {
        let p = policy();
        for n in 1..=8 {
            for _ in 0..50 {
                let d = p.delay(n);
                assert!(d >= p.ceiling(n) / 2, "retry {} too short: {:?}", n, d);
                assert!(d <= p.ceiling(n), "retry {} too long: {:?}", n, d);
            }
        }
    }

    #[test]
    fn test_worst_case_jitter_still_increases() {
        let p = policy();
        // Highest jitter on retry n against lowest jitter on retry n+1
        for n in 1..p.max_retries {
            assert!(p.delay_with(n, 0.999) < p.delay_with(n + 1, 0.0));
        }
    }

    #[test]
    fn test_exhaustion_at_ceiling() {
        let p = policy();
        assert!(!p.is_exhausted(4));
        assert!(p.is_exhausted(5));
        assert!(p.is_exhausted(6));
    }

    #[test]
    fn test_defaults_follow_queue_settings() {
        let p = BackoffPolicy::default();
        assert_eq!(p.max_retries, 5);
        assert_eq!(p.base, Duration::from_secs(2));
        assert_eq!(p.max, Duration::from_secs(300));
    }
}
