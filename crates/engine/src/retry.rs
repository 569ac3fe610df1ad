//! Retry policy with jittered exponential back-off.

use std::time::Duration;

use sy_domain::config::RetryConfig;

/// Controls how the engine retries a failed capability invocation.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub base_delay: Duration,
    /// Cap applied before jitter.
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(cfg: &RetryConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts.max(1),
            base_delay: Duration::from_millis(cfg.base_delay_ms),
            max_delay: Duration::from_millis(cfg.max_delay_ms),
            jitter: cfg.jitter,
        }
    }
}

impl RetryPolicy {
    /// Delay after failed attempt number `attempt` (1-indexed).
    ///
    /// `seed` identifies the call being retried (its idempotency key), so
    /// concurrent callers retrying the same capability spread out while a
    /// given call keeps a reproducible schedule.
    pub fn delay_after(&self, attempt: u32, seed: &str) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        let base_ms = self.base_delay.as_millis() as f64;
        let capped_ms = (base_ms * 2f64.powi(exp as i32)).min(self.max_delay.as_millis() as f64);

        // Up to 25% on top, enough to spread retry storms.
        let jitter = if self.jitter {
            capped_ms * 0.25 * jitter_fraction(seed, attempt)
        } else {
            0.0
        };
        Duration::from_millis((capped_ms + jitter) as u64)
    }

    /// Whether another attempt is allowed after `attempt` failures.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// Deterministic fraction in [0, 1) from `seed` and `attempt`.
fn jitter_fraction(seed: &str, attempt: u32) -> f64 {
    // FNV-1a over the seed, then a splitmix64 finalizer with the attempt.
    let mut h: u64 = 0xcbf2_9ce4_8422_2325;
    for b in seed.as_bytes() {
        h ^= u64::from(*b);
        h = h.wrapping_mul(0x0000_0100_0000_01b3);
    }
    let mut z = h ^ u64::from(attempt).wrapping_mul(0x9e37_79b9_7f4a_7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^= z >> 31;
    (z >> 11) as f64 / (1u64 << 53) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(jitter: bool) -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter,
        }
    }

    #[test]
    fn defaults_follow_config() {
        let p = RetryPolicy::default();
        assert_eq!(p.max_attempts, 3);
        assert_eq!(p.base_delay, Duration::from_secs(1));
        assert_eq!(p.max_delay, Duration::from_secs(30));
    }

    #[test]
    fn delay_doubles_without_jitter() {
        let p = policy(false);
        assert_eq!(p.delay_after(1, "k"), Duration::from_secs(1));
        assert_eq!(p.delay_after(2, "k"), Duration::from_secs(2));
        assert_eq!(p.delay_after(3, "k"), Duration::from_secs(4));
    }

    #[test]
    fn delay_capped_with_jitter_bound() {
        let p = policy(true);
        for attempt in 1..40 {
            let d = p.delay_after(attempt, "k");
            assert!(d <= Duration::from_millis(37_500), "attempt {attempt}: {d:?}");
        }
        assert!(p.delay_after(10, "k") >= Duration::from_secs(30));
    }

    #[test]
    fn jitter_differs_between_calls() {
        let p = policy(true);
        let a: Vec<Duration> = (1..=3).map(|n| p.delay_after(n, "thread-a:0:math_solver")).collect();
        let b: Vec<Duration> = (1..=3).map(|n| p.delay_after(n, "thread-b:0:math_solver")).collect();
        assert_ne!(a, b);

        // Same call, same schedule.
        let again: Vec<Duration> = (1..=3).map(|n| p.delay_after(n, "thread-a:0:math_solver")).collect();
        assert_eq!(a, again);
    }

    #[test]
    fn jitter_spreads_many_callers() {
        let p = policy(true);
        let mut delays: Vec<Duration> = (0..32)
            .map(|i| p.delay_after(1, &format!("key-{i}")))
            .collect();
        delays.sort();
        delays.dedup();
        assert!(delays.len() > 16, "only {} distinct delays", delays.len());
        for d in delays {
            assert!(d >= Duration::from_secs(1) && d < Duration::from_millis(1_250));
        }
    }

    #[test]
    fn retry_budget() {
        let p = policy(true);
        assert!(p.should_retry(1));
        assert!(p.should_retry(2));
        assert!(!p.should_retry(3));
    }

    #[test]
    fn zero_attempts_still_tries_once() {
        let p = RetryPolicy::from(&RetryConfig {
            max_attempts: 0,
            ..RetryConfig::default()
        });
        assert_eq!(p.max_attempts, 1);
        assert!(!p.should_retry(1));
    }
}
