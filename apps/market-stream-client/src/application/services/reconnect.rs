//! Reconnection Policy
//!
//! Linear backoff with bounded jitter for hub reconnection. The n-th
//! consecutive attempt waits `base × n` plus a non-negative jitter of at most
//! `jitter_factor × base`, capped at the maximum delay. Because the jitter
//! never exceeds one base step, delays are non-decreasing across attempts.

use std::time::Duration;

use rand::Rng;

/// Configuration for reconnection behavior.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay step added per attempt.
    pub base_delay: Duration,
    /// Maximum delay between reconnection attempts.
    pub max_delay: Duration,
    /// Jitter as a fraction of the base delay, clamped to `[0, 1]`.
    /// Non-finite values disable jitter.
    pub jitter_factor: f64,
    /// Maximum number of consecutive attempts (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter_factor: 0.1,
            max_attempts: 5,
        }
    }
}

impl ReconnectConfig {
    /// Create configuration from `StreamSettings`.
    #[must_use]
    pub const fn from_stream_settings(settings: &crate::StreamSettings) -> Self {
        Self {
            base_delay: settings.reconnect_delay_initial,
            max_delay: settings.reconnect_delay_max,
            jitter_factor: settings.reconnect_jitter,
            max_attempts: settings.max_reconnect_attempts,
        }
    }
}

/// Reconnection policy implementing linear backoff with jitter.
///
/// # Example
///
/// ```rust
/// use market_stream_client::application::services::reconnect::{ReconnectConfig, ReconnectPolicy};
/// use std::time::Duration;
///
/// let mut policy = ReconnectPolicy::new(ReconnectConfig {
///     jitter_factor: 0.0,
///     ..ReconnectConfig::default()
/// });
///
/// assert_eq!(policy.next_delay(), Some(Duration::from_secs(1)));
/// assert_eq!(policy.next_delay(), Some(Duration::from_secs(2)));
///
/// // Simulate successful connection
/// policy.reset();
/// assert_eq!(policy.attempt_count(), 0);
/// ```
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    attempt_count: u32,
}

impl ReconnectPolicy {
    /// Create a new reconnection policy.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            attempt_count: 0,
        }
    }

    /// Get the delay before the next attempt.
    ///
    /// Returns `None` once max attempts have been used.
    #[must_use]
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.should_retry() {
            return None;
        }

        self.attempt_count += 1;

        let linear = self.config.base_delay.saturating_mul(self.attempt_count);
        let delay = linear.saturating_add(self.jitter());
        Some(delay.min(self.config.max_delay))
    }

    /// Reset the policy after a successful connection.
    pub const fn reset(&mut self) {
        self.attempt_count = 0;
    }

    /// Get the current attempt count.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Check if reconnection should continue.
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        self.config.max_attempts == 0 || self.attempt_count < self.config.max_attempts
    }

    fn jitter(&self) -> Duration {
        let factor = self.config.jitter_factor;
        if !factor.is_finite() || factor <= 0.0 {
            return Duration::ZERO;
        }
        let factor = factor.min(1.0);

        let bound = self.config.base_delay.mul_f64(factor);
        if bound.is_zero() {
            return Duration::ZERO;
        }
        rand::rng().random_range(Duration::ZERO..=bound)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use test_case::test_case;

    use super::*;

    fn config(base_ms: u64, max_ms: u64, jitter: f64, attempts: u32) -> ReconnectConfig {
        ReconnectConfig {
            base_delay: Duration::from_millis(base_ms),
            max_delay: Duration::from_millis(max_ms),
            jitter_factor: jitter,
            max_attempts: attempts,
        }
    }

    #[test]
    fn default_config_values() {
        let config = ReconnectConfig::default();
        assert_eq!(config.base_delay, Duration::from_secs(1));
        assert_eq!(config.max_delay, Duration::from_secs(30));
        assert!((config.jitter_factor - 0.1).abs() < f64::EPSILON);
        assert_eq!(config.max_attempts, 5);
    }

    #[test]
    fn policy_linear_backoff() {
        let mut policy = ReconnectPolicy::new(config(100, 10_000, 0.0, 0));

        assert_eq!(policy.next_delay(), Some(Duration::from_millis(100)));
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(200)));
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(300)));
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(400)));
    }

    #[test]
    fn policy_max_delay_cap() {
        let mut policy = ReconnectPolicy::new(config(1000, 2500, 0.0, 0));

        let _ = policy.next_delay();
        let _ = policy.next_delay();
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(2500)));
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(2500)));
    }

    #[test]
    fn policy_max_attempts() {
        let mut policy = ReconnectPolicy::new(config(100, 1000, 0.0, 3));

        assert!(policy.next_delay().is_some());
        assert_eq!(policy.attempt_count(), 1);
        assert!(policy.next_delay().is_some());
        assert!(policy.next_delay().is_some());
        assert_eq!(policy.attempt_count(), 3);

        assert!(policy.next_delay().is_none());
        assert!(!policy.should_retry());
        assert_eq!(policy.attempt_count(), 3);
    }

    #[test]
    fn policy_reset() {
        let mut policy = ReconnectPolicy::new(config(100, 10_000, 0.0, 3));

        let _ = policy.next_delay();
        let _ = policy.next_delay();
        policy.reset();

        assert_eq!(policy.attempt_count(), 0);
        assert!(policy.should_retry());
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(100)));
    }

    #[test]
    fn policy_jitter_bounds() {
        for _ in 0..100 {
            let mut policy = ReconnectPolicy::new(config(1000, 10_000, 0.1, 0));
            let millis = policy.next_delay().unwrap().as_millis();
            assert!(millis >= 1000, "delay {millis}ms is below minimum 1000ms");
            assert!(millis <= 1100, "delay {millis}ms is above maximum 1100ms");
        }
    }

    #[test_case(f64::NAN ; "nan")]
    #[test_case(f64::INFINITY ; "positive infinity")]
    #[test_case(f64::NEG_INFINITY ; "negative infinity")]
    #[test_case(-0.5 ; "negative")]
    fn unusable_jitter_is_ignored(jitter: f64) {
        let mut policy = ReconnectPolicy::new(config(100, 10_000, jitter, 3));

        assert_eq!(policy.next_delay(), Some(Duration::from_millis(100)));
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(200)));
    }

    #[test]
    fn oversized_jitter_is_clamped_to_one_step() {
        for _ in 0..100 {
            let mut policy = ReconnectPolicy::new(config(100, 10_000, 7.0, 0));
            let millis = policy.next_delay().unwrap().as_millis();
            assert!((100..=200).contains(&millis), "delay {millis}ms outside one step");
        }
    }

    #[test]
    fn unlimited_attempts() {
        let mut policy = ReconnectPolicy::new(config(1, 10, 0.1, 0));
        for _ in 0..1000 {
            assert!(policy.next_delay().is_some());
        }
    }

    proptest! {
        #[test]
        fn delays_non_decreasing_then_terminal(
            base_ms in 1u64..5_000,
            max_ms in 1u64..60_000,
            jitter in 0.0f64..=1.0,
            attempts in 1u32..20,
        ) {
            let mut policy = ReconnectPolicy::new(config(base_ms, max_ms, jitter, attempts));
            let mut previous = Duration::ZERO;

            for _ in 0..attempts {
                let delay = policy.next_delay();
                prop_assert!(delay.is_some());
                let delay = delay.unwrap_or_default();
                prop_assert!(delay >= previous);
                prop_assert!(delay <= Duration::from_millis(max_ms));
                previous = delay;
            }

            prop_assert!(policy.next_delay().is_none());
        }
    }
}
