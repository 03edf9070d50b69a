//! Open Retry Policy
//!
//! Exponential backoff with jitter between failed handshake attempts.
//! Delay for attempt `n` (zero based) is `initial * multiplier^n`, capped at
//! `max_delay`, then jittered by `±jitter_factor`.

use std::time::Duration;

use rand::Rng;

/// Backoff parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Growth factor per attempt.
    pub multiplier: f64,
    /// Jitter as a fraction of the delay (0.1 = ±10%).
    pub jitter_factor: f64,
    /// Total handshake attempts; `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_factor: 0.1,
            max_attempts: Some(5),
        }
    }
}

impl ReconnectConfig {
    /// Build from stream settings.
    #[must_use]
    pub fn from_settings(settings: &crate::StreamSettings) -> Self {
        Self {
            initial_delay: settings.reconnect_delay_initial,
            max_delay: settings.reconnect_delay_max,
            max_attempts: Some(settings.open_max_attempts.max(1)),
            ..Self::default()
        }
    }
}

/// Backoff state across consecutive failed attempts.
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    failures: u32,
}

impl ReconnectPolicy {
    /// Start with no failures recorded.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            failures: 0,
        }
    }

    /// Record a failed attempt and return how long to wait before the next
    /// one, or `None` once the attempt budget is spent.
    #[must_use]
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.failures = self.failures.saturating_add(1);
        if self.config.max_attempts.is_some_and(|max| self.failures >= max) {
            return None;
        }

        let base = self.backoff(self.failures - 1);
        Some(self.jitter(base))
    }

    /// Forget recorded failures.
    pub const fn reset(&mut self) {
        self.failures = 0;
    }

    /// Failed attempts recorded so far.
    #[must_use]
    pub const fn failures(&self) -> u32 {
        self.failures
    }

    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn backoff(&self, exponent: u32) -> Duration {
        let initial_ms = self.config.initial_delay.as_millis() as f64;
        let max_ms = self.config.max_delay.as_millis() as f64;
        let exponent = i32::try_from(exponent).unwrap_or(i32::MAX);
        let scaled = initial_ms * self.config.multiplier.powi(exponent);

        let millis = if scaled.is_finite() { scaled.min(max_ms) } else { max_ms };
        Duration::from_millis(millis.max(0.0) as u64)
    }

    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn jitter(&self, delay: Duration) -> Duration {
        if self.config.jitter_factor <= 0.0 {
            return delay;
        }

        let millis = delay.as_millis() as f64;
        let spread = millis * self.config.jitter_factor;
        let offset: f64 = rand::rng().random_range(-spread..=spread);
        Duration::from_millis((millis + offset).max(1.0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_attempts: Option<u32>) -> ReconnectPolicy {
        ReconnectPolicy::new(ReconnectConfig {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1000),
            multiplier: 2.0,
            jitter_factor: 0.0,
            max_attempts,
        })
    }

    #[test]
    fn delays_double_until_capped() {
        let mut policy = policy(None);
        let delays: Vec<u128> = (0..6)
            .map(|_| policy.next_delay().unwrap().as_millis())
            .collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1000, 1000]);
    }

    #[test]
    fn attempt_budget_counts_the_first_try() {
        // Three attempts total means two waits.
        let mut policy = policy(Some(3));
        assert!(policy.next_delay().is_some());
        assert!(policy.next_delay().is_some());
        assert!(policy.next_delay().is_none());
        assert_eq!(policy.failures(), 3);
    }

    #[test]
    fn single_attempt_never_waits() {
        let mut policy = policy(Some(1));
        assert!(policy.next_delay().is_none());
    }

    #[test]
    fn reset_restarts_backoff() {
        let mut policy = policy(Some(3));
        let _ = policy.next_delay();
        let _ = policy.next_delay();
        policy.reset();
        assert_eq!(policy.failures(), 0);
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(100)));
    }

    #[test]
    fn jitter_stays_in_bounds() {
        for _ in 0..100 {
            let mut policy = ReconnectPolicy::new(ReconnectConfig {
                initial_delay: Duration::from_millis(1000),
                max_attempts: None,
                ..ReconnectConfig::default()
            });
            let millis = policy.next_delay().unwrap().as_millis();
            assert!((900..=1100).contains(&millis), "delay {millis}ms out of bounds");
        }
    }
}
