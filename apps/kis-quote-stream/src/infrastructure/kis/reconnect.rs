//! Reconnection Policy
//!
//! Exponential backoff with jitter between streaming sessions. The attempt
//! counter only resets after a session actually reached `Connected`, so a
//! server that accepts the socket and immediately drops it still exhausts
//! the budget.

use std::time::Duration;

use rand::Rng;

use crate::infrastructure::config::StreamSettings;

/// Backoff parameters.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on any delay.
    pub max_delay: Duration,
    /// Growth factor per attempt.
    pub multiplier: f64,
    /// Jitter as a fraction of the delay (0.1 = ±10%).
    pub jitter_factor: f64,
    /// Consecutive attempts allowed (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_factor: 0.1,
            max_attempts: 10,
        }
    }
}

impl ReconnectConfig {
    /// Build from streaming settings.
    #[must_use]
    pub fn from_stream_settings(settings: &StreamSettings) -> Self {
        Self {
            initial_delay: settings.reconnect_delay_initial,
            max_delay: settings.reconnect_delay_max,
            multiplier: settings.reconnect_delay_multiplier,
            max_attempts: settings.max_reconnect_attempts,
            ..Self::default()
        }
    }
}

/// Stateful backoff schedule.
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    attempt_count: u32,
}

impl ReconnectPolicy {
    /// Create a policy with no attempts consumed.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            attempt_count: 0,
        }
    }

    /// Consume one attempt and return the delay to wait before it.
    ///
    /// Returns `None` once the attempt budget is spent.
    #[must_use]
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.should_retry() {
            return None;
        }
        let base = self.base_delay(self.attempt_count);
        self.attempt_count += 1;
        Some(self.apply_jitter(base))
    }

    /// Forget previous attempts after a successful session.
    pub const fn reset(&mut self) {
        self.attempt_count = 0;
    }

    /// Attempts consumed since the last reset.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Check if another attempt is allowed.
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        self.config.max_attempts == 0 || self.attempt_count < self.config.max_attempts
    }

    /// Configured attempt budget.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// Un-jittered delay for attempt `n` (0-based).
    fn base_delay(&self, n: u32) -> Duration {
        let exponent = i32::try_from(n).unwrap_or(i32::MAX);
        let factor = self.config.multiplier.max(1.0).powi(exponent);
        let max_secs = self.config.max_delay.as_secs_f64();
        let secs = (self.config.initial_delay.as_secs_f64() * factor).min(max_secs);
        if secs > 0.0 {
            Duration::try_from_secs_f64(secs).unwrap_or(self.config.max_delay)
        } else {
            self.config.max_delay
        }
    }

    fn apply_jitter(&self, delay: Duration) -> Duration {
        if self.config.jitter_factor <= 0.0 || delay.is_zero() {
            return delay;
        }
        let base = delay.as_secs_f64();
        let spread = base * self.config.jitter_factor;
        let jitter: f64 = rand::rng().random_range(-spread..=spread);
        Duration::try_from_secs_f64((base + jitter).max(0.001)).unwrap_or(delay)
    }
}
