//! Backoff: decides how long to wait before the next attempt.

use std::time::Duration;

use crate::config::RetryConfig;

/// Capped exponential backoff with symmetric jitter.
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    /// Delay before the first retry.
    pub base_delay: Duration,

    pub multiplier: f64,

    /// Upper bound of the un-jittered delay.
    pub max_delay: Duration,

    /// 0 disables jitter, 1 allows anything between 0 and twice the delay.
    pub jitter_factor: f64,
}

impl Backoff {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            base_delay: config.base_delay,
            multiplier: config.backoff_multiplier,
            max_delay: config.max_delay,
            jitter_factor: config.jitter_factor,
        }
    }

    /// Delay after `failed_attempts` failures, without jitter.
    ///
    /// `base_delay * multiplier^(failed_attempts - 1)`, capped at `max_delay`.
    /// With base=100ms and multiplier=2.0:
    /// - 1 failure: 100ms
    /// - 2 failures: 200ms
    /// - 3 failures: 400ms
    pub fn next_delay(&self, failed_attempts: u32) -> Duration {
        let exponent = failed_attempts.saturating_sub(1).min(i32::MAX as u32) as i32;
        let base_ms = self.base_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;
        let delay_ms = (base_ms * self.multiplier.powi(exponent)).min(max_ms);
        Duration::from_millis(delay_ms.round() as u64)
    }

    /// Spread `delay` by `delay * jitter_factor * (2r - 1)` for `r` in `[0, 1)`.
    ///
    /// `r = 0.5` leaves the delay unchanged. Never negative.
    pub fn jittered(&self, delay: Duration, r: f64) -> Duration {
        let delay_ms = delay.as_millis() as f64;
        let spread = delay_ms * self.jitter_factor * (2.0 * r.clamp(0.0, 1.0) - 1.0);
        Duration::from_millis((delay_ms + spread).max(0.0).round() as u64)
    }

    /// Jittered delay after `failed_attempts` failures.
    pub fn delay_for(&self, failed_attempts: u32, r: f64) -> Duration {
        self.jittered(self.next_delay(failed_attempts), r)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}
