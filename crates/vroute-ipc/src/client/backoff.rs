//! Exponential reconnect backoff
//!
//! Delay doubles from `base` per failed attempt up to `max`; after
//! `max_attempts` consecutive failures no further attempts are made until
//! [`Backoff::reset`].

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    max_attempts: u32,
    failures: u32,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            max,
            max_attempts,
            failures: 0,
        }
    }

    /// Whether another attempt is allowed
    pub fn should_reconnect(&self) -> bool {
        self.failures < self.max_attempts
    }

    /// Record a failed attempt; returns the delay before the next one
    pub fn record_failure(&mut self) -> Duration {
        self.failures = self.failures.saturating_add(1);
        self.delay()
    }

    /// Delay before the next attempt (zero before any failure)
    pub fn delay(&self) -> Duration {
        if self.failures == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(self.failures - 1).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }
}
