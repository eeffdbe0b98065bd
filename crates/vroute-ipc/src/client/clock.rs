//! Time source for cache expiry and reconnect scheduling

use std::time::Instant;

/// Monotonic time source
pub trait Clock: Send {
    fn now(&self) -> Instant;
}

/// Wall-clock [`Instant::now`]
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    #[inline]
    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[cfg(test)]
pub(crate) use manual::ManualClock;
