//! Router lifecycle state machine
//!
//! ```text
//! Stopped ──start──► Starting ──ok──► Running ──stop──► Stopping ──► Stopped
//!                       │
//!                       └──setup failure──► Error ──rollback──► Stopped
//! ```
//!
//! Stored in a single atomic so the audio callbacks can check it without a lock.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

/// Router lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RouterState {
    Stopped = 0,
    Starting = 1,
    Running = 2,
    Stopping = 3,
    Error = 4,
}

impl RouterState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => RouterState::Starting,
            2 => RouterState::Running,
            3 => RouterState::Stopping,
            4 => RouterState::Error,
            _ => RouterState::Stopped,
        }
    }

    /// Whether the audio callbacks should move samples
    ///
    /// `Starting` counts as live so the source can prefill the ring during the
    /// settle delay before the sink is started.
    #[inline]
    pub fn is_live(self) -> bool {
        matches!(self, RouterState::Starting | RouterState::Running)
    }
}

impl std::fmt::Display for RouterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RouterState::Stopped => "stopped",
            RouterState::Starting => "starting",
            RouterState::Running => "running",
            RouterState::Stopping => "stopping",
            RouterState::Error => "error",
        };
        f.write_str(name)
    }
}

/// State and counters shared by the router, its callbacks and the monitor
#[derive(Debug)]
pub(crate) struct RouterShared {
    state: AtomicU8,
    pub(crate) frames_transferred: AtomicU64,
}

impl RouterShared {
    pub(crate) fn new() -> Self {
        Self {
            state: AtomicU8::new(RouterState::Stopped as u8),
            frames_transferred: AtomicU64::new(0),
        }
    }

    #[inline]
    pub(crate) fn state(&self) -> RouterState {
        RouterState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: RouterState) {
        let previous = RouterState::from_u8(self.state.swap(state as u8, Ordering::AcqRel));
        if previous != state {
            log::debug!("[ROUTER] {} -> {}", previous, state);
        }
    }

    #[inline]
    pub(crate) fn frames_transferred(&self) -> u64 {
        self.frames_transferred.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_round_trips_through_atomic() {
        let shared = RouterShared::new();
        for state in [
            RouterState::Starting,
            RouterState::Running,
            RouterState::Stopping,
            RouterState::Error,
            RouterState::Stopped,
        ] {
            shared.set_state(state);
            assert_eq!(shared.state(), state);
        }
    }

    #[test]
    fn test_live_states() {
        assert!(RouterState::Starting.is_live());
        assert!(RouterState::Running.is_live());
        assert!(!RouterState::Stopping.is_live());
        assert!(!RouterState::Stopped.is_live());
        assert!(!RouterState::Error.is_live());
    }
}
