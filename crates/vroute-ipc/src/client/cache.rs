//! Last known volume/mute for one pid
//!
//! A hint, never authoritative: the server table is the source of truth.

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq)]
struct CachedVolume {
    pid: u32,
    volume: f32,
    muted: bool,
    cached_at: Instant,
}

#[derive(Debug, Clone, Default)]
pub struct ClientCache {
    entry: Option<CachedVolume>,
}

impl ClientCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&mut self, pid: u32, volume: f32, muted: bool, now: Instant) {
        self.entry = Some(CachedVolume {
            pid,
            volume,
            muted,
            cached_at: now,
        });
    }

    /// Cached value for `pid` if younger than `ttl`
    pub fn fresh(&self, pid: u32, now: Instant, ttl: Duration) -> Option<(f32, bool)> {
        self.entry
            .filter(|e| e.pid == pid && now.saturating_duration_since(e.cached_at) < ttl)
            .map(|e| (e.volume, e.muted))
    }

    /// Cached value for `pid` regardless of age
    pub fn last(&self, pid: u32) -> Option<(f32, bool)> {
        self.entry
            .filter(|e| e.pid == pid)
            .map(|e| (e.volume, e.muted))
    }

    pub fn invalidate(&mut self) {
        self.entry = None;
    }

    pub fn is_valid(&self) -> bool {
        self.entry.is_some()
    }
}
