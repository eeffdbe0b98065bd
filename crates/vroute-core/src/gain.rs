//! Volume/mute gain stage
//!
//! [`SharedGain`] is written by a non-real-time thread (usually the IPC gain
//! sync worker) and read lock-free by the producer callback, which scales each
//! block with [`apply_gain`] before it enters the ring buffer.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::types::Sample;

/// Scale `samples` in place by `volume`, or silence them when `muted`
///
/// `volume` is clamped to [0.0, 1.0]; unity gain leaves the block untouched.
#[inline]
pub fn apply_gain(samples: &mut [Sample], volume: f32, muted: bool) {
    if muted {
        samples.fill(0.0);
        return;
    }
    let volume = if volume.is_nan() { 1.0 } else { volume.clamp(0.0, 1.0) };
    if volume == 1.0 {
        return;
    }
    for sample in samples.iter_mut() {
        *sample *= volume;
    }
}

/// Volume and mute shared between a control thread and the audio path
#[derive(Debug)]
pub struct SharedGain {
    // f32 bit pattern
    volume: AtomicU32,
    muted: AtomicBool,
}

impl SharedGain {
    pub fn new(volume: f32, muted: bool) -> Self {
        Self {
            volume: AtomicU32::new(volume.clamp(0.0, 1.0).to_bits()),
            muted: AtomicBool::new(muted),
        }
    }

    /// Unity gain, not muted
    pub fn unity() -> Self {
        Self::new(1.0, false)
    }

    #[inline]
    pub fn volume(&self) -> f32 {
        f32::from_bits(self.volume.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }

    /// Current (volume, muted) pair
    #[inline]
    pub fn get(&self) -> (f32, bool) {
        (self.volume(), self.is_muted())
    }

    /// Publish a new volume (clamped to [0.0, 1.0], NaN ignored)
    pub fn set_volume(&self, volume: f32) {
        if volume.is_nan() {
            return;
        }
        self.volume
            .store(volume.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Relaxed);
    }

    /// Publish both values
    pub fn set(&self, volume: f32, muted: bool) {
        self.set_volume(volume);
        self.set_muted(muted);
    }

    /// Scale a block with the current values
    #[inline]
    pub fn apply(&self, samples: &mut [Sample]) {
        let (volume, muted) = self.get();
        apply_gain(samples, volume, muted);
    }
}

impl Default for SharedGain {
    fn default() -> Self {
        Self::unity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_gain_scales() {
        let mut block = [1.0, -0.5, 0.25, 0.0];
        apply_gain(&mut block, 0.5, false);
        assert_eq!(block, [0.5, -0.25, 0.125, 0.0]);
    }

    #[test]
    fn test_apply_gain_mute_silences() {
        let mut block = [1.0, -1.0];
        apply_gain(&mut block, 1.0, true);
        assert_eq!(block, [0.0, 0.0]);
    }

    #[test]
    fn test_apply_gain_clamps_volume() {
        let mut block = [0.5];
        apply_gain(&mut block, 3.0, false);
        assert_eq!(block, [0.5]);

        apply_gain(&mut block, -1.0, false);
        assert_eq!(block, [0.0]);
    }

    #[test]
    fn test_shared_gain_ignores_nan() {
        let gain = SharedGain::new(0.8, false);
        gain.set_volume(f32::NAN);
        assert_eq!(gain.volume(), 0.8);

        gain.set(2.0, true);
        assert_eq!(gain.get(), (1.0, true));
    }
}
