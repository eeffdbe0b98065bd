//! Core types shared between the router and its backends

use serde::{Deserialize, Serialize};

/// Audio sample type (32-bit float, interleaved by channel)
pub type Sample = f32;

/// Only float samples are routed
pub const SUPPORTED_BIT_DEPTH: u16 = 32;

/// Maximum channel count the router accepts (mono or stereo)
pub const MAX_CHANNELS: u16 = 2;

/// Stream format negotiated when the router starts
///
/// Fixed for the lifetime of a run; a format change requires stop + start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamFormat {
    /// Frames per second
    pub sample_rate: u32,
    /// Interleaved channels per frame
    pub channels: u16,
    /// Bits per sample (always 32 for float)
    pub bit_depth: u16,
}

impl StreamFormat {
    /// Create a float format with the given rate and channel count
    pub fn float(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
            bit_depth: SUPPORTED_BIT_DEPTH,
        }
    }

    /// Whether the router can carry this format
    pub fn is_supported(&self) -> bool {
        self.sample_rate > 0
            && (1..=MAX_CHANNELS).contains(&self.channels)
            && self.bit_depth == SUPPORTED_BIT_DEPTH
    }

    /// Convert a frame count into milliseconds at this format's rate
    #[inline]
    pub fn frames_to_ms(&self, frames: u64) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        frames as f64 * 1000.0 / self.sample_rate as f64
    }

    /// Number of frames covering `ms` milliseconds
    #[inline]
    pub fn ms_to_frames(&self, ms: u32) -> usize {
        (self.sample_rate as u64 * ms as u64 / 1000) as usize
    }
}

impl Default for StreamFormat {
    fn default() -> Self {
        Self::float(48000, 2)
    }
}

impl std::fmt::Display for StreamFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}Hz/{}ch/{}-bit float",
            self.sample_rate, self.channels, self.bit_depth
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supported_formats() {
        assert!(StreamFormat::float(48000, 2).is_supported());
        assert!(StreamFormat::float(44100, 1).is_supported());
        assert!(!StreamFormat::float(48000, 6).is_supported());
        assert!(!StreamFormat::float(0, 2).is_supported());

        let int16 = StreamFormat {
            bit_depth: 16,
            ..StreamFormat::default()
        };
        assert!(!int16.is_supported());
    }

    #[test]
    fn test_frame_conversions() {
        let format = StreamFormat::float(48000, 2);
        assert_eq!(format.ms_to_frames(170), 8160);
        assert!((format.frames_to_ms(4800) - 100.0).abs() < f64::EPSILON);
    }
}
