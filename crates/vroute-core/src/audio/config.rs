//! Router configuration
//!
//! Defines which virtual device feeds the route, the preferred stream format and
//! the buffering/monitoring parameters.

use serde::{Deserialize, Serialize};

use crate::types::StreamFormat;

/// Default sample rate for the route (48kHz)
pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

/// Default ring buffer depth in milliseconds
///
/// Bounds worst-case end-to-end latency: 170ms @ 48kHz stereo = 16320 samples,
/// rounded up to a 16384-slot ring.
pub const DEFAULT_BUFFER_LATENCY_MS: u32 = 170;

/// Delay between starting the source and starting the sink (ms)
///
/// Lets the producer put a few blocks in the ring before the consumer starts pulling.
pub const DEFAULT_SETTLE_DELAY_MS: u64 = 20;

/// Interval between monitor samples (ms)
pub const DEFAULT_MONITOR_INTERVAL_MS: u64 = 5000;

/// Audio device identifier
///
/// Includes both the device name and the host backend (JACK, ALSA, CoreAudio, ...).
/// The string form `"[Host] Name"` is accepted wherever a device identifier is parsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceId {
    /// Device name as reported by the system
    pub name: String,
    /// Audio host identifier (e.g., "ALSA", "JACK", "CoreAudio")
    /// If None, uses the default/preferred host
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

impl DeviceId {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            host: None,
        }
    }

    pub fn with_host(name: &str, host: &str) -> Self {
        Self {
            name: name.to_string(),
            host: Some(host.to_string()),
        }
    }

    /// Parse `"[Host] Name"` or a bare `"Name"`
    pub fn parse(label: &str) -> Self {
        let label = label.trim();
        if let Some(rest) = label.strip_prefix('[') {
            if let Some((host, name)) = rest.split_once(']') {
                let name = name.trim();
                if !host.is_empty() && !name.is_empty() {
                    return Self::with_host(name, host);
                }
            }
        }
        Self::new(label)
    }

    /// Get a display label that includes the host if available
    pub fn display_label(&self) -> String {
        match &self.host {
            Some(host) => format!("[{}] {}", host, self.name),
            None => self.name.clone(),
        }
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.display_label())
    }
}

/// Configuration for the audio router
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Virtual capture device feeding the route (None = system default input)
    pub source_device: Option<DeviceId>,

    /// Preferred sample rate (the source's nominal rate wins if it differs)
    pub sample_rate: u32,

    /// Interleaved channel count (1 or 2)
    pub channels: u16,

    /// Ring buffer depth in milliseconds of audio
    pub buffer_latency_ms: u32,

    /// Settle delay between source start and sink start
    pub settle_delay_ms: u64,

    /// Monitor sampling interval
    pub monitor_interval_ms: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            source_device: None,
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: 2,
            buffer_latency_ms: DEFAULT_BUFFER_LATENCY_MS,
            settle_delay_ms: DEFAULT_SETTLE_DELAY_MS,
            monitor_interval_ms: DEFAULT_MONITOR_INTERVAL_MS,
        }
    }
}

impl RouterConfig {
    /// Set the virtual source device
    pub fn with_source_device(mut self, device: DeviceId) -> Self {
        self.source_device = Some(device);
        self
    }

    /// Set the preferred sample rate
    pub fn with_sample_rate(mut self, rate: u32) -> Self {
        self.sample_rate = rate;
        self
    }

    /// Set the channel count
    pub fn with_channels(mut self, channels: u16) -> Self {
        self.channels = channels;
        self
    }

    /// Set the ring buffer depth
    pub fn with_buffer_latency_ms(mut self, ms: u32) -> Self {
        self.buffer_latency_ms = ms;
        self
    }

    /// Set the source→sink settle delay
    pub fn with_settle_delay_ms(mut self, ms: u64) -> Self {
        self.settle_delay_ms = ms;
        self
    }

    /// Set the monitor interval
    pub fn with_monitor_interval_ms(mut self, ms: u64) -> Self {
        self.monitor_interval_ms = ms;
        self
    }

    /// The format requested from the devices
    pub fn requested_format(&self) -> StreamFormat {
        StreamFormat::float(self.sample_rate, self.channels)
    }

    /// Ring capacity (samples, before power-of-two rounding) for a negotiated format
    pub fn ring_samples(&self, format: &StreamFormat) -> usize {
        format.ms_to_frames(self.buffer_latency_ms).max(1) * format.channels as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_id_parse() {
        assert_eq!(
            DeviceId::parse("[ALSA] hw:0,0"),
            DeviceId::with_host("hw:0,0", "ALSA")
        );
        assert_eq!(DeviceId::parse("  BlackHole 2ch "), DeviceId::new("BlackHole 2ch"));
        assert_eq!(DeviceId::parse("[] odd"), DeviceId::new("[] odd"));
    }

    #[test]
    fn test_display_label_round_trips_through_parse() {
        let id = DeviceId::with_host("Speakers", "CoreAudio");
        assert_eq!(DeviceId::parse(&id.display_label()), id);
    }

    #[test]
    fn test_default_ring_size() {
        let config = RouterConfig::default();
        let format = config.requested_format();
        assert_eq!(config.ring_samples(&format), 16320);
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config: RouterConfig = serde_yaml::from_str("channels: 1\n").unwrap();
        assert_eq!(config.channels, 1);
        assert_eq!(config.sample_rate, DEFAULT_SAMPLE_RATE);
        assert_eq!(config.buffer_latency_ms, DEFAULT_BUFFER_LATENCY_MS);
    }
}
