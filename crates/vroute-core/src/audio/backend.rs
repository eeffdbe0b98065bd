//! Audio backend trait for device-specific implementations
//!
//! The router only needs four things from the OS sound subsystem: resolve a
//! device, read its nominal sample rate, register a callback on it, and
//! start/stop that callback. Backends:
//! - **CPAL**: real devices (CoreAudio, ALSA/JACK/PipeWire, WASAPI)
//! - **Mock**: in-memory devices driven by hand, for tests
//!
//! Contract for [`StreamHandle`]: dropping a handle deregisters its callback and
//! does not return while an invocation of that callback is still running. The
//! router relies on this to tear down the ring buffer safely.

use super::config::DeviceId;
use super::error::AudioResult;
use crate::types::{Sample, StreamFormat};

/// Producer callback: receives interleaved samples captured from the source
pub type ProducerCallback = Box<dyn FnMut(&[Sample]) + Send + 'static>;

/// Consumer callback: fills an interleaved output block for the sink
pub type ConsumerCallback = Box<dyn FnMut(&mut [Sample]) + Send + 'static>;

/// A resolved device as seen by the router
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceInfo {
    /// Identifier including host
    pub id: DeviceId,
    /// Rate the device currently runs at
    pub nominal_sample_rate: u32,
    /// Maximum channels in the relevant direction
    pub max_channels: u16,
}

/// A registered device callback
///
/// Must be `Send` so `AudioRouter::stop` can run on any thread.
pub trait StreamHandle: Send {
    /// Start invoking the callback
    fn play(&self) -> AudioResult<()>;

    /// Stop invoking the callback (registration stays)
    fn pause(&self) -> AudioResult<()>;
}

/// Device access used by the router
pub trait AudioBackend: Send + Sync {
    /// Short backend name for logs
    fn name(&self) -> &str;

    /// Resolve the capture device (None = default input)
    fn resolve_input(&self, id: Option<&DeviceId>) -> AudioResult<DeviceInfo>;

    /// Resolve a playback device by identifier
    fn resolve_output(&self, id: &DeviceId) -> AudioResult<DeviceInfo>;

    /// Register `callback` on an input device; the stream starts paused
    fn build_input_stream(
        &self,
        device: &DeviceInfo,
        format: StreamFormat,
        callback: ProducerCallback,
    ) -> AudioResult<Box<dyn StreamHandle>>;

    /// Register `callback` on an output device; the stream starts paused
    fn build_output_stream(
        &self,
        device: &DeviceInfo,
        format: StreamFormat,
        callback: ConsumerCallback,
    ) -> AudioResult<Box<dyn StreamHandle>>;
}
