//! AudioRouter - bridges the virtual source to a physical sink
//!
//! # Threads
//!
//! ```text
//! source RT thread ──producer cb──► RingProducer ─┐
//!                                                 ├─ RingBuffer (lock-free)
//! sink RT thread   ◄─consumer cb─── RingConsumer ─┘
//!                                        │
//! monitor thread  ◄── RingMonitor + RouterShared atomics
//!
//! control (start/stop/status, any thread) ── Mutex<Control> (never touched by RT threads)
//! ```
//!
//! At most one router should be live per process, since only one physical path
//! is bridged at a time. The caller owns the instance and passes it around.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::monitor::{MonitorHandle, MonitorSample};
use super::ring_buffer::{RingBuffer, RingConsumer, RingMonitor, RingProducer};
use super::state::{RouterShared, RouterState};
use crate::audio::{
    AudioBackend, AudioError, AudioResult, ConsumerCallback, DeviceId, DeviceInfo,
    ProducerCallback, RouterConfig, StreamHandle,
};
use crate::gain::SharedGain;
use crate::types::{Sample, StreamFormat};

/// Cumulative counters for the current (or last) run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RouterStats {
    pub frames_transferred: u64,
    pub underrun_count: u64,
    pub overrun_count: u64,
}

/// Full status snapshot for external queries
#[derive(Debug, Clone, PartialEq)]
pub struct RouterStatus {
    /// Backend the router was built on
    pub backend: String,
    pub state: RouterState,
    pub source: Option<DeviceId>,
    pub sink: Option<DeviceId>,
    pub format: Option<StreamFormat>,
    pub stats: RouterStats,
    pub buffered_frames: u64,
    pub latency_ms: f64,
    pub current_usage_pct: f32,
    pub peak_usage_pct: f32,
    /// Source and sink nominal rates differ (drift absorbed by the ring)
    pub sample_rate_mismatch: bool,
}

/// Everything that exists only while a route is running
struct ActiveRoute {
    source: DeviceInfo,
    sink: DeviceInfo,
    format: StreamFormat,
    sample_rate_mismatch: bool,
    // Drop order matters: sink before source, both before the ring monitor
    sink_stream: Box<dyn StreamHandle>,
    source_stream: Box<dyn StreamHandle>,
    monitor: Option<MonitorHandle>,
    ring: RingMonitor,
}

#[derive(Default)]
struct Control {
    active: Option<ActiveRoute>,
    last_stats: RouterStats,
}

/// Routes audio from the virtual source device to a physical sink
pub struct AudioRouter {
    backend: Arc<dyn AudioBackend>,
    config: RouterConfig,
    shared: Arc<RouterShared>,
    gain: Arc<SharedGain>,
    control: Mutex<Control>,
}

impl AudioRouter {
    /// Create a stopped router over `backend`
    pub fn new(backend: Arc<dyn AudioBackend>, config: RouterConfig) -> Self {
        Self {
            backend,
            config,
            shared: Arc::new(RouterShared::new()),
            gain: Arc::new(SharedGain::unity()),
            control: Mutex::new(Control::default()),
        }
    }

    /// Gain applied by the producer callback before samples enter the ring
    pub fn gain(&self) -> Arc<SharedGain> {
        Arc::clone(&self.gain)
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    fn control(&self) -> MutexGuard<'_, Control> {
        self.control
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Start routing the source device to `sink_identifier`
    ///
    /// `sink_identifier` is a device name, optionally prefixed with its host as
    /// `"[Host] Name"`. On any setup failure everything registered so far is
    /// rolled back and the router is left `Stopped`.
    pub fn start(&self, sink_identifier: &str) -> AudioResult<()> {
        let mut control = self.control();
        if let Some(active) = &control.active {
            return Err(AudioError::AlreadyRunning(active.sink.id.display_label()));
        }

        self.shared.set_state(RouterState::Starting);
        self.shared.frames_transferred.store(0, Ordering::Relaxed);

        match self.setup(sink_identifier) {
            Ok(route) => {
                log::info!(
                    "[ROUTER] Running on {}: {} -> {} ({}, ring {} samples)",
                    self.backend.name(),
                    route.source.id,
                    route.sink.id,
                    route.format,
                    route.ring.stats().capacity
                );
                control.active = Some(route);
                control.last_stats = RouterStats::default();
                self.shared.set_state(RouterState::Running);
                Ok(())
            }
            Err(e) => {
                self.shared.set_state(RouterState::Error);
                log::error!("[ROUTER] Failed to start route to {}: {}", sink_identifier, e);
                // setup() already dropped every partial registration
                self.shared.set_state(RouterState::Stopped);
                Err(e)
            }
        }
    }

    fn setup(&self, sink_identifier: &str) -> AudioResult<ActiveRoute> {
        // 1. Resolve devices
        let sink_id = DeviceId::parse(sink_identifier);
        let source = self
            .backend
            .resolve_input(self.config.source_device.as_ref())?;
        let sink = self.backend.resolve_output(&sink_id)?;

        // 2. Negotiate format, tolerate rate mismatch
        let format = self.negotiate_format(&source, &sink)?;
        let sample_rate_mismatch = source.nominal_sample_rate != sink.nominal_sample_rate;
        if sample_rate_mismatch {
            log::warn!(
                "[ROUTER] Sample rate mismatch: source {}Hz, sink {}Hz (drift absorbed by ring buffer)",
                source.nominal_sample_rate,
                sink.nominal_sample_rate
            );
        }

        // 3. Ring buffer sized for the latency bound
        let (producer, consumer) = RingBuffer::new(self.config.ring_samples(&format));
        let ring = producer.monitor();

        // 4. Register callbacks; an early return drops (deregisters) the source
        let source_stream = self.backend.build_input_stream(
            &source,
            format,
            producer_callback(producer, Arc::clone(&self.shared), Arc::clone(&self.gain), format),
        )?;
        let sink_stream = match self.backend.build_output_stream(
            &sink,
            format,
            consumer_callback(consumer, Arc::clone(&self.shared), format),
        ) {
            Ok(stream) => stream,
            Err(e) => {
                log::warn!("[ROUTER] Sink registration failed, rolling back source");
                drop(source_stream);
                return Err(e);
            }
        };

        // 5. Source first, settle, then sink
        source_stream.play()?;
        std::thread::sleep(Duration::from_millis(self.config.settle_delay_ms));
        if let Err(e) = sink_stream.play() {
            log::warn!("[ROUTER] Sink start failed, stopping source");
            let _ = source_stream.pause();
            drop(sink_stream);
            drop(source_stream);
            return Err(e);
        }

        // 6. Monitor
        let monitor = match MonitorHandle::spawn(
            ring.clone(),
            Arc::clone(&self.shared),
            format,
            Duration::from_millis(self.config.monitor_interval_ms.max(1)),
        ) {
            Ok(monitor) => monitor,
            Err(e) => {
                let _ = sink_stream.pause();
                let _ = source_stream.pause();
                return Err(e);
            }
        };

        Ok(ActiveRoute {
            source,
            sink,
            format,
            sample_rate_mismatch,
            sink_stream,
            source_stream,
            monitor: Some(monitor),
            ring,
        })
    }

    fn negotiate_format(&self, source: &DeviceInfo, sink: &DeviceInfo) -> AudioResult<StreamFormat> {
        let requested = self.config.requested_format();
        if !requested.is_supported() {
            return Err(AudioError::UnsupportedFormat(requested.to_string()));
        }

        let channels = requested.channels;
        for device in [source, sink] {
            if device.max_channels < channels {
                return Err(AudioError::UnsupportedFormat(format!(
                    "{} has {} channels, route needs {}",
                    device.id, device.max_channels, channels
                )));
            }
        }

        // The source clock drives the route
        let sample_rate = if source.nominal_sample_rate > 0 {
            source.nominal_sample_rate
        } else {
            requested.sample_rate
        };
        Ok(StreamFormat::float(sample_rate, channels))
    }

    /// Stop routing. Idempotent; safe from any thread.
    pub fn stop(&self) {
        let mut control = self.control();
        let Some(mut route) = control.active.take() else {
            return;
        };

        self.shared.set_state(RouterState::Stopping);

        if let Some(monitor) = route.monitor.take() {
            monitor.stop();
        }
        if let Err(e) = route.sink_stream.pause() {
            log::warn!("[ROUTER] Failed to pause sink: {}", e);
        }
        if let Err(e) = route.source_stream.pause() {
            log::warn!("[ROUTER] Failed to pause source: {}", e);
        }

        let ActiveRoute {
            sink_stream,
            source_stream,
            ring,
            format,
            sink,
            ..
        } = route;
        // Deregistration waits for in-flight callbacks; the ring goes last
        drop(sink_stream);
        drop(source_stream);

        let stats = self.stats_from(&ring);
        control.last_stats = stats;
        drop(ring);

        self.shared.set_state(RouterState::Stopped);
        log::info!(
            "[ROUTER] Stopped route to {} ({}): {} frames, {} underruns, {} overruns",
            sink.id,
            format,
            stats.frames_transferred,
            stats.underrun_count,
            stats.overrun_count
        );
    }

    fn stats_from(&self, ring: &RingMonitor) -> RouterStats {
        let ring_stats = ring.stats();
        RouterStats {
            frames_transferred: self.shared.frames_transferred(),
            underrun_count: ring_stats.underruns,
            overrun_count: ring_stats.overruns,
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.state() == RouterState::Running
    }

    pub fn state(&self) -> RouterState {
        self.shared.state()
    }

    /// Identifier of the sink the running route is bound to
    pub fn bound_sink_identifier(&self) -> Option<String> {
        self.control()
            .active
            .as_ref()
            .map(|route| route.sink.id.display_label())
    }

    /// (frames_transferred, underrun_count, overrun_count) for the current or last run
    pub fn get_stats(&self) -> RouterStats {
        let control = self.control();
        match &control.active {
            Some(route) => self.stats_from(&route.ring),
            None => control.last_stats,
        }
    }

    /// Snapshot for status queries
    pub fn status(&self) -> RouterStatus {
        let control = self.control();
        let state = self.shared.state();
        match &control.active {
            Some(route) => {
                let sample = MonitorSample::take(&route.ring, &self.shared, &route.format);
                RouterStatus {
                    backend: self.backend.name().to_string(),
                    state,
                    source: Some(route.source.id.clone()),
                    sink: Some(route.sink.id.clone()),
                    format: Some(route.format),
                    stats: self.stats_from(&route.ring),
                    buffered_frames: sample.buffered_frames,
                    latency_ms: route.format.frames_to_ms(sample.buffered_frames),
                    current_usage_pct: sample.current_usage_pct,
                    peak_usage_pct: sample.peak_usage_pct,
                    sample_rate_mismatch: route.sample_rate_mismatch,
                }
            }
            None => RouterStatus {
                backend: self.backend.name().to_string(),
                state,
                source: None,
                sink: None,
                format: None,
                stats: control.last_stats,
                buffered_frames: 0,
                latency_ms: 0.0,
                current_usage_pct: 0.0,
                peak_usage_pct: 0.0,
                sample_rate_mismatch: false,
            },
        }
    }
}

impl Drop for AudioRouter {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Build the source-side callback: gain stage, then all-or-nothing ring write
fn producer_callback(
    mut producer: RingProducer,
    shared: Arc<RouterShared>,
    gain: Arc<SharedGain>,
    format: StreamFormat,
) -> ProducerCallback {
    let channels = format.channels as usize;
    // Blocks larger than the ring can never fit, so this never needs to grow
    let mut scratch: Vec<Sample> = vec![0.0; producer.monitor().stats().capacity];

    Box::new(move |data: &[Sample]| {
        if data.is_empty() || !shared.state().is_live() {
            return;
        }
        let frames = data.len() / channels;
        let n = frames * channels;

        if n > scratch.len() {
            // Counted as an overrun by the ring
            let _ = producer.write(&data[..n], frames, channels);
            return;
        }

        let block = &mut scratch[..n];
        block.copy_from_slice(&data[..n]);
        gain.apply(block);

        if producer.write(block, frames, channels).is_ok() {
            shared
                .frames_transferred
                .fetch_add(frames as u64, Ordering::Relaxed);
        }
    })
}

/// Build the sink-side callback: all-or-nothing ring read, silence otherwise
fn consumer_callback(
    mut consumer: RingConsumer,
    shared: Arc<RouterShared>,
    format: StreamFormat,
) -> ConsumerCallback {
    let channels = format.channels as usize;

    Box::new(move |out: &mut [Sample]| {
        if out.is_empty() {
            return;
        }
        if !shared.state().is_live() {
            out.fill(0.0);
            return;
        }
        let frames = out.len() / channels;
        let n = frames * channels;
        // Underrun zero-fills the block itself
        let _ = consumer.read(&mut out[..n], frames, channels);
        out[n..].fill(0.0);
    })
}
