//! Background watermark monitor
//!
//! Samples the ring buffer and router counters at a fixed interval and logs a
//! status line. Only atomic loads happen here; nothing the audio threads read
//! is ever written.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam::channel::{bounded, RecvTimeoutError, Sender};

use super::ring_buffer::RingMonitor;
use super::state::RouterShared;
use crate::audio::{AudioError, AudioResult};
use crate::types::StreamFormat;

/// Raw counters read in one pass
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MonitorSample {
    pub frames_transferred: u64,
    pub underruns: u64,
    pub overruns: u64,
    pub buffered_frames: u64,
    pub current_usage_pct: f32,
    pub peak_usage_pct: f32,
}

impl MonitorSample {
    pub(crate) fn take(ring: &RingMonitor, shared: &RouterShared, format: &StreamFormat) -> Self {
        let stats = ring.stats();
        Self {
            frames_transferred: shared.frames_transferred(),
            underruns: stats.underruns,
            overruns: stats.overruns,
            buffered_frames: (ring.occupied_samples() / format.channels.max(1) as usize) as u64,
            current_usage_pct: stats.current_usage_pct,
            peak_usage_pct: stats.peak_usage_pct,
        }
    }
}

/// One interval's worth of router health
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MonitorReport {
    /// Frames moved into the ring during the interval
    pub frames_delta: u64,
    /// Underruns during the interval
    pub underruns_delta: u64,
    /// Overruns during the interval
    pub overruns_delta: u64,
    /// Frames queued at the end of the interval
    pub buffered_frames: u64,
    /// `buffered_frames * 1000 / sample_rate`
    pub latency_ms: f64,
    pub current_usage_pct: f32,
    pub peak_usage_pct: f32,
}

impl MonitorReport {
    /// Compute the report for the interval `previous → current`
    pub fn between(previous: &MonitorSample, current: &MonitorSample, format: &StreamFormat) -> Self {
        Self {
            frames_delta: current.frames_transferred.saturating_sub(previous.frames_transferred),
            underruns_delta: current.underruns.saturating_sub(previous.underruns),
            overruns_delta: current.overruns.saturating_sub(previous.overruns),
            buffered_frames: current.buffered_frames,
            latency_ms: format.frames_to_ms(current.buffered_frames),
            current_usage_pct: current.current_usage_pct,
            peak_usage_pct: current.peak_usage_pct,
        }
    }

    /// Any dropout in the interval
    pub fn is_degraded(&self) -> bool {
        self.underruns_delta > 0 || self.overruns_delta > 0
    }

    fn log(&self) {
        if self.is_degraded() {
            log::error!(
                "[MONITOR] {} underruns, {} overruns in interval | {} frames moved, {} buffered (~{:.1}ms), usage {:.1}% (peak {:.1}%)",
                self.underruns_delta,
                self.overruns_delta,
                self.frames_delta,
                self.buffered_frames,
                self.latency_ms,
                self.current_usage_pct,
                self.peak_usage_pct
            );
        } else {
            log::info!(
                "[MONITOR] {} frames moved, {} buffered (~{:.1}ms), usage {:.1}% (peak {:.1}%)",
                self.frames_delta,
                self.buffered_frames,
                self.latency_ms,
                self.current_usage_pct,
                self.peak_usage_pct
            );
        }
    }
}

/// Running monitor thread; `stop` signals and joins it
pub(crate) struct MonitorHandle {
    stop_tx: Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl MonitorHandle {
    pub(crate) fn spawn(
        ring: RingMonitor,
        shared: Arc<RouterShared>,
        format: StreamFormat,
        interval: Duration,
    ) -> AudioResult<Self> {
        let (stop_tx, stop_rx) = bounded::<()>(1);

        let thread = std::thread::Builder::new()
            .name("vroute-monitor".into())
            .spawn(move || {
                log::debug!("[MONITOR] started ({:?} interval)", interval);
                let mut previous = MonitorSample::take(&ring, &shared, &format);

                loop {
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {}
                        // Stop requested or router dropped
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }

                    let current = MonitorSample::take(&ring, &shared, &format);
                    MonitorReport::between(&previous, &current, &format).log();
                    previous = current;
                }

                log::debug!("[MONITOR] stopped");
            })
            .map_err(|e| AudioError::ThreadSpawn {
                name: "monitor",
                reason: e.to_string(),
            })?;

        Ok(Self {
            stop_tx,
            thread: Some(thread),
        })
    }

    pub(crate) fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let _ = self.stop_tx.try_send(());
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("[MONITOR] thread panicked");
            }
        }
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::ring_buffer::RingBuffer;

    #[test]
    fn test_report_deltas_and_latency() {
        let format = StreamFormat::float(48000, 2);
        let previous = MonitorSample {
            frames_transferred: 1000,
            underruns: 2,
            overruns: 1,
            ..Default::default()
        };
        let current = MonitorSample {
            frames_transferred: 49000,
            underruns: 2,
            overruns: 1,
            buffered_frames: 4800,
            current_usage_pct: 58.8,
            peak_usage_pct: 70.0,
        };

        let report = MonitorReport::between(&previous, &current, &format);
        assert_eq!(report.frames_delta, 48000);
        assert_eq!(report.underruns_delta, 0);
        assert!((report.latency_ms - 100.0).abs() < 1e-9);
        assert!(!report.is_degraded());
    }

    #[test]
    fn test_report_flags_dropouts() {
        let format = StreamFormat::float(44100, 2);
        let previous = MonitorSample::default();
        let current = MonitorSample {
            overruns: 3,
            ..Default::default()
        };
        let report = MonitorReport::between(&previous, &current, &format);
        assert_eq!(report.overruns_delta, 3);
        assert!(report.is_degraded());
    }

    #[test]
    fn test_sample_reads_buffered_frames() {
        let (mut producer, _consumer) = RingBuffer::new(64);
        producer.write(&[0.5; 20], 10, 2).unwrap();
        let shared = RouterShared::new();
        let format = StreamFormat::float(48000, 2);

        let sample = MonitorSample::take(&producer.monitor(), &shared, &format);
        assert_eq!(sample.buffered_frames, 10);
        assert_eq!(sample.frames_transferred, 0);
    }

    #[test]
    fn test_monitor_stops_promptly() {
        let (producer, _consumer) = RingBuffer::new(64);
        let shared = Arc::new(RouterShared::new());
        let handle = MonitorHandle::spawn(
            producer.monitor(),
            shared,
            StreamFormat::default(),
            Duration::from_secs(60),
        )
        .unwrap();

        let started = std::time::Instant::now();
        handle.stop();
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
