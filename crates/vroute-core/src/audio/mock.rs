//! In-memory audio backend
//!
//! Devices are declared up front; registered callbacks are invoked by hand via
//! [`MockBackend::drive_input`] and [`MockBackend::drive_output`], so router
//! behaviour can be tested without audio hardware. Failures can be injected at
//! every setup step to exercise rollback.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use super::backend::{
    AudioBackend, ConsumerCallback, DeviceInfo, ProducerCallback, StreamHandle,
};
use super::config::DeviceId;
use super::error::{AudioError, AudioResult};
use crate::types::{Sample, StreamFormat};

/// Which setup step should fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    BuildInput,
    BuildOutput,
    PlayInput,
    PlayOutput,
}

enum MockCallback {
    Input(ProducerCallback),
    Output(ConsumerCallback),
}

struct MockStream {
    callback: Mutex<Option<MockCallback>>,
    playing: AtomicBool,
    fail_play: bool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct MockStreamHandle {
    stream: Arc<MockStream>,
}

impl StreamHandle for MockStreamHandle {
    fn play(&self) -> AudioResult<()> {
        if self.stream.fail_play {
            return Err(AudioError::StreamPlayError("injected failure".to_string()));
        }
        self.stream.playing.store(true, Ordering::Release);
        Ok(())
    }

    fn pause(&self) -> AudioResult<()> {
        self.stream.playing.store(false, Ordering::Release);
        Ok(())
    }
}

impl Drop for MockStreamHandle {
    fn drop(&mut self) {
        self.stream.playing.store(false, Ordering::Release);
        // Taking the lock waits out any in-flight drive_* call
        lock(&self.stream.callback).take();
    }
}

/// In-memory backend with hand-driven callbacks
#[derive(Default)]
pub struct MockBackend {
    inputs: Vec<DeviceInfo>,
    outputs: Vec<DeviceInfo>,
    failures: Mutex<Vec<MockFailure>>,
    streams: Mutex<Vec<Arc<MockStream>>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare an input device; the first one is the default input
    pub fn with_input(mut self, name: &str, sample_rate: u32, channels: u16) -> Self {
        self.inputs.push(DeviceInfo {
            id: DeviceId::with_host(name, "Mock"),
            nominal_sample_rate: sample_rate,
            max_channels: channels,
        });
        self
    }

    /// Declare an output device
    pub fn with_output(mut self, name: &str, sample_rate: u32, channels: u16) -> Self {
        self.outputs.push(DeviceInfo {
            id: DeviceId::with_host(name, "Mock"),
            nominal_sample_rate: sample_rate,
            max_channels: channels,
        });
        self
    }

    /// Make the given setup step fail from now on
    pub fn inject_failure(&self, failure: MockFailure) {
        lock(&self.failures).push(failure);
    }

    fn should_fail(&self, failure: MockFailure) -> bool {
        lock(&self.failures).contains(&failure)
    }

    /// Number of registered (not yet dropped) callbacks
    pub fn registered_streams(&self) -> usize {
        lock(&self.streams)
            .iter()
            .filter(|s| lock(&s.callback).is_some())
            .count()
    }

    /// Number of registered callbacks currently playing
    pub fn playing_streams(&self) -> usize {
        lock(&self.streams)
            .iter()
            .filter(|s| s.playing.load(Ordering::Acquire) && lock(&s.callback).is_some())
            .count()
    }

    /// Invoke every playing input callback with `samples`
    ///
    /// Returns how many callbacks ran.
    pub fn drive_input(&self, samples: &[Sample]) -> usize {
        let streams: Vec<_> = lock(&self.streams).iter().cloned().collect();
        let mut ran = 0;
        for stream in streams {
            if !stream.playing.load(Ordering::Acquire) {
                continue;
            }
            if let Some(MockCallback::Input(callback)) = lock(&stream.callback).as_mut() {
                callback(samples);
                ran += 1;
            }
        }
        ran
    }

    /// Invoke every playing output callback to fill `out`
    ///
    /// Returns how many callbacks ran.
    pub fn drive_output(&self, out: &mut [Sample]) -> usize {
        let streams: Vec<_> = lock(&self.streams).iter().cloned().collect();
        let mut ran = 0;
        for stream in streams {
            if !stream.playing.load(Ordering::Acquire) {
                continue;
            }
            if let Some(MockCallback::Output(callback)) = lock(&stream.callback).as_mut() {
                callback(out);
                ran += 1;
            }
        }
        ran
    }

    fn find(devices: &[DeviceInfo], id: &DeviceId) -> AudioResult<DeviceInfo> {
        devices
            .iter()
            .find(|d| {
                d.id.name == id.name && id.host.as_ref().map_or(true, |h| d.id.host.as_ref() == Some(h))
            })
            .cloned()
            .ok_or_else(|| AudioError::DeviceNotFound(id.display_label()))
    }

    fn register(&self, callback: MockCallback, fail_play: bool) -> Box<dyn StreamHandle> {
        let stream = Arc::new(MockStream {
            callback: Mutex::new(Some(callback)),
            playing: AtomicBool::new(false),
            fail_play,
        });
        let mut streams = lock(&self.streams);
        streams.retain(|s| lock(&s.callback).is_some());
        streams.push(Arc::clone(&stream));
        drop(streams);
        Box::new(MockStreamHandle { stream })
    }
}

impl AudioBackend for MockBackend {
    fn name(&self) -> &str {
        "Mock"
    }

    fn resolve_input(&self, id: Option<&DeviceId>) -> AudioResult<DeviceInfo> {
        match id {
            Some(id) => Self::find(&self.inputs, id),
            None => self
                .inputs
                .first()
                .cloned()
                .ok_or(AudioError::NoDefaultDevice("input")),
        }
    }

    fn resolve_output(&self, id: &DeviceId) -> AudioResult<DeviceInfo> {
        Self::find(&self.outputs, id)
    }

    fn build_input_stream(
        &self,
        _device: &DeviceInfo,
        _format: StreamFormat,
        callback: ProducerCallback,
    ) -> AudioResult<Box<dyn StreamHandle>> {
        if self.should_fail(MockFailure::BuildInput) {
            return Err(AudioError::StreamBuildError("injected failure".to_string()));
        }
        let fail_play = self.should_fail(MockFailure::PlayInput);
        Ok(self.register(MockCallback::Input(callback), fail_play))
    }

    fn build_output_stream(
        &self,
        _device: &DeviceInfo,
        _format: StreamFormat,
        callback: ConsumerCallback,
    ) -> AudioResult<Box<dyn StreamHandle>> {
        if self.should_fail(MockFailure::BuildOutput) {
            return Err(AudioError::StreamBuildError("injected failure".to_string()));
        }
        let fail_play = self.should_fail(MockFailure::PlayOutput);
        Ok(self.register(MockCallback::Output(callback), fail_play))
    }
}
