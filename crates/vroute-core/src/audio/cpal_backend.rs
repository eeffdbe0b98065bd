//! CPAL audio backend implementation
//!
//! `cpal::Stream` is not `Send`, but the router must be stoppable from any
//! thread. Each stream is therefore owned by its own "stream host" thread that
//! builds it, then serves play/pause/close commands over a channel:
//!
//! ```text
//! ┌──────────────────┐   HostCommand    ┌────────────────────┐
//! │ CpalStreamHandle │ ───────────────► │ stream host thread │──owns──► cpal::Stream
//! │   (Send, any     │ ◄─────────────── │  (builds + drops)  │             │
//! │    thread)       │   AudioResult    └────────────────────┘             ▼
//! └──────────────────┘                                          device RT callback
//! ```
//!
//! Dropping the handle sends `Close` and joins the host thread, which drops the
//! stream. CPAL stops the device callback before its `Drop` returns, which gives
//! the deregistration guarantee the router needs.

use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{BufferSize as CpalBufferSize, SampleRate, StreamConfig};
use crossbeam::channel::{bounded, Receiver, Sender};

use super::backend::{AudioBackend, ConsumerCallback, DeviceInfo, ProducerCallback, StreamHandle};
use super::config::DeviceId;
use super::device::{describe_device, find_device, find_device_or_default, Direction};
use super::error::{AudioError, AudioResult};
use crate::types::StreamFormat;

enum HostCommand {
    Play(Sender<AudioResult<()>>),
    Pause(Sender<AudioResult<()>>),
    Close,
}

enum StreamCallback {
    Input(ProducerCallback),
    Output(ConsumerCallback),
}

/// Handle to a stream living on its host thread
struct CpalStreamHandle {
    label: String,
    commands: Sender<HostCommand>,
    thread: Option<JoinHandle<()>>,
}

impl CpalStreamHandle {
    fn request(&self, make: fn(Sender<AudioResult<()>>) -> HostCommand) -> AudioResult<()> {
        let (reply_tx, reply_rx) = bounded(1);
        self.commands
            .send(make(reply_tx))
            .map_err(|_| AudioError::StreamPlayError(format!("{}: stream host gone", self.label)))?;
        reply_rx
            .recv()
            .map_err(|_| AudioError::StreamPlayError(format!("{}: stream host gone", self.label)))?
    }
}

impl StreamHandle for CpalStreamHandle {
    fn play(&self) -> AudioResult<()> {
        self.request(HostCommand::Play)
    }

    fn pause(&self) -> AudioResult<()> {
        self.request(HostCommand::Pause)
    }
}

impl Drop for CpalStreamHandle {
    fn drop(&mut self) {
        let _ = self.commands.send(HostCommand::Close);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("[AUDIO] Stream host thread for {} panicked", self.label);
            }
        }
        log::debug!("[AUDIO] Stream {} closed", self.label);
    }
}

/// Backend over real devices via CPAL
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalBackend;

impl CpalBackend {
    pub fn new() -> Self {
        Self
    }

    fn spawn_stream(
        &self,
        device: &DeviceInfo,
        direction: Direction,
        format: StreamFormat,
        callback: StreamCallback,
    ) -> AudioResult<Box<dyn StreamHandle>> {
        let label = device.id.display_label();
        let id = device.id.clone();
        let (command_tx, command_rx) = crossbeam::channel::unbounded();
        let (ready_tx, ready_rx) = bounded(1);

        let thread = std::thread::Builder::new()
            .name(format!("vroute-stream-{}", direction_tag(direction)))
            .spawn(move || stream_host(id, direction, format, callback, ready_tx, command_rx))
            .map_err(|e| AudioError::ThreadSpawn {
                name: "stream host",
                reason: e.to_string(),
            })?;

        let handle = CpalStreamHandle {
            label: label.clone(),
            commands: command_tx,
            thread: Some(thread),
        };

        match ready_rx.recv() {
            Ok(Ok(())) => {
                log::debug!("[AUDIO] Stream {} registered ({})", label, format);
                Ok(Box::new(handle))
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(AudioError::StreamBuildError(format!(
                "{}: stream host exited during setup",
                label
            ))),
        }
    }
}

fn direction_tag(direction: Direction) -> &'static str {
    match direction {
        Direction::Input => "in",
        Direction::Output => "out",
    }
}

/// Body of a stream host thread: build, report, then serve commands until closed
fn stream_host(
    id: DeviceId,
    direction: Direction,
    format: StreamFormat,
    callback: StreamCallback,
    ready: Sender<AudioResult<()>>,
    commands: Receiver<HostCommand>,
) {
    let stream = match build_stream(&id, direction, format, callback) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    let _ = ready.send(Ok(()));

    while let Ok(command) = commands.recv() {
        match command {
            HostCommand::Play(reply) => {
                let result = stream
                    .play()
                    .map_err(|e| AudioError::StreamPlayError(format!("{}: {}", id, e)));
                let _ = reply.send(result);
            }
            HostCommand::Pause(reply) => {
                let result = stream
                    .pause()
                    .map_err(|e| AudioError::StreamPlayError(format!("{}: {}", id, e)));
                let _ = reply.send(result);
            }
            HostCommand::Close => break,
        }
    }

    drop(stream);
}

fn build_stream(
    id: &DeviceId,
    direction: Direction,
    format: StreamFormat,
    callback: StreamCallback,
) -> AudioResult<cpal::Stream> {
    let (device, _host) = find_device(id, direction)?;
    let config = StreamConfig {
        channels: format.channels,
        sample_rate: SampleRate(format.sample_rate),
        buffer_size: CpalBufferSize::Default,
    };
    let label = id.display_label();

    let stream = match callback {
        StreamCallback::Input(mut callback) => {
            let err_label = label.clone();
            device.build_input_stream(
                &config,
                move |data: &[f32], _info: &cpal::InputCallbackInfo| callback(data),
                move |err| log::error!("[AUDIO] Source stream error on {}: {}", err_label, err),
                None,
            )
        }
        StreamCallback::Output(mut callback) => {
            let err_label = label.clone();
            device.build_output_stream(
                &config,
                move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| callback(data),
                move |err| log::error!("[AUDIO] Sink stream error on {}: {}", err_label, err),
                None,
            )
        }
    }
    .map_err(|e| AudioError::StreamBuildError(format!("{}: {}", label, e)))?;

    // CPAL streams may start running as soon as they are built
    stream
        .pause()
        .map_err(|e| AudioError::StreamPlayError(format!("{}: {}", label, e)))?;

    Ok(stream)
}

impl AudioBackend for CpalBackend {
    fn name(&self) -> &str {
        "CPAL"
    }

    fn resolve_input(&self, id: Option<&DeviceId>) -> AudioResult<DeviceInfo> {
        let (device, host) = find_device_or_default(id, Direction::Input)?;
        describe_device(&device, &host, Direction::Input)
    }

    fn resolve_output(&self, id: &DeviceId) -> AudioResult<DeviceInfo> {
        let (device, host) = find_device(id, Direction::Output)?;
        describe_device(&device, &host, Direction::Output)
    }

    fn build_input_stream(
        &self,
        device: &DeviceInfo,
        format: StreamFormat,
        callback: ProducerCallback,
    ) -> AudioResult<Box<dyn StreamHandle>> {
        self.spawn_stream(device, Direction::Input, format, StreamCallback::Input(callback))
    }

    fn build_output_stream(
        &self,
        device: &DeviceInfo,
        format: StreamFormat,
        callback: ConsumerCallback,
    ) -> AudioResult<Box<dyn StreamHandle>> {
        self.spawn_stream(device, Direction::Output, format, StreamCallback::Output(callback))
    }
}
