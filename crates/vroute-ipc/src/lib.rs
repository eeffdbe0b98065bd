//! Cross-process volume control for vroute
//!
//! This crate provides:
//! - The wire protocol: fixed 16-byte header, command/status enums, payload layouts
//! - `IpcServer`: single-threaded mio event loop holding the pid → volume/mute table
//! - `IpcClient`: blocking client with bounded timeouts, reconnect backoff and a
//!   TTL cache so the audio-adjacent path never waits on the socket
//! - `GainSync`: background worker feeding a router's `SharedGain` from the server
//!
//! # Architecture
//!
//! ```text
//! app process ── IpcClient ──┐
//! app process ── IpcClient ──┼── unix socket ──► IpcServer (event loop, ClientTable)
//! vroute daemon ─ GainSync ──┘                                    ▲
//!        │                                                       source of truth
//!        └──► SharedGain ──► router producer callback
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod gain_sync;
pub mod protocol;
pub mod server;

pub use client::{Backoff, Clock, FastVolume, IpcClient, SystemClock, VolumeSource};
pub use config::IpcConfig;
pub use error::{IpcError, IpcResult};
pub use gain_sync::GainSync;
pub use protocol::{ClientInfo, Command, MessageHeader, Request, Status};
pub use server::{IpcServer, ServerHandle, ServerStats};
