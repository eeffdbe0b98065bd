//! Audio device backends for the router
//!
//! Provides a unified device seam with two implementations:
//! - **CPAL** (`cpal-backend` feature): CoreAudio, ALSA/JACK/PipeWire, WASAPI
//! - **Mock**: hand-driven in-memory devices for tests and hardware-free runs
//!
//! # Example Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use vroute_core::audio::{CpalBackend, RouterConfig};
//! use vroute_core::router::AudioRouter;
//!
//! let router = AudioRouter::new(Arc::new(CpalBackend::new()), RouterConfig::default());
//! router.start("[CoreAudio] MacBook Pro Speakers")?;
//! ```

mod backend;
mod config;
mod error;
mod mock;

#[cfg(feature = "cpal-backend")]
mod cpal_backend;
#[cfg(feature = "cpal-backend")]
mod device;

pub use backend::{AudioBackend, ConsumerCallback, DeviceInfo, ProducerCallback, StreamHandle};
pub use config::{
    DeviceId, RouterConfig, DEFAULT_BUFFER_LATENCY_MS, DEFAULT_MONITOR_INTERVAL_MS,
    DEFAULT_SAMPLE_RATE, DEFAULT_SETTLE_DELAY_MS,
};
pub use error::{AudioError, AudioResult};
pub use mock::{MockBackend, MockFailure};

#[cfg(feature = "cpal-backend")]
pub use cpal_backend::CpalBackend;
