//! Audio router - ring buffer, lifecycle state machine, monitor
//!
//! This module contains the components that bridge the virtual source to a
//! physical sink:
//! - RingBuffer: lock-free SPSC sample queue between the two audio callbacks
//! - RouterState: lifecycle readable from the callbacks without locking
//! - Monitor: periodic watermark and dropout logging
//! - AudioRouter: owns the streams and drives start/stop

mod monitor;
mod ring_buffer;
mod router;
mod state;

pub use monitor::{MonitorReport, MonitorSample};
pub use ring_buffer::{RingBuffer, RingConsumer, RingError, RingMonitor, RingProducer, RingStats};
pub use router::{AudioRouter, RouterStats, RouterStatus};
pub use state::RouterState;
