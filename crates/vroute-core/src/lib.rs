//! vroute core - audio routing between a virtual endpoint and a physical output
//!
//! Bridges two independently scheduled real-time audio callbacks through a
//! lock-free ring buffer:
//!
//! ```text
//! virtual source ──producer callback──► RingBuffer ──consumer callback──► physical sink
//!                         ▲                  │
//!                    SharedGain         monitor thread (atomics only)
//! ```
//!
//! Per-process volume control lives in `vroute-ipc`; this crate only exposes the
//! gain stage the producer callback reads.

pub mod audio;
pub mod config;
pub mod gain;
pub mod router;
pub mod types;

pub use types::*;
