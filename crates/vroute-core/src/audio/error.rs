//! Audio backend and router setup error types

use thiserror::Error;

/// Errors that can occur while setting up or tearing down an audio route
///
/// Steady-state problems (overruns, underruns) are never reported here; they are
/// only counted by the router.
#[derive(Error, Debug)]
pub enum AudioError {
    /// No default device for the requested direction
    #[error("No default audio {0} device")]
    NoDefaultDevice(&'static str),

    /// Device not found
    #[error("Audio device not found: {0}")]
    DeviceNotFound(String),

    /// Failed to get device configuration
    #[error("Failed to get device config: {0}")]
    ConfigError(String),

    /// Failed to build (register) an audio stream callback
    #[error("Failed to build audio stream: {0}")]
    StreamBuildError(String),

    /// Failed to start/play stream
    #[error("Failed to start audio stream: {0}")]
    StreamPlayError(String),

    /// Unsupported stream format
    #[error("Unsupported stream format: {0}")]
    UnsupportedFormat(String),

    /// `start` called while a route is already active
    #[error("Router already running (bound to {0})")]
    AlreadyRunning(String),

    /// Could not spawn a helper thread
    #[error("Failed to spawn {name} thread: {reason}")]
    ThreadSpawn { name: &'static str, reason: String },
}

/// Result type for audio operations
pub type AudioResult<T> = Result<T, AudioError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AudioError::DeviceNotFound("sink-A".to_string());
        assert_eq!(err.to_string(), "Audio device not found: sink-A");

        let err = AudioError::NoDefaultDevice("input");
        assert_eq!(err.to_string(), "No default audio input device");
    }
}
