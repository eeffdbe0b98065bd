//! IPC error types

use std::path::PathBuf;

use thiserror::Error;

use crate::protocol::Status;

/// Errors from the IPC client and server
#[derive(Error, Debug)]
pub enum IpcError {
    /// Underlying socket error
    #[error("IPC I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No live connection (never connected, or dropped after a framing error)
    #[error("Not connected to the volume server")]
    NotConnected,

    /// Connect, send or receive exceeded its timeout
    #[error("IPC operation timed out")]
    Timeout,

    /// Peer closed mid-message
    #[error("Short read: got {got} of {expected} bytes")]
    ShortRead { expected: usize, got: usize },

    /// Peer stopped accepting bytes mid-message
    #[error("Short write: sent {sent} of {expected} bytes")]
    ShortWrite { expected: usize, sent: usize },

    /// A received header failed validation
    #[error("Invalid message header: {0}")]
    InvalidHeader(Status),

    /// The server answered with a non-Ok status
    #[error("Request rejected by server: {0}")]
    Rejected(Status),

    /// Response did not match the request (wrong id, command or payload shape)
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    /// Backoff gave up; call `reset_reconnect` to try again
    #[error("Reconnect attempts exhausted after {0} failures")]
    ReconnectExhausted(u32),

    /// Client table already holds the configured maximum
    #[error("Client table full ({0} entries)")]
    TableFull(usize),

    /// Could not create the listening socket
    #[error("Failed to bind {path:?}: {source}")]
    Bind {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl IpcError {
    /// Map a socket error, folding timeouts into [`IpcError::Timeout`]
    pub(crate) fn from_io(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => IpcError::Timeout,
            _ => IpcError::Io(e),
        }
    }

    /// Wire status to report for this error
    pub fn status(&self) -> Status {
        match self {
            IpcError::InvalidHeader(status) | IpcError::Rejected(status) => *status,
            IpcError::TableFull(_) => Status::ServiceUnavailable,
            _ => Status::InternalError,
        }
    }
}

/// Result type for IPC operations
pub type IpcResult<T> = Result<T, IpcError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeouts_fold_into_timeout() {
        let err = IpcError::from_io(std::io::Error::from(std::io::ErrorKind::WouldBlock));
        assert!(matches!(err, IpcError::Timeout));

        let err = IpcError::from_io(std::io::Error::from(std::io::ErrorKind::NotFound));
        assert!(matches!(err, IpcError::Io(_)));
    }

    #[test]
    fn test_table_full_maps_to_service_unavailable() {
        assert_eq!(IpcError::TableFull(64).status(), Status::ServiceUnavailable);
        assert_eq!(
            IpcError::Rejected(Status::ClientNotFound).status(),
            Status::ClientNotFound
        );
    }
}
