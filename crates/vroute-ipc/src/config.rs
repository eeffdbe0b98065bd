//! IPC server and client configuration

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Settings shared by the server and its clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IpcConfig {
    /// Socket path override (None = `VROUTE_SOCKET` or the support directory)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub socket_path: Option<PathBuf>,

    /// Most entries the server's client table will hold
    pub max_clients: usize,

    pub connect_timeout_ms: u64,

    /// Send and receive timeout for each socket operation
    pub io_timeout_ms: u64,

    /// How long a cached volume is served without asking the server
    pub cache_ttl_ms: u64,

    /// First reconnect delay; doubles per failed attempt
    pub reconnect_base_ms: u64,

    /// Upper bound on the reconnect delay
    pub reconnect_max_ms: u64,

    /// Failed connects before the client stops trying until reset
    pub reconnect_max_attempts: u32,

    /// Server event loop wake interval (bounds stop latency)
    pub poll_timeout_ms: u64,
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            socket_path: None,
            max_clients: 64,
            connect_timeout_ms: 500,
            io_timeout_ms: 250,
            cache_ttl_ms: 100,
            reconnect_base_ms: 100,
            reconnect_max_ms: 5000,
            reconnect_max_attempts: 5,
            poll_timeout_ms: 100,
        }
    }
}

impl IpcConfig {
    /// Set an explicit socket path
    pub fn with_socket_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.socket_path = Some(path.into());
        self
    }

    pub fn with_max_clients(mut self, max_clients: usize) -> Self {
        self.max_clients = max_clients;
        self
    }

    pub fn with_cache_ttl_ms(mut self, ms: u64) -> Self {
        self.cache_ttl_ms = ms;
        self
    }

    pub fn with_io_timeout_ms(mut self, ms: u64) -> Self {
        self.io_timeout_ms = ms;
        self
    }

    /// Set the reconnect backoff parameters
    pub fn with_reconnect(mut self, base_ms: u64, max_ms: u64, max_attempts: u32) -> Self {
        self.reconnect_base_ms = base_ms;
        self.reconnect_max_ms = max_ms;
        self.reconnect_max_attempts = max_attempts;
        self
    }

    pub fn with_poll_timeout_ms(mut self, ms: u64) -> Self {
        self.poll_timeout_ms = ms;
        self
    }

    /// Resolved socket path
    pub fn socket_path(&self) -> PathBuf {
        match &self.socket_path {
            Some(path) => vroute_core::config::socket_path_from(Some(path.as_path())),
            None => vroute_core::config::default_socket_path(),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms.max(1))
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms.max(1))
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    pub fn reconnect_base(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_ms)
    }

    pub fn reconnect_max(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_ms)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_socket_path_wins() {
        let config = IpcConfig::default().with_socket_path("/tmp/vroute-test.sock");
        assert_eq!(config.socket_path(), PathBuf::from("/tmp/vroute-test.sock"));
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config: IpcConfig = serde_yaml::from_str("cache_ttl_ms: 40\n").unwrap();
        assert_eq!(config.cache_ttl(), Duration::from_millis(40));
        assert_eq!(config.max_clients, 64);
        assert_eq!(config.reconnect_max_attempts, 5);
        assert_eq!(config.socket_path, None);
    }

    #[test]
    fn test_zero_timeouts_are_bumped() {
        let config = IpcConfig {
            io_timeout_ms: 0,
            ..Default::default()
        };
        // A zero socket timeout would mean "block forever"
        assert_eq!(config.io_timeout(), Duration::from_millis(1));
    }
}
