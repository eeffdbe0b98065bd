//! Gain synchronisation worker
//!
//! Polls the server for one pid's volume/mute through a private [`IpcClient`]
//! and publishes it into a [`SharedGain`] read by the router's producer callback.
//! The audio path only ever sees the atomics; all socket I/O stays on this thread.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam::channel::{bounded, RecvTimeoutError, Sender};
use vroute_core::gain::SharedGain;

use crate::client::{IpcClient, VolumeSource};
use crate::config::IpcConfig;
use crate::error::IpcResult;

/// Running worker; `stop` signals and joins it
pub struct GainSync {
    stop_tx: Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl GainSync {
    /// Start mirroring the server's volume for `pid` into `gain` every `interval`
    pub fn spawn(
        config: IpcConfig,
        pid: u32,
        gain: Arc<SharedGain>,
        interval: Duration,
    ) -> IpcResult<Self> {
        let (stop_tx, stop_rx) = bounded::<()>(1);

        let thread = std::thread::Builder::new()
            .name("vroute-gain-sync".into())
            .spawn(move || {
                let retry_after = config.reconnect_max();
                let mut client = IpcClient::new(config);
                let mut degraded = false;
                let mut exhausted_at: Option<Instant> = None;
                log::info!("[GAIN] Following volume of pid {} every {:?}", pid, interval);

                loop {
                    let reading = client.get_volume_fast(pid);
                    if reading.source != VolumeSource::Unknown {
                        gain.set(reading.volume, reading.muted);
                    }

                    if reading.is_degraded() != degraded {
                        degraded = reading.is_degraded();
                        if degraded {
                            log::warn!("[GAIN] Volume server unreachable, holding last known gain");
                        } else {
                            log::info!(
                                "[GAIN] Volume server reachable (pid {}: {:.2}{})",
                                pid,
                                reading.volume,
                                if reading.muted { ", muted" } else { "" }
                            );
                        }
                    }

                    // Backoff gave up: wait one max delay, then start over
                    if client.should_reconnect() {
                        exhausted_at = None;
                    } else {
                        let since = *exhausted_at.get_or_insert_with(Instant::now);
                        if since.elapsed() >= retry_after {
                            log::debug!("[GAIN] Resetting reconnect backoff");
                            client.reset_reconnect();
                            exhausted_at = None;
                        }
                    }

                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }

                log::debug!("[GAIN] stopped");
            })?;

        Ok(Self {
            stop_tx,
            thread: Some(thread),
        })
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let _ = self.stop_tx.try_send(());
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("[GAIN] thread panicked");
            }
        }
    }
}

impl Drop for GainSync {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::IpcServer;

    fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_gain_follows_server() {
        let dir = tempfile::tempdir().unwrap();
        let config = IpcConfig::default()
            .with_socket_path(dir.path().join("vroute.sock"))
            .with_poll_timeout_ms(20)
            .with_cache_ttl_ms(0);
        let _server = IpcServer::start(&config).unwrap();

        let mut app = IpcClient::new(config.clone());
        app.register(4242, 0.25, false, "App").unwrap();

        let gain = Arc::new(SharedGain::unity());
        let sync = GainSync::spawn(config, 4242, Arc::clone(&gain), Duration::from_millis(5)).unwrap();

        assert!(wait_for(|| gain.volume() == 0.25));

        app.set_mute(4242, true).unwrap();
        assert!(wait_for(|| gain.is_muted()));

        sync.stop();
    }

    #[test]
    fn test_unreachable_server_keeps_unity() {
        let dir = tempfile::tempdir().unwrap();
        let config = IpcConfig::default().with_socket_path(dir.path().join("missing.sock"));
        let gain = Arc::new(SharedGain::new(0.7, false));

        let sync = GainSync::spawn(config, 1, Arc::clone(&gain), Duration::from_millis(5)).unwrap();
        std::thread::sleep(Duration::from_millis(50));
        sync.stop();

        // Nothing was ever known for the pid, so the gain is left alone
        assert_eq!(gain.get(), (0.7, false));
    }
}
