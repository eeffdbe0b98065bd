//! Volume client
//!
//! One `IpcClient` per using thread: the cache and connection are not shared,
//! so the fast path takes no lock.
//!
//! ```ignore
//! let mut client = IpcClient::new(IpcConfig::default());
//! client.connect()?;
//! client.register(std::process::id(), 1.0, false, "My App")?;
//!
//! // Near the audio path: served from cache within the TTL, never blocks longer
//! // than one bounded round-trip
//! let reading = client.get_volume_fast(std::process::id());
//! ```

mod backoff;
mod cache;
mod clock;

pub use backoff::Backoff;
pub use cache::ClientCache;
pub use clock::{Clock, SystemClock};

#[cfg(test)]
pub(crate) use clock::ManualClock;

use std::io::{self, Read, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Instant;

use socket2::{Domain, SockAddr, Socket, Type};

use crate::config::IpcConfig;
use crate::error::{IpcError, IpcResult};
use crate::protocol::{
    decode_client_records, validate_header, ClientInfo, Command, MessageHeader, Request, Status,
    StatusPayload, HEADER_SIZE,
};

/// Where a [`FastVolume`] came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeSource {
    /// Cache entry younger than the TTL
    Cache,
    /// Fresh round-trip
    Server,
    /// Round-trip failed; last cached value served
    Stale,
    /// Round-trip failed and nothing was cached; unity gain served
    Unknown,
}

/// Result of [`IpcClient::get_volume_fast`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FastVolume {
    pub volume: f32,
    pub muted: bool,
    pub source: VolumeSource,
}

impl FastVolume {
    /// The value may be out of date because the server could not be reached
    pub fn is_degraded(&self) -> bool {
        matches!(self.source, VolumeSource::Stale | VolumeSource::Unknown)
    }
}

/// Decoded response payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub request_id: u32,
    pub payload: Vec<u8>,
}

pub struct IpcClient<C: Clock = SystemClock> {
    config: IpcConfig,
    path: PathBuf,
    stream: Option<UnixStream>,
    next_request_id: u32,
    cache: ClientCache,
    backoff: Backoff,
    retry_at: Option<Instant>,
    refresh_attempts: u64,
    clock: C,
}

impl IpcClient<SystemClock> {
    /// Disconnected client for the configured socket
    pub fn new(config: IpcConfig) -> Self {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock> IpcClient<C> {
    pub fn with_clock(config: IpcConfig, clock: C) -> Self {
        let backoff = Backoff::new(
            config.reconnect_base(),
            config.reconnect_max(),
            config.reconnect_max_attempts,
        );
        Self {
            path: config.socket_path(),
            config,
            stream: None,
            next_request_id: 1,
            cache: ClientCache::new(),
            backoff,
            retry_at: None,
            refresh_attempts: 0,
            clock,
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.path
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Open the socket with bounded connect/send/receive timeouts
    ///
    /// Fails with `ReconnectExhausted` once the backoff has given up.
    pub fn connect(&mut self) -> IpcResult<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        if !self.backoff.should_reconnect() {
            return Err(IpcError::ReconnectExhausted(self.backoff.failures()));
        }

        match self.open_stream() {
            Ok(stream) => {
                log::debug!("[IPC] Connected to {:?}", self.path);
                self.stream = Some(stream);
                self.backoff.reset();
                self.retry_at = None;
                Ok(())
            }
            Err(e) => {
                let delay = self.backoff.record_failure();
                self.retry_at = Some(self.clock.now() + delay);
                log::debug!(
                    "[IPC] Connect to {:?} failed ({} of {}), next attempt in {:?}: {}",
                    self.path,
                    self.backoff.failures(),
                    self.config.reconnect_max_attempts,
                    delay,
                    e
                );
                Err(e)
            }
        }
    }

    fn open_stream(&self) -> IpcResult<UnixStream> {
        let socket = Socket::new(Domain::UNIX, Type::STREAM, None)?;
        let addr = SockAddr::unix(&self.path)?;
        socket
            .connect_timeout(&addr, self.config.connect_timeout())
            .map_err(IpcError::from_io)?;
        socket.set_read_timeout(Some(self.config.io_timeout()))?;
        socket.set_write_timeout(Some(self.config.io_timeout()))?;
        Ok(UnixStream::from(socket))
    }

    /// Close the connection; safe to call repeatedly or before connecting
    pub fn disconnect(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(std::net::Shutdown::Both);
            log::debug!("[IPC] Disconnected from {:?}", self.path);
        }
    }

    /// Whether the backoff still allows connect attempts
    pub fn should_reconnect(&self) -> bool {
        self.backoff.should_reconnect()
    }

    /// Forget past connect failures
    pub fn reset_reconnect(&mut self) {
        self.backoff.reset();
        self.retry_at = None;
    }

    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    /// Connect if disconnected and the backoff delay has passed
    fn ensure_connected(&mut self) -> IpcResult<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        if let Some(retry_at) = self.retry_at {
            if self.clock.now() < retry_at {
                return Err(IpcError::NotConnected);
            }
        }
        self.connect()
    }

    /// One request/response round-trip on the current connection
    ///
    /// Any short write, short read, timeout or framing mismatch drops the
    /// connection: the stream is not resumable mid-message. An `Error` reply
    /// keeps it open and surfaces as `Rejected`.
    pub fn send_sync(&mut self, request: &Request) -> IpcResult<Reply> {
        let request_id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1).max(1);

        let result = match self.stream.as_mut() {
            Some(stream) => round_trip(stream, request, request_id),
            None => return Err(IpcError::NotConnected),
        };

        match result {
            Ok(reply) => Ok(reply),
            Err(e @ IpcError::Rejected(_)) => Err(e),
            Err(e) => {
                log::debug!("[IPC] {:?} failed, dropping connection: {}", request.command(), e);
                self.disconnect();
                Err(e)
            }
        }
    }

    fn request(&mut self, request: &Request) -> IpcResult<Reply> {
        self.ensure_connected()?;
        self.send_sync(request)
    }

    fn request_status(&mut self, request: &Request) -> IpcResult<StatusPayload> {
        let reply = self.request(request)?;
        StatusPayload::decode(&reply.payload).map_err(|_| {
            IpcError::UnexpectedResponse(format!(
                "{:?} reply has {} payload bytes",
                request.command(),
                reply.payload.len()
            ))
        })
    }

    /// Register `pid`, replacing any stale entry for it
    pub fn register(&mut self, pid: u32, volume: f32, muted: bool, name: &str) -> IpcResult<()> {
        let status = self.request_status(&Request::Register {
            pid,
            volume,
            muted,
            name: name.to_string(),
        })?;
        self.cache
            .store(pid, status.volume, status.muted != 0, self.clock.now());
        Ok(())
    }

    pub fn unregister(&mut self, pid: u32) -> IpcResult<()> {
        self.request_status(&Request::Unregister { pid })?;
        if self.cache.last(pid).is_some() {
            self.cache.invalidate();
        }
        Ok(())
    }

    /// Authoritative (volume, muted); refreshes the cache
    pub fn get_volume(&mut self, pid: u32) -> IpcResult<(f32, bool)> {
        let status = self.request_status(&Request::GetVolume { pid })?;
        let value = (status.volume, status.muted != 0);
        self.cache.store(pid, value.0, value.1, self.clock.now());
        Ok(value)
    }

    pub fn get_mute(&mut self, pid: u32) -> IpcResult<bool> {
        let status = self.request_status(&Request::GetMute { pid })?;
        self.cache
            .store(pid, status.volume, status.muted != 0, self.clock.now());
        Ok(status.muted != 0)
    }

    pub fn set_volume(&mut self, pid: u32, volume: f32) -> IpcResult<()> {
        let status = self.request_status(&Request::SetVolume { pid, volume })?;
        self.cache
            .store(pid, status.volume, status.muted != 0, self.clock.now());
        Ok(())
    }

    pub fn set_mute(&mut self, pid: u32, muted: bool) -> IpcResult<()> {
        let status = self.request_status(&Request::SetMute { pid, muted })?;
        self.cache
            .store(pid, status.volume, status.muted != 0, self.clock.now());
        Ok(())
    }

    pub fn list_clients(&mut self) -> IpcResult<Vec<ClientInfo>> {
        let reply = self.request(&Request::ListClients)?;
        decode_client_records(&reply.payload).map_err(|_| {
            IpcError::UnexpectedResponse(format!(
                "client list of {} bytes is not a whole number of records",
                reply.payload.len()
            ))
        })
    }

    pub fn ping(&mut self) -> IpcResult<()> {
        self.request(&Request::Ping).map(|_| ())
    }

    /// (volume, muted) for `pid` without ever blocking longer than one round-trip
    ///
    /// Within the cache TTL no I/O happens at all. Otherwise one refresh is
    /// attempted; on failure the last cached value is served (or unity gain if
    /// there is none) and the reading is marked degraded.
    pub fn get_volume_fast(&mut self, pid: u32) -> FastVolume {
        let now = self.clock.now();
        if let Some((volume, muted)) = self.cache.fresh(pid, now, self.config.cache_ttl()) {
            return FastVolume {
                volume,
                muted,
                source: VolumeSource::Cache,
            };
        }

        self.refresh_attempts += 1;
        match self.get_volume(pid) {
            Ok((volume, muted)) => FastVolume {
                volume,
                muted,
                source: VolumeSource::Server,
            },
            Err(e) => {
                log::trace!("[IPC] Volume refresh for pid {} failed: {}", pid, e);
                match self.cache.last(pid) {
                    Some((volume, muted)) => FastVolume {
                        volume,
                        muted,
                        source: VolumeSource::Stale,
                    },
                    None => FastVolume {
                        volume: 1.0,
                        muted: false,
                        source: VolumeSource::Unknown,
                    },
                }
            }
        }
    }

    /// Times `get_volume_fast` went past the cache
    pub fn refresh_attempts(&self) -> u64 {
        self.refresh_attempts
    }

    pub fn cache(&self) -> &ClientCache {
        &self.cache
    }

    #[cfg(test)]
    pub(crate) fn cache_mut(&mut self) -> &mut ClientCache {
        &mut self.cache
    }
}

impl<C: Clock> Drop for IpcClient<C> {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn write_all(stream: &mut UnixStream, bytes: &[u8]) -> IpcResult<()> {
    let mut sent = 0;
    while sent < bytes.len() {
        match stream.write(&bytes[sent..]) {
            Ok(0) => {
                return Err(IpcError::ShortWrite {
                    expected: bytes.len(),
                    sent,
                })
            }
            Ok(n) => sent += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(IpcError::from_io(e)),
        }
    }
    Ok(())
}

fn read_full(stream: &mut UnixStream, buf: &mut [u8]) -> IpcResult<()> {
    let mut got = 0;
    while got < buf.len() {
        match stream.read(&mut buf[got..]) {
            Ok(0) => {
                return Err(IpcError::ShortRead {
                    expected: buf.len(),
                    got,
                })
            }
            Ok(n) => got += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(IpcError::from_io(e)),
        }
    }
    Ok(())
}

fn round_trip(stream: &mut UnixStream, request: &Request, request_id: u32) -> IpcResult<Reply> {
    let payload = request.encode_payload();
    let header = MessageHeader::new(request.command(), payload.len() as u32, request_id);
    let mut message = Vec::with_capacity(HEADER_SIZE + payload.len());
    message.extend_from_slice(header.as_bytes());
    message.extend_from_slice(&payload);
    write_all(stream, &message)?;

    let mut header_bytes = [0u8; HEADER_SIZE];
    read_full(stream, &mut header_bytes)?;
    let header = MessageHeader::parse(&header_bytes).ok_or(IpcError::ShortRead {
        expected: HEADER_SIZE,
        got: 0,
    })?;
    let command = validate_header(&header).map_err(IpcError::InvalidHeader)?;

    let mut payload = vec![0u8; header.payload_len as usize];
    read_full(stream, &mut payload)?;

    if header.request_id != request_id {
        return Err(IpcError::UnexpectedResponse(format!(
            "request id {} answered as {}",
            request_id, header.request_id
        )));
    }

    match command {
        Command::Response => Ok(Reply {
            request_id,
            payload,
        }),
        Command::Error => {
            let status = StatusPayload::decode(&payload)
                .map(|p| p.status())
                .unwrap_or(Status::InternalError);
            Err(IpcError::Rejected(status))
        }
        other => Err(IpcError::UnexpectedResponse(format!(
            "{:?} is not a reply",
            other
        ))),
    }
}
