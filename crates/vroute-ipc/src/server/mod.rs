//! Volume server - single-threaded mio event loop
//!
//! ```text
//! IpcServer thread ("vroute-ipc")
//!   Poll ─┬─ LISTENER  → accept, register READABLE
//!         ├─ WAKER     → stop requested by ServerHandle
//!         └─ Token(n)  → read, frame, dispatch against ClientTable, queue reply
//! ```
//!
//! The client table and the connection map are both owned by the loop thread,
//! so neither needs a lock. Everything the outside world can see goes through
//! [`ServerStats`] atomics.

mod connection;
mod dispatch;
mod table;

pub use table::{ClientEntry, ClientTable};

use std::collections::HashMap;
use std::io;
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use mio::event::Event;
use mio::net::UnixListener;
use mio::{Events, Interest, Poll, Token, Waker};

use crate::config::IpcConfig;
use crate::error::{IpcError, IpcResult};
use connection::{Connection, Frame, ReadOutcome};
use dispatch::{handle_request, Reply};

const LISTENER: Token = Token(0);
const WAKER: Token = Token(1);
const FIRST_CONNECTION: usize = 2;

const EVENTS_CAPACITY: usize = 128;

#[derive(Debug, Default)]
struct StatsCounters {
    connections: AtomicUsize,
    clients_registered: AtomicUsize,
    messages_handled: AtomicU64,
    error_replies: AtomicU64,
    protocol_errors: AtomicU64,
}

/// Server counters snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ServerStats {
    /// Live socket connections
    pub connections: usize,
    /// Entries in the client table
    pub clients_registered: usize,
    /// Requests answered, including rejected ones
    pub messages_handled: u64,
    /// Replies sent as `Error`, protocol errors included
    pub error_replies: u64,
    /// Headers that failed validation
    pub protocol_errors: u64,
}

impl StatsCounters {
    fn snapshot(&self) -> ServerStats {
        ServerStats {
            connections: self.connections.load(Ordering::Relaxed),
            clients_registered: self.clients_registered.load(Ordering::Relaxed),
            messages_handled: self.messages_handled.load(Ordering::Relaxed),
            error_replies: self.error_replies.load(Ordering::Relaxed),
            protocol_errors: self.protocol_errors.load(Ordering::Relaxed),
        }
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// A bound, not yet running server
pub struct IpcServer {
    poll: Poll,
    listener: UnixListener,
    waker: Arc<Waker>,
    path: PathBuf,
    table: ClientTable,
    connections: HashMap<Token, Connection>,
    next_token: usize,
    poll_timeout: Duration,
    stop: Arc<AtomicBool>,
    stats: Arc<StatsCounters>,
}

impl IpcServer {
    /// Bind and spawn the event loop thread
    pub fn start(config: &IpcConfig) -> IpcResult<ServerHandle> {
        Self::bind(config)?.spawn()
    }

    /// Create the listening socket at the configured path
    ///
    /// A stale socket file is removed first. If another server still answers
    /// on that path, binding fails with `AddrInUse` instead; anything at the
    /// path that is not a socket is left alone and fails with `AlreadyExists`.
    pub fn bind(config: &IpcConfig) -> IpcResult<Self> {
        let path = config.socket_path();
        let bind_err = |source: io::Error| IpcError::Bind {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(bind_err)?;
        }
        if let Ok(metadata) = std::fs::symlink_metadata(&path) {
            if !metadata.file_type().is_socket() {
                return Err(bind_err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    "path exists and is not a socket",
                )));
            }
            if std::os::unix::net::UnixStream::connect(&path).is_ok() {
                return Err(bind_err(io::Error::new(
                    io::ErrorKind::AddrInUse,
                    "another server is listening",
                )));
            }
            log::info!("[IPC] Removing stale socket {:?}", path);
            std::fs::remove_file(&path).map_err(bind_err)?;
        }

        let mut listener = UnixListener::bind(&path).map_err(bind_err)?;
        let poll = Poll::new()?;
        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER)?);

        Ok(Self {
            poll,
            listener,
            waker,
            path,
            table: ClientTable::new(config.max_clients),
            connections: HashMap::new(),
            next_token: FIRST_CONNECTION,
            poll_timeout: config.poll_timeout(),
            stop: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(StatsCounters::default()),
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.path
    }

    /// Run the event loop on its own thread
    pub fn spawn(self) -> IpcResult<ServerHandle> {
        let stop = Arc::clone(&self.stop);
        let waker = Arc::clone(&self.waker);
        let stats = Arc::clone(&self.stats);
        let path = self.path.clone();

        let thread = std::thread::Builder::new()
            .name("vroute-ipc".into())
            .spawn(move || self.run())?;

        Ok(ServerHandle {
            stop,
            waker,
            stats,
            path,
            thread: Some(thread),
        })
    }

    fn run(mut self) {
        log::info!("[IPC] Server listening on {:?}", self.path);
        let mut events = Events::with_capacity(EVENTS_CAPACITY);

        // The flag is checked once per wake; the poll timeout bounds stop latency
        while !self.stop.load(Ordering::Acquire) {
            if let Err(e) = self.poll.poll(&mut events, Some(self.poll_timeout)) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                log::error!("[IPC] poll failed, shutting down: {}", e);
                break;
            }

            for event in events.iter() {
                match event.token() {
                    LISTENER => self.accept_connections(),
                    WAKER => {}
                    token => self.handle_connection_event(token, event),
                }
            }
        }

        let tokens: Vec<Token> = self.connections.keys().copied().collect();
        for token in tokens {
            self.close_connection(token);
        }
        let stats = self.stats.snapshot();
        log::info!(
            "[IPC] Server stopped: {} messages handled, {} protocol errors, {} clients registered",
            stats.messages_handled,
            stats.protocol_errors,
            stats.clients_registered
        );
    }

    fn accept_connections(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((mut stream, _)) => {
                    let token = Token(self.next_token);
                    self.next_token += 1;

                    if let Err(e) = self
                        .poll
                        .registry()
                        .register(&mut stream, token, Interest::READABLE)
                    {
                        log::error!("[IPC] Failed to register connection: {}", e);
                        continue;
                    }
                    self.connections.insert(token, Connection::new(stream));
                    self.stats
                        .connections
                        .store(self.connections.len(), Ordering::Relaxed);
                    log::debug!("[IPC] Accepted connection {:?}", token);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    log::error!("[IPC] accept failed: {}", e);
                    return;
                }
            }
        }
    }

    fn handle_connection_event(&mut self, token: Token, event: &Event) {
        let Some(conn) = self.connections.get_mut(&token) else {
            return;
        };
        let mut close = event.is_error();

        if (event.is_readable() || event.is_read_closed()) && !close {
            match conn.read_available() {
                Ok(ReadOutcome::Open) => {}
                Ok(ReadOutcome::Closed) => close = true,
                Err(e) => {
                    log::debug!("[IPC] Read error on {:?}: {}", token, e);
                    close = true;
                }
            }

            while let Some(frame) = conn.next_frame() {
                let (request_id, reply) = match frame {
                    Frame::Request {
                        request_id,
                        command,
                        payload,
                    } => (
                        request_id,
                        handle_request(&mut self.table, command, &payload, unix_millis()),
                    ),
                    Frame::Rejected { request_id, status } => {
                        self.stats.protocol_errors.fetch_add(1, Ordering::Relaxed);
                        log::warn!("[IPC] Rejected header on {:?}: {}", token, status);
                        (request_id, Reply::error(status))
                    }
                };
                self.stats.messages_handled.fetch_add(1, Ordering::Relaxed);
                if reply.is_error() {
                    self.stats.error_replies.fetch_add(1, Ordering::Relaxed);
                }

                if !close {
                    if let Err(e) = conn.queue(&reply.encode(request_id)) {
                        log::warn!("[IPC] Dropping connection {:?}: {}", token, e);
                        close = true;
                    }
                }
            }
            self.stats
                .clients_registered
                .store(self.table.len(), Ordering::Relaxed);
        }

        if !close {
            if let Err(e) = conn.flush() {
                log::debug!("[IPC] Write error on {:?}: {}", token, e);
                close = true;
            }
        }

        if !close {
            let wants_write = conn.has_pending_output();
            if wants_write != conn.write_interest {
                let interest = if wants_write {
                    Interest::READABLE | Interest::WRITABLE
                } else {
                    Interest::READABLE
                };
                match self
                    .poll
                    .registry()
                    .reregister(&mut conn.stream, token, interest)
                {
                    Ok(()) => conn.write_interest = wants_write,
                    Err(e) => {
                        log::error!("[IPC] Failed to reregister {:?}: {}", token, e);
                        close = true;
                    }
                }
            }
        }

        if close {
            self.close_connection(token);
        }
    }

    fn close_connection(&mut self, token: Token) {
        if let Some(mut conn) = self.connections.remove(&token) {
            let _ = self.poll.registry().deregister(&mut conn.stream);
            log::debug!("[IPC] Closed connection {:?}", token);
        }
        self.stats
            .connections
            .store(self.connections.len(), Ordering::Relaxed);
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                log::warn!("[IPC] Failed to remove socket {:?}: {}", self.path, e);
            }
        }
    }
}

/// Handle to a running server; stopping joins the loop thread
pub struct ServerHandle {
    stop: Arc<AtomicBool>,
    waker: Arc<Waker>,
    stats: Arc<StatsCounters>,
    path: PathBuf,
    thread: Option<JoinHandle<()>>,
}

impl ServerHandle {
    pub fn socket_path(&self) -> &Path {
        &self.path
    }

    pub fn stats(&self) -> ServerStats {
        self.stats.snapshot()
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop the loop, close every connection and remove the socket file
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        self.stop.store(true, Ordering::Release);
        if let Err(e) = self.waker.wake() {
            log::warn!("[IPC] Failed to wake server loop: {}", e);
        }
        if thread.join().is_err() {
            log::error!("[IPC] Server thread panicked");
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{
        encode_message, Command, MessageHeader, Request, Status, StatusPayload, HEADER_SIZE,
    };
    use std::io::{Read, Write};
    use std::os::unix::net::UnixStream;

    fn test_config(dir: &tempfile::TempDir) -> IpcConfig {
        IpcConfig::default()
            .with_socket_path(dir.path().join("vroute.sock"))
            .with_poll_timeout_ms(20)
    }

    fn raw_connect(handle: &ServerHandle) -> UnixStream {
        let stream = UnixStream::connect(handle.socket_path()).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        stream
    }

    fn read_reply(stream: &mut UnixStream) -> (MessageHeader, Vec<u8>) {
        let mut header = [0u8; HEADER_SIZE];
        stream.read_exact(&mut header).unwrap();
        let header = MessageHeader::parse(&header).unwrap();
        let mut payload = vec![0u8; header.payload_len as usize];
        stream.read_exact(&mut payload).unwrap();
        (header, payload)
    }

    #[test]
    fn test_invalid_header_keeps_connection_open() {
        let dir = tempfile::tempdir().unwrap();
        let handle = IpcServer::start(&test_config(&dir)).unwrap();
        let mut stream = raw_connect(&handle);

        let mut bad = MessageHeader::new(Command::Ping, 0, 77);
        bad.magic = 0x1234_5678;
        stream.write_all(bad.as_bytes()).unwrap();

        let (header, payload) = read_reply(&mut stream);
        assert_eq!(header.command, Command::Error as u16);
        assert_eq!(header.request_id, 77);
        assert_eq!(
            StatusPayload::decode(&payload).unwrap().status(),
            Status::InvalidHeader
        );

        stream
            .write_all(&encode_message(Command::Ping, 78, &[]))
            .unwrap();
        let (header, payload) = read_reply(&mut stream);
        assert_eq!(header.command, Command::Response as u16);
        assert_eq!(header.request_id, 78);
        assert!(payload.is_empty());

        let stats = handle.stats();
        assert_eq!(stats.protocol_errors, 1);
        assert_eq!(stats.error_replies, 1);
        assert_eq!(stats.messages_handled, 2);
        handle.stop();
    }

    #[test]
    fn test_register_over_socket() {
        let dir = tempfile::tempdir().unwrap();
        let handle = IpcServer::start(&test_config(&dir)).unwrap();
        let mut stream = raw_connect(&handle);

        let request = Request::Register {
            pid: 100,
            volume: 0.8,
            muted: false,
            name: "App".to_string(),
        };
        stream
            .write_all(&encode_message(Command::Register, 1, &request.encode_payload()))
            .unwrap();
        let (header, payload) = read_reply(&mut stream);
        assert_eq!(header.command, Command::Response as u16);
        assert_eq!(StatusPayload::decode(&payload).unwrap().volume, 0.8);
        assert_eq!(handle.stats().clients_registered, 1);

        // Table entries survive the connection
        drop(stream);
        let mut stream = raw_connect(&handle);
        let request = Request::GetVolume { pid: 100 };
        stream
            .write_all(&encode_message(Command::GetVolume, 2, &request.encode_payload()))
            .unwrap();
        let (header, _) = read_reply(&mut stream);
        assert_eq!(header.command, Command::Response as u16);
    }

    #[test]
    fn test_stale_socket_replaced_and_removed_on_stop() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir);
        let path = config.socket_path();
        drop(std::os::unix::net::UnixListener::bind(&path).unwrap());
        assert!(path.exists());

        let handle = IpcServer::start(&config).unwrap();
        assert!(handle.is_running());
        assert!(path.exists());

        handle.stop();
        assert!(!path.exists());
    }

    #[test]
    fn test_regular_file_at_socket_path_survives() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir);
        let path = config.socket_path();
        std::fs::write(&path, b"user data").unwrap();

        match IpcServer::bind(&config) {
            Err(IpcError::Bind { source, .. }) => {
                assert_eq!(source.kind(), io::ErrorKind::AlreadyExists)
            }
            other => panic!("expected bind error, got {:?}", other.map(|_| ())),
        }
        assert_eq!(std::fs::read(&path).unwrap(), b"user data");
    }

    #[test]
    fn test_second_server_refuses_live_socket() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir);
        let _handle = IpcServer::start(&config).unwrap();

        assert!(matches!(
            IpcServer::bind(&config),
            Err(IpcError::Bind { .. })
        ));
    }
}
