//! Per-connection buffering and framing
//!
//! Reads are drained into `inbound` until the socket would block; complete
//! frames are then cut off the front. A header that fails validation is consumed
//! on its own (the payload it announces is never read as payload), answered with
//! an `Error`, and the connection stays open. A valid header carrying a
//! non-request command is consumed together with its payload.

use std::io::{self, Read, Write};

use mio::net::UnixStream;

use crate::protocol::{validate_header, Command, MessageHeader, Status, HEADER_SIZE};

/// Replies a slow reader may leave unread before it is dropped
const MAX_OUTBOUND: usize = 1024 * 1024;

/// One complete unit cut from the inbound stream
#[derive(Debug, PartialEq)]
pub(crate) enum Frame {
    Request {
        request_id: u32,
        command: Command,
        payload: Vec<u8>,
    },
    Rejected {
        request_id: u32,
        status: Status,
    },
}

/// What a read pass observed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReadOutcome {
    Open,
    Closed,
}

pub(crate) struct Connection {
    pub stream: UnixStream,
    /// Registered for WRITABLE as well as READABLE
    pub write_interest: bool,
    inbound: Vec<u8>,
    outbound: Vec<u8>,
}

impl Connection {
    pub fn new(stream: UnixStream) -> Self {
        Self {
            stream,
            write_interest: false,
            inbound: Vec::new(),
            outbound: Vec::new(),
        }
    }

    /// Drain the socket into the inbound buffer
    pub fn read_available(&mut self) -> io::Result<ReadOutcome> {
        let mut buf = [0u8; 4096];
        loop {
            match self.stream.read(&mut buf) {
                Ok(0) => return Ok(ReadOutcome::Closed),
                Ok(n) => self.inbound.extend_from_slice(&buf[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(ReadOutcome::Open),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Cut the next complete frame off the inbound buffer
    pub fn next_frame(&mut self) -> Option<Frame> {
        next_frame(&mut self.inbound)
    }

    pub fn queue(&mut self, bytes: &[u8]) -> io::Result<()> {
        if self.outbound.len() + bytes.len() > MAX_OUTBOUND {
            return Err(io::Error::new(
                io::ErrorKind::OutOfMemory,
                "peer is not reading replies",
            ));
        }
        self.outbound.extend_from_slice(bytes);
        Ok(())
    }

    pub fn has_pending_output(&self) -> bool {
        !self.outbound.is_empty()
    }

    /// Write as much queued output as the socket takes
    pub fn flush(&mut self) -> io::Result<()> {
        while !self.outbound.is_empty() {
            match self.stream.write(&self.outbound) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero)),
                Ok(n) => {
                    self.outbound.drain(..n);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

fn next_frame(inbound: &mut Vec<u8>) -> Option<Frame> {
    let header = MessageHeader::parse(inbound)?;

    let command = match validate_header(&header) {
        Ok(command) => command,
        Err(status) => {
            inbound.drain(..HEADER_SIZE);
            return Some(Frame::Rejected {
                request_id: header.request_id,
                status,
            });
        }
    };

    // A valid header's length is trusted, so the whole frame goes even when
    // the command is rejected
    let total = HEADER_SIZE + header.payload_len as usize;
    if inbound.len() < total {
        return None;
    }
    if !command.is_request() {
        inbound.drain(..total);
        return Some(Frame::Rejected {
            request_id: header.request_id,
            status: Status::UnknownCommand,
        });
    }
    let payload = inbound[HEADER_SIZE..total].to_vec();
    inbound.drain(..total);

    Some(Frame::Request {
        request_id: header.request_id,
        command,
        payload,
    })
}
