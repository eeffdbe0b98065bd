//! Wire protocol shared by the server and client
//!
//! Every message is a fixed 16-byte [`MessageHeader`] followed by `payload_len`
//! payload bytes. All integers are host byte order; the socket never leaves the
//! machine. Payload layouts are `#[repr(C)]` Pod structs with explicit padding so
//! they can be cast to and from bytes without a hand-written codec.
//!
//! ```text
//! header   magic:u32 version:u16 command:u16 payload_len:u32 request_id:u32
//! Register pid:u32 volume:f32 muted:u8 pad[3] name... NUL
//! Response status:u32 volume:f32 muted:u8 pad[3]
//! List     { pid:u32 volume:f32 muted:u8 pad[7] connected_at:u64 name[256] }*
//! ```

use std::mem::size_of;

use bytemuck::{Pod, Zeroable};

/// "VRTE" as a little-endian u32
pub const MAGIC: u32 = 0x4554_5256;

/// Protocol version; bumped on any layout change
pub const VERSION: u16 = 1;

/// Size of [`MessageHeader`] on the wire
pub const HEADER_SIZE: usize = size_of::<MessageHeader>();

/// Largest payload a receiver will accept
pub const MAX_PAYLOAD_SIZE: u32 = 64 * 1024;

/// Longest display name in bytes (the record field adds a NUL)
pub const MAX_NAME_LEN: usize = 255;

/// Size of the fixed name field in a [`ClientRecord`]
pub const NAME_FIELD_LEN: usize = MAX_NAME_LEN + 1;

/// Most records a `ListClients` response can carry
pub const MAX_LIST_RECORDS: usize = MAX_PAYLOAD_SIZE as usize / size_of::<ClientRecord>();

/// Message command codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Command {
    Register = 1,
    Unregister = 2,
    GetVolume = 3,
    SetVolume = 4,
    GetMute = 5,
    SetMute = 6,
    ListClients = 7,
    Ping = 8,
    Response = 0x80,
    Error = 0x81,
}

impl Command {
    pub fn from_u16(value: u16) -> Option<Self> {
        Some(match value {
            1 => Command::Register,
            2 => Command::Unregister,
            3 => Command::GetVolume,
            4 => Command::SetVolume,
            5 => Command::GetMute,
            6 => Command::SetMute,
            7 => Command::ListClients,
            8 => Command::Ping,
            0x80 => Command::Response,
            0x81 => Command::Error,
            _ => return None,
        })
    }

    /// Sent by clients (everything except `Response` and `Error`)
    pub fn is_request(self) -> bool {
        !matches!(self, Command::Response | Command::Error)
    }
}

/// Status codes carried in responses and error messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Status {
    Ok = 0,
    InvalidHeader = 1,
    UnknownCommand = 2,
    PayloadTooLarge = 3,
    ClientNotFound = 4,
    InvalidVolume = 5,
    ServiceUnavailable = 6,
    InternalError = 7,
}

impl Status {
    /// Decode a wire value; unknown codes read as `InternalError`
    pub fn from_u32(value: u32) -> Self {
        match value {
            0 => Status::Ok,
            1 => Status::InvalidHeader,
            2 => Status::UnknownCommand,
            3 => Status::PayloadTooLarge,
            4 => Status::ClientNotFound,
            5 => Status::InvalidVolume,
            6 => Status::ServiceUnavailable,
            _ => Status::InternalError,
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Status::Ok => "ok",
            Status::InvalidHeader => "invalid header",
            Status::UnknownCommand => "unknown command",
            Status::PayloadTooLarge => "payload too large",
            Status::ClientNotFound => "client not found",
            Status::InvalidVolume => "invalid volume",
            Status::ServiceUnavailable => "service unavailable",
            Status::InternalError => "internal error",
        };
        f.write_str(text)
    }
}

/// Fixed 16-byte message header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct MessageHeader {
    pub magic: u32,
    pub version: u16,
    pub command: u16,
    pub payload_len: u32,
    pub request_id: u32,
}

impl MessageHeader {
    pub fn new(command: Command, payload_len: u32, request_id: u32) -> Self {
        Self {
            magic: MAGIC,
            version: VERSION,
            command: command as u16,
            payload_len,
            request_id,
        }
    }

    /// Read a header from the first [`HEADER_SIZE`] bytes of `bytes`
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        bytes
            .get(..HEADER_SIZE)
            .map(bytemuck::pod_read_unaligned::<MessageHeader>)
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }
}

/// Gate every header passes before its payload is touched
///
/// Checks magic, version, payload length and command, in that order.
pub fn validate_header(header: &MessageHeader) -> Result<Command, Status> {
    if header.magic != MAGIC || header.version != VERSION {
        return Err(Status::InvalidHeader);
    }
    if header.payload_len > MAX_PAYLOAD_SIZE {
        return Err(Status::PayloadTooLarge);
    }
    Command::from_u16(header.command).ok_or(Status::UnknownCommand)
}

/// Header followed by payload, as one buffer
pub fn encode_message(command: Command, request_id: u32, payload: &[u8]) -> Vec<u8> {
    let header = MessageHeader::new(command, payload.len() as u32, request_id);
    let mut out = Vec::with_capacity(HEADER_SIZE + payload.len());
    out.extend_from_slice(header.as_bytes());
    out.extend_from_slice(payload);
    out
}

/// Fixed part of a `Register` payload; the NUL-terminated name follows
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct RegisterPayload {
    pub pid: u32,
    pub volume: f32,
    pub muted: u8,
    pub _pad: [u8; 3],
}

/// `Unregister`, `GetVolume` and `GetMute` payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct PidPayload {
    pub pid: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct SetVolumePayload {
    pub pid: u32,
    pub volume: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct SetMutePayload {
    pub pid: u32,
    pub muted: u8,
    pub _pad: [u8; 3],
}

/// Payload of every non-list `Response` and of `Error` messages
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct StatusPayload {
    pub status: u32,
    pub volume: f32,
    pub muted: u8,
    pub _pad: [u8; 3],
}

impl StatusPayload {
    pub fn new(status: Status, volume: f32, muted: bool) -> Self {
        Self {
            status: status as u32,
            volume,
            muted: muted as u8,
            _pad: [0; 3],
        }
    }

    pub fn error(status: Status) -> Self {
        Self::new(status, 0.0, false)
    }

    pub fn status(&self) -> Status {
        Status::from_u32(self.status)
    }

    pub fn decode(payload: &[u8]) -> Result<Self, Status> {
        read_pod(payload)
    }
}

/// One entry of a `ListClients` response (280 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct ClientRecord {
    pub pid: u32,
    pub volume: f32,
    pub muted: u8,
    pub _pad: [u8; 7],
    /// Registration time, milliseconds since the Unix epoch
    pub connected_at: u64,
    /// NUL-terminated UTF-8
    pub name: [u8; NAME_FIELD_LEN],
}

impl ClientRecord {
    pub fn new(info: &ClientInfo) -> Self {
        let mut record = Self::zeroed();
        record.pid = info.pid;
        record.volume = info.volume;
        record.muted = info.muted as u8;
        record.connected_at = info.connected_at;
        let name = truncate_name(&info.name).as_bytes();
        record.name[..name.len()].copy_from_slice(name);
        record
    }
}

/// Decoded client table entry
#[derive(Debug, Clone, PartialEq)]
pub struct ClientInfo {
    pub pid: u32,
    pub volume: f32,
    pub muted: bool,
    /// Registration time, milliseconds since the Unix epoch
    pub connected_at: u64,
    pub name: String,
}

impl From<&ClientRecord> for ClientInfo {
    fn from(record: &ClientRecord) -> Self {
        Self {
            pid: record.pid,
            volume: record.volume,
            muted: record.muted != 0,
            connected_at: record.connected_at,
            name: decode_name(&record.name),
        }
    }
}

/// Serialize a table listing; anything past [`MAX_LIST_RECORDS`] is dropped
pub fn encode_client_records(clients: &[ClientInfo]) -> Vec<u8> {
    let records: Vec<ClientRecord> = clients
        .iter()
        .take(MAX_LIST_RECORDS)
        .map(ClientRecord::new)
        .collect();
    bytemuck::cast_slice(&records).to_vec()
}

pub fn decode_client_records(payload: &[u8]) -> Result<Vec<ClientInfo>, Status> {
    let record_len = size_of::<ClientRecord>();
    if payload.len() % record_len != 0 {
        return Err(Status::InvalidHeader);
    }
    Ok(payload
        .chunks_exact(record_len)
        .map(|chunk| ClientInfo::from(&bytemuck::pod_read_unaligned::<ClientRecord>(chunk)))
        .collect())
}

/// Cut a display name to at most [`MAX_NAME_LEN`] bytes
///
/// Stops at an embedded NUL and never splits a UTF-8 sequence.
pub fn truncate_name(name: &str) -> &str {
    let name = name.split('\0').next().unwrap_or_default();
    if name.len() <= MAX_NAME_LEN {
        return name;
    }
    let mut end = MAX_NAME_LEN;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}

/// Read a NUL-terminated (or unterminated) name field
pub fn decode_name(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    let name = String::from_utf8_lossy(&bytes[..end]);
    truncate_name(&name).to_string()
}

fn read_pod<T: Pod>(payload: &[u8]) -> Result<T, Status> {
    if payload.len() != size_of::<T>() {
        return Err(Status::InvalidHeader);
    }
    Ok(bytemuck::pod_read_unaligned(payload))
}

/// Volumes outside [0.0, 1.0] (and NaN) are rejected, never clamped
pub fn validate_volume(volume: f32) -> Result<f32, Status> {
    if (0.0..=1.0).contains(&volume) {
        Ok(volume)
    } else {
        Err(Status::InvalidVolume)
    }
}

/// A decoded client request
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Register {
        pid: u32,
        volume: f32,
        muted: bool,
        name: String,
    },
    Unregister { pid: u32 },
    GetVolume { pid: u32 },
    SetVolume { pid: u32, volume: f32 },
    GetMute { pid: u32 },
    SetMute { pid: u32, muted: bool },
    ListClients,
    Ping,
}

impl Request {
    pub fn command(&self) -> Command {
        match self {
            Request::Register { .. } => Command::Register,
            Request::Unregister { .. } => Command::Unregister,
            Request::GetVolume { .. } => Command::GetVolume,
            Request::SetVolume { .. } => Command::SetVolume,
            Request::GetMute { .. } => Command::GetMute,
            Request::SetMute { .. } => Command::SetMute,
            Request::ListClients => Command::ListClients,
            Request::Ping => Command::Ping,
        }
    }

    pub fn encode_payload(&self) -> Vec<u8> {
        match self {
            Request::Register {
                pid,
                volume,
                muted,
                name,
            } => {
                let fixed = RegisterPayload {
                    pid: *pid,
                    volume: *volume,
                    muted: *muted as u8,
                    _pad: [0; 3],
                };
                let name = truncate_name(name).as_bytes();
                let mut out = Vec::with_capacity(size_of::<RegisterPayload>() + name.len() + 1);
                out.extend_from_slice(bytemuck::bytes_of(&fixed));
                out.extend_from_slice(name);
                out.push(0);
                out
            }
            Request::Unregister { pid } | Request::GetVolume { pid } | Request::GetMute { pid } => {
                bytemuck::bytes_of(&PidPayload { pid: *pid }).to_vec()
            }
            Request::SetVolume { pid, volume } => bytemuck::bytes_of(&SetVolumePayload {
                pid: *pid,
                volume: *volume,
            })
            .to_vec(),
            Request::SetMute { pid, muted } => bytemuck::bytes_of(&SetMutePayload {
                pid: *pid,
                muted: *muted as u8,
                _pad: [0; 3],
            })
            .to_vec(),
            Request::ListClients | Request::Ping => Vec::new(),
        }
    }

    /// Decode a validated request
    ///
    /// A payload whose size does not fit the command's layout is reported as
    /// `InvalidHeader`, since its `payload_len` was wrong.
    pub fn decode(command: Command, payload: &[u8]) -> Result<Self, Status> {
        match command {
            Command::Register => {
                let fixed_len = size_of::<RegisterPayload>();
                if payload.len() < fixed_len {
                    return Err(Status::InvalidHeader);
                }
                let fixed: RegisterPayload = bytemuck::pod_read_unaligned(&payload[..fixed_len]);
                Ok(Request::Register {
                    pid: fixed.pid,
                    volume: fixed.volume,
                    muted: fixed.muted != 0,
                    name: decode_name(&payload[fixed_len..]),
                })
            }
            Command::Unregister => read_pod::<PidPayload>(payload).map(|p| Request::Unregister { pid: p.pid }),
            Command::GetVolume => read_pod::<PidPayload>(payload).map(|p| Request::GetVolume { pid: p.pid }),
            Command::GetMute => read_pod::<PidPayload>(payload).map(|p| Request::GetMute { pid: p.pid }),
            Command::SetVolume => read_pod::<SetVolumePayload>(payload).map(|p| Request::SetVolume {
                pid: p.pid,
                volume: p.volume,
            }),
            Command::SetMute => read_pod::<SetMutePayload>(payload).map(|p| Request::SetMute {
                pid: p.pid,
                muted: p.muted != 0,
            }),
            Command::ListClients => Ok(Request::ListClients),
            Command::Ping => Ok(Request::Ping),
            Command::Response | Command::Error => Err(Status::UnknownCommand),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_header() -> MessageHeader {
        MessageHeader::new(Command::Ping, 0, 7)
    }

    #[test]
    fn test_wire_layout_sizes() {
        assert_eq!(HEADER_SIZE, 16);
        assert_eq!(size_of::<RegisterPayload>(), 12);
        assert_eq!(size_of::<SetMutePayload>(), 8);
        assert_eq!(size_of::<StatusPayload>(), 12);
        assert_eq!(size_of::<ClientRecord>(), 280);
        assert_eq!(MAX_LIST_RECORDS, 234);
    }

    #[test]
    fn test_validate_header_accepts_valid() {
        assert_eq!(validate_header(&valid_header()), Ok(Command::Ping));

        let mut header = valid_header();
        header.payload_len = MAX_PAYLOAD_SIZE;
        header.command = Command::Register as u16;
        assert_eq!(validate_header(&header), Ok(Command::Register));
    }

    #[test]
    fn test_validate_header_rejects_bad_magic_and_version() {
        let mut header = valid_header();
        header.magic = 0xDEAD_BEEF;
        assert_eq!(validate_header(&header), Err(Status::InvalidHeader));

        let mut header = valid_header();
        header.version = VERSION + 1;
        assert_eq!(validate_header(&header), Err(Status::InvalidHeader));
    }

    #[test]
    fn test_validate_header_rejects_oversized_payload() {
        let mut header = valid_header();
        header.payload_len = MAX_PAYLOAD_SIZE + 1;
        assert_eq!(validate_header(&header), Err(Status::PayloadTooLarge));
    }

    #[test]
    fn test_validate_header_rejects_unknown_command() {
        for command in [0u16, 9, 0x7F, 0x82, u16::MAX] {
            let mut header = valid_header();
            header.command = command;
            assert_eq!(validate_header(&header), Err(Status::UnknownCommand));
        }
    }

    #[test]
    fn test_header_parse_needs_full_header() {
        let bytes = encode_message(Command::Ping, 42, &[]);
        assert_eq!(MessageHeader::parse(&bytes), Some(MessageHeader::new(Command::Ping, 0, 42)));
        assert_eq!(MessageHeader::parse(&bytes[..HEADER_SIZE - 1]), None);
    }

    #[test]
    fn test_truncate_name_respects_utf8_boundary() {
        assert_eq!(truncate_name("Music"), "Music");

        // 127 two-byte chars = 254 bytes, then a 3-byte char straddles 255
        let name = format!("{}€tail", "é".repeat(127));
        let truncated = truncate_name(&name);
        assert_eq!(truncated.len(), 254);
        assert!(truncated.chars().all(|c| c == 'é'));

        let ascii = "a".repeat(400);
        assert_eq!(truncate_name(&ascii).len(), MAX_NAME_LEN);
        assert_eq!(truncate_name("abc\0def"), "abc");
    }

    #[test]
    fn test_register_payload_layout() {
        let request = Request::Register {
            pid: 100,
            volume: 0.8,
            muted: false,
            name: "App".to_string(),
        };
        let payload = request.encode_payload();
        assert_eq!(payload.len(), 12 + 3 + 1);
        assert_eq!(payload.last(), Some(&0));
        assert_eq!(Request::decode(Command::Register, &payload), Ok(request));
    }

    #[test]
    fn test_register_without_terminator_still_decodes() {
        let mut payload = Request::Register {
            pid: 1,
            volume: 1.0,
            muted: true,
            name: "x".to_string(),
        }
        .encode_payload();
        payload.pop();
        let decoded = Request::decode(Command::Register, &payload).unwrap();
        assert!(matches!(decoded, Request::Register { ref name, muted: true, .. } if name == "x"));
    }

    #[test]
    fn test_payload_size_mismatch_is_rejected() {
        assert_eq!(
            Request::decode(Command::GetVolume, &[1, 2, 3]),
            Err(Status::InvalidHeader)
        );
        assert_eq!(
            Request::decode(Command::Register, &[0; 4]),
            Err(Status::InvalidHeader)
        );
        assert_eq!(
            Request::decode(Command::Response, &[]),
            Err(Status::UnknownCommand)
        );
    }

    #[test]
    fn test_client_records_carry_long_names() {
        let clients = vec![ClientInfo {
            pid: 9,
            volume: 0.5,
            muted: true,
            connected_at: 1_700_000_000_000,
            name: "n".repeat(300),
        }];
        let payload = encode_client_records(&clients);
        assert_eq!(payload.len(), 280);

        let decoded = decode_client_records(&payload).unwrap();
        assert_eq!(decoded[0].name.len(), MAX_NAME_LEN);
        assert_eq!(decoded[0].connected_at, 1_700_000_000_000);
        assert!(decode_client_records(&payload[..279]).is_err());
    }

    #[test]
    fn test_volume_validation() {
        assert_eq!(validate_volume(0.0), Ok(0.0));
        assert_eq!(validate_volume(1.0), Ok(1.0));
        assert_eq!(validate_volume(1.5), Err(Status::InvalidVolume));
        assert_eq!(validate_volume(-0.1), Err(Status::InvalidVolume));
        assert_eq!(validate_volume(f32::NAN), Err(Status::InvalidVolume));
    }
}
