//! Request dispatch against the client table

use crate::error::IpcError;
use crate::protocol::{
    encode_client_records, encode_message, Command, Request, Status, StatusPayload,
};

use super::table::{ClientEntry, ClientTable};

/// Outgoing message body for one request
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Reply {
    pub command: Command,
    pub payload: Vec<u8>,
}

impl Reply {
    fn entry(entry: &ClientEntry) -> Self {
        Self {
            command: Command::Response,
            payload: bytemuck::bytes_of(&StatusPayload::new(Status::Ok, entry.volume, entry.muted))
                .to_vec(),
        }
    }

    pub fn error(status: Status) -> Self {
        Self {
            command: Command::Error,
            payload: bytemuck::bytes_of(&StatusPayload::error(status)).to_vec(),
        }
    }

    fn from_result(result: Result<&ClientEntry, Status>) -> Self {
        match result {
            Ok(entry) => Self::entry(entry),
            Err(status) => Self::error(status),
        }
    }

    pub fn is_error(&self) -> bool {
        self.command == Command::Error
    }

    /// Frame the reply for `request_id`
    pub fn encode(&self, request_id: u32) -> Vec<u8> {
        encode_message(self.command, request_id, &self.payload)
    }
}

/// Decode and execute one validated request
pub(crate) fn handle_request(
    table: &mut ClientTable,
    command: Command,
    payload: &[u8],
    now_ms: u64,
) -> Reply {
    match Request::decode(command, payload) {
        Ok(request) => dispatch(table, request, now_ms),
        Err(status) => {
            log::debug!("[IPC] Malformed {:?} payload ({} bytes)", command, payload.len());
            Reply::error(status)
        }
    }
}

pub(crate) fn dispatch(table: &mut ClientTable, request: Request, now_ms: u64) -> Reply {
    match request {
        Request::Register {
            pid,
            volume,
            muted,
            name,
        } => match table.register(pid, volume, muted, &name, now_ms) {
            Ok(replaced) => {
                if replaced {
                    log::info!("[IPC] Re-registered pid {} ({})", pid, name);
                } else {
                    log::info!("[IPC] Registered pid {} ({})", pid, name);
                }
                Reply::from_result(table.get(pid).ok_or(Status::InternalError))
            }
            Err(e @ IpcError::TableFull(_)) => {
                log::warn!("[IPC] Rejecting pid {}: {}", pid, e);
                Reply::error(e.status())
            }
            Err(e) => Reply::error(e.status()),
        },

        Request::Unregister { pid } => match table.unregister(pid) {
            Some(entry) => {
                log::info!("[IPC] Unregistered pid {} ({})", pid, entry.name);
                Reply::entry(&entry)
            }
            None => Reply::error(Status::ClientNotFound),
        },

        Request::GetVolume { pid } | Request::GetMute { pid } => {
            Reply::from_result(table.get(pid).ok_or(Status::ClientNotFound))
        }

        Request::SetVolume { pid, volume } => Reply::from_result(table.set_volume(pid, volume)),

        Request::SetMute { pid, muted } => Reply::from_result(table.set_mute(pid, muted)),

        Request::ListClients => Reply {
            command: Command::Response,
            payload: encode_client_records(&table.list()),
        },

        Request::Ping => Reply {
            command: Command::Response,
            payload: Vec::new(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::decode_client_records;

    fn status_of(reply: &Reply) -> (Status, f32, bool) {
        let payload = StatusPayload::decode(&reply.payload).unwrap();
        (payload.status(), payload.volume, payload.muted != 0)
    }

    fn register(table: &mut ClientTable, pid: u32, volume: f32, name: &str) -> Reply {
        dispatch(
            table,
            Request::Register {
                pid,
                volume,
                muted: false,
                name: name.to_string(),
            },
            1_000,
        )
    }

    #[test]
    fn test_registration_lifecycle() {
        let mut table = ClientTable::new(64);

        let reply = register(&mut table, 100, 0.8, "App");
        assert_eq!(reply.command, Command::Response);

        let reply = dispatch(&mut table, Request::GetVolume { pid: 100 }, 0);
        assert_eq!(status_of(&reply), (Status::Ok, 0.8, false));

        let reply = dispatch(&mut table, Request::SetVolume { pid: 100, volume: 1.5 }, 0);
        assert!(reply.is_error());
        assert_eq!(status_of(&reply).0, Status::InvalidVolume);
        let reply = dispatch(&mut table, Request::GetVolume { pid: 100 }, 0);
        assert_eq!(status_of(&reply), (Status::Ok, 0.8, false));

        let reply = dispatch(&mut table, Request::Unregister { pid: 100 }, 0);
        assert_eq!(reply.command, Command::Response);

        let reply = dispatch(&mut table, Request::GetVolume { pid: 100 }, 0);
        assert!(reply.is_error());
        assert_eq!(status_of(&reply).0, Status::ClientNotFound);
    }

    #[test]
    fn test_set_mute_and_get_mute() {
        let mut table = ClientTable::new(64);
        register(&mut table, 5, 0.4, "Player");

        let reply = dispatch(&mut table, Request::SetMute { pid: 5, muted: true }, 0);
        assert_eq!(status_of(&reply), (Status::Ok, 0.4, true));

        let reply = dispatch(&mut table, Request::GetMute { pid: 5 }, 0);
        assert_eq!(status_of(&reply), (Status::Ok, 0.4, true));
    }

    #[test]
    fn test_full_table_is_service_unavailable() {
        let mut table = ClientTable::new(1);
        register(&mut table, 1, 1.0, "a");

        let reply = register(&mut table, 2, 1.0, "b");
        assert!(reply.is_error());
        assert_eq!(status_of(&reply).0, Status::ServiceUnavailable);
    }

    #[test]
    fn test_list_clients_records() {
        let mut table = ClientTable::new(64);
        register(&mut table, 2, 0.5, "two");
        register(&mut table, 1, 1.0, "one");

        let reply = dispatch(&mut table, Request::ListClients, 0);
        let clients = decode_client_records(&reply.payload).unwrap();
        assert_eq!(clients.len(), 2);
        assert_eq!(clients[0].name, "one");
        assert_eq!(clients[1].volume, 0.5);
        assert_eq!(clients[1].connected_at, 1_000);
    }

    #[test]
    fn test_ping_has_empty_payload() {
        let mut table = ClientTable::new(1);
        let reply = dispatch(&mut table, Request::Ping, 0);
        assert_eq!(reply.command, Command::Response);
        assert!(reply.payload.is_empty());
    }

    #[test]
    fn test_malformed_payload_is_rejected() {
        let mut table = ClientTable::new(1);
        let reply = handle_request(&mut table, Command::SetVolume, &[0; 3], 0);
        assert!(reply.is_error());
        assert_eq!(status_of(&reply).0, Status::InvalidHeader);
    }
}
