//! Authoritative pid → volume/mute table
//!
//! Owned by the event loop thread only. Entries outlive connections: a client
//! that dies without unregistering leaves a stale entry until its pid registers
//! again.

use std::collections::HashMap;

use crate::error::{IpcError, IpcResult};
use crate::protocol::{truncate_name, validate_volume, ClientInfo, Status};

/// One registered process
#[derive(Debug, Clone, PartialEq)]
pub struct ClientEntry {
    pub pid: u32,
    pub volume: f32,
    pub muted: bool,
    /// Milliseconds since the Unix epoch
    pub registered_at: u64,
    pub name: String,
}

impl ClientEntry {
    pub fn info(&self) -> ClientInfo {
        ClientInfo {
            pid: self.pid,
            volume: self.volume,
            muted: self.muted,
            connected_at: self.registered_at,
            name: self.name.clone(),
        }
    }
}

/// Client table with a fixed entry limit
#[derive(Debug)]
pub struct ClientTable {
    entries: HashMap<u32, ClientEntry>,
    max_clients: usize,
}

impl ClientTable {
    pub fn new(max_clients: usize) -> Self {
        Self {
            entries: HashMap::new(),
            max_clients,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert or replace the entry for `pid`
    ///
    /// Replacing never counts against the limit. Returns `true` when an existing
    /// entry was replaced.
    pub fn register(
        &mut self,
        pid: u32,
        volume: f32,
        muted: bool,
        name: &str,
        now_ms: u64,
    ) -> IpcResult<bool> {
        let volume = validate_volume(volume).map_err(IpcError::Rejected)?;

        let replaced = self.entries.contains_key(&pid);
        if !replaced && self.entries.len() >= self.max_clients {
            return Err(IpcError::TableFull(self.max_clients));
        }

        self.entries.insert(
            pid,
            ClientEntry {
                pid,
                volume,
                muted,
                registered_at: now_ms,
                name: truncate_name(name).to_string(),
            },
        );
        Ok(replaced)
    }

    pub fn unregister(&mut self, pid: u32) -> Option<ClientEntry> {
        self.entries.remove(&pid)
    }

    pub fn get(&self, pid: u32) -> Option<&ClientEntry> {
        self.entries.get(&pid)
    }

    /// Update the volume; out-of-range values leave the entry unchanged
    pub fn set_volume(&mut self, pid: u32, volume: f32) -> Result<&ClientEntry, Status> {
        let volume = validate_volume(volume)?;
        let entry = self.entries.get_mut(&pid).ok_or(Status::ClientNotFound)?;
        entry.volume = volume;
        Ok(entry)
    }

    pub fn set_mute(&mut self, pid: u32, muted: bool) -> Result<&ClientEntry, Status> {
        let entry = self.entries.get_mut(&pid).ok_or(Status::ClientNotFound)?;
        entry.muted = muted;
        Ok(entry)
    }

    /// All entries ordered by pid
    pub fn list(&self) -> Vec<ClientInfo> {
        let mut clients: Vec<ClientInfo> = self.entries.values().map(ClientEntry::info).collect();
        clients.sort_by_key(|c| c.pid);
        clients
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_replaces_stale_entry() {
        let mut table = ClientTable::new(4);
        assert!(!table.register(100, 0.8, false, "App", 1).unwrap());
        assert!(table.register(100, 0.3, true, "App (restarted)", 2).unwrap());

        let entry = table.get(100).unwrap();
        assert_eq!(entry.volume, 0.3);
        assert!(entry.muted);
        assert_eq!(entry.registered_at, 2);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_table_full_is_typed() {
        let mut table = ClientTable::new(2);
        table.register(1, 1.0, false, "a", 0).unwrap();
        table.register(2, 1.0, false, "b", 0).unwrap();

        assert!(matches!(
            table.register(3, 1.0, false, "c", 0),
            Err(IpcError::TableFull(2))
        ));
        // Existing pids can still re-register
        assert!(table.register(2, 0.5, false, "b", 1).is_ok());
    }

    #[test]
    fn test_invalid_volume_leaves_state_unchanged() {
        let mut table = ClientTable::new(4);
        table.register(100, 0.8, false, "App", 0).unwrap();

        assert_eq!(table.set_volume(100, 1.5), Err(Status::InvalidVolume));
        assert_eq!(table.get(100).unwrap().volume, 0.8);

        assert!(matches!(
            table.register(101, -0.5, false, "Bad", 0),
            Err(IpcError::Rejected(Status::InvalidVolume))
        ));
        assert!(table.get(101).is_none());
    }

    #[test]
    fn test_unknown_pid_is_not_found() {
        let mut table = ClientTable::new(4);
        assert_eq!(table.set_mute(7, true), Err(Status::ClientNotFound));
        assert_eq!(table.set_volume(7, 0.5), Err(Status::ClientNotFound));
        assert!(table.unregister(7).is_none());
    }

    #[test]
    fn test_list_is_sorted_and_names_bounded() {
        let mut table = ClientTable::new(4);
        table.register(30, 1.0, false, &"z".repeat(400), 0).unwrap();
        table.register(10, 0.5, true, "first", 0).unwrap();

        let list = table.list();
        assert_eq!(list.iter().map(|c| c.pid).collect::<Vec<_>>(), vec![10, 30]);
        assert_eq!(list[1].name.len(), 255);
    }
}
