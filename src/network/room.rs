//! Room Registry & Host Arbitration
//!
//! The registry is the single owner of all room state, constructed once
//! per process and injected into the relay. All per-connection session
//! state lives in explicit `Client` values keyed by connection id.

use std::collections::HashMap;

use tokio::sync::mpsc;
use tracing::debug;

use crate::game::settings::Settings;
use crate::network::protocol::{RoomInfo, ServerMessage};
use crate::network::rounds::{ConnId, RoundState};

/// One connected client inside a room. Ephemeral: created on join,
/// destroyed on disconnect.
#[derive(Debug)]
pub struct Client {
    /// Connection id, unique for the process lifetime.
    pub id: ConnId,
    /// Display name, announced via `name`.
    pub name: Option<String>,
    /// Readiness for the next round; reset at round boundaries.
    pub ready: bool,
    /// Stable visitor number for this client's persisted token.
    pub visitor: u32,
    /// Join order within the room, used by host arbitration and as the
    /// registration order for unfinished participants.
    pub join_seq: u64,
    /// Outbound channel to this client's socket writer.
    pub sender: mpsc::UnboundedSender<ServerMessage>,
}

/// A named set of connected clients sharing one game session.
#[derive(Debug)]
pub struct Room {
    /// Opaque room key.
    pub key: String,
    /// Connected clients by connection id.
    pub clients: HashMap<ConnId, Client>,
    /// The one privileged client, if any. Invariant: refers to a connected
    /// client whenever the room is non-empty, after arbitration runs.
    pub host_id: Option<ConnId>,
    /// Current settings, host-mutable while the round phase is idle.
    pub settings: Settings,
    /// Last broadcast seed.
    pub seed: u32,
    /// Round lifecycle state.
    pub round: RoundState,
    /// Display name from `roommeta`.
    pub meta_name: Option<String>,
    /// Whether the room appears in the directory.
    pub public: bool,
    /// Monotonic visitor numbering; never reset while the room exists.
    visitor_counter: u32,
    /// Visitor number per externally-supplied client token.
    visitors: HashMap<String, u32>,
    /// Monotonic join sequence source.
    join_counter: u64,
}

impl Room {
    /// Empty room with default settings.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            clients: HashMap::new(),
            host_id: None,
            settings: Settings::default(),
            seed: 0,
            round: RoundState::new(),
            meta_name: None,
            public: false,
            visitor_counter: 0,
            visitors: HashMap::new(),
            join_counter: 0,
        }
    }

    /// Insert a client, assigning its visitor number. A token seen before
    /// keeps its number; anything else gets the next one.
    pub fn insert_client(
        &mut self,
        id: ConnId,
        token: Option<&str>,
        sender: mpsc::UnboundedSender<ServerMessage>,
    ) -> u32 {
        let visitor = match token.and_then(|t| self.visitors.get(t).copied()) {
            Some(v) => v,
            None => {
                self.visitor_counter += 1;
                if let Some(t) = token {
                    self.visitors.insert(t.to_string(), self.visitor_counter);
                }
                self.visitor_counter
            }
        };

        self.join_counter += 1;
        self.clients.insert(
            id.clone(),
            Client {
                id,
                name: None,
                ready: false,
                visitor,
                join_seq: self.join_counter,
                sender,
            },
        );
        visitor
    }

    /// Remove a client; clears the host slot if it was theirs.
    pub fn remove_client(&mut self, id: &str) {
        self.clients.remove(id);
        if self.host_id.as_deref() == Some(id) {
            self.host_id = None;
        }
    }

    /// Ensure the room has a valid host.
    ///
    /// A connected current host is kept; otherwise the earliest-joined
    /// client is promoted. `force` hands the slot to a specific client
    /// (create intent). Returns the new host id when the slot changed.
    pub fn arbitrate_host(&mut self, force: Option<&str>) -> Option<ConnId> {
        if let Some(id) = force {
            if self.clients.contains_key(id) && self.host_id.as_deref() != Some(id) {
                self.host_id = Some(id.to_string());
                return self.host_id.clone();
            }
            return None;
        }

        let host_connected = self
            .host_id
            .as_deref()
            .is_some_and(|h| self.clients.contains_key(h));
        if host_connected {
            return None;
        }

        let next = self
            .clients
            .values()
            .min_by_key(|c| c.join_seq)
            .map(|c| c.id.clone());
        self.host_id = next.clone();
        next
    }

    /// True when this connection holds the host slot.
    pub fn is_host(&self, id: &str) -> bool {
        self.host_id.as_deref() == Some(id)
    }

    /// Connected client count.
    pub fn count(&self) -> usize {
        self.clients.len()
    }

    /// Connection ids of ready clients, in join order.
    pub fn ready_clients(&self) -> Vec<ConnId> {
        let mut ready: Vec<&Client> = self.clients.values().filter(|c| c.ready).collect();
        ready.sort_by_key(|c| c.join_seq);
        ready.into_iter().map(|c| c.id.clone()).collect()
    }

    /// Clear every client's ready flag; the next round needs a fresh
    /// declaration.
    pub fn clear_ready(&mut self) {
        for c in self.clients.values_mut() {
            c.ready = false;
        }
    }

    /// Best-effort fan-out. A send failure to one peer is swallowed and
    /// does not affect delivery to the others.
    pub fn broadcast(&self, msg: &ServerMessage, except: Option<&str>) {
        for client in self.clients.values() {
            if except == Some(client.id.as_str()) {
                continue;
            }
            let _ = client.sender.send(msg.clone());
        }
    }

    /// Send to one client, best-effort.
    pub fn send_to(&self, id: &str, msg: ServerMessage) {
        if let Some(client) = self.clients.get(id) {
            let _ = client.sender.send(msg);
        }
    }
}

/// Owner of every active room plus the connection -> room index.
#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: HashMap<String, Room>,
    members: HashMap<ConnId, String>,
}

impl RoomRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Room a connection belongs to, if joined.
    pub fn room_of(&mut self, conn: &str) -> Option<&mut Room> {
        let key = self.members.get(conn)?.clone();
        self.rooms.get_mut(&key)
    }

    /// Whether a room exists under this key.
    pub fn contains(&self, key: &str) -> bool {
        self.rooms.contains_key(key)
    }

    /// Fetch-or-create a room and record the membership.
    pub fn join(&mut self, key: &str, conn: ConnId) -> &mut Room {
        self.members.insert(conn, key.to_string());
        self.rooms
            .entry(key.to_string())
            .or_insert_with(|| Room::new(key))
    }

    /// Drop a connection from its room. The room itself is deleted the
    /// moment its last client leaves; no ghost rooms. Returns the room key
    /// when the connection was a member.
    pub fn leave(&mut self, conn: &str) -> Option<String> {
        let key = self.members.remove(conn)?;
        if let Some(room) = self.rooms.get_mut(&key) {
            room.remove_client(conn);
            if room.clients.is_empty() {
                self.rooms.remove(&key);
                debug!(room = %key, "room deleted, last client left");
            }
        }
        Some(key)
    }

    /// Directory of public rooms.
    pub fn directory(&self) -> Vec<RoomInfo> {
        let mut items: Vec<RoomInfo> = self
            .rooms
            .values()
            .filter(|r| r.public)
            .map(|r| RoomInfo {
                id: r.key.clone(),
                name: r.meta_name.clone(),
                count: r.count(),
            })
            .collect();
        items.sort_by(|a, b| a.id.cmp(&b.id));
        items
    }

    /// Room by key, mutable.
    pub fn get_mut(&mut self, key: &str) -> Option<&mut Room> {
        self.rooms.get_mut(key)
    }

    /// Active room count.
    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    /// True when no rooms are active.
    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> (
        mpsc::UnboundedSender<ServerMessage>,
        mpsc::UnboundedReceiver<ServerMessage>,
    ) {
        mpsc::unbounded_channel()
    }

    #[test]
    fn test_first_join_becomes_host() {
        let mut room = Room::new("r");
        let (tx, _rx) = channel();
        room.insert_client("a".into(), None, tx);

        let assigned = room.arbitrate_host(None);
        assert_eq!(assigned.as_deref(), Some("a"));
        assert!(room.is_host("a"));
    }

    #[test]
    fn test_connected_host_is_kept() {
        let mut room = Room::new("r");
        let (tx, _rx1) = channel();
        room.insert_client("a".into(), None, tx);
        room.arbitrate_host(None);

        let (tx, _rx2) = channel();
        room.insert_client("b".into(), None, tx);
        assert_eq!(room.arbitrate_host(None), None);
        assert!(room.is_host("a"));
    }

    #[test]
    fn test_host_reassigned_on_departure() {
        let mut room = Room::new("r");
        let (tx, _rx1) = channel();
        room.insert_client("a".into(), None, tx);
        let (tx, _rx2) = channel();
        room.insert_client("b".into(), None, tx);
        room.arbitrate_host(None);

        room.remove_client("a");
        assert_eq!(room.host_id, None);
        let assigned = room.arbitrate_host(None);
        assert_eq!(assigned.as_deref(), Some("b"));
    }

    #[test]
    fn test_create_intent_forces_host() {
        let mut room = Room::new("r");
        let (tx, _rx1) = channel();
        room.insert_client("a".into(), None, tx);
        room.arbitrate_host(None);

        let (tx, _rx2) = channel();
        room.insert_client("b".into(), None, tx);
        let assigned = room.arbitrate_host(Some("b"));
        assert_eq!(assigned.as_deref(), Some("b"));
    }

    #[test]
    fn test_visitor_number_stable_across_reconnect() {
        let mut room = Room::new("r");
        let (tx, _rx1) = channel();
        let v1 = room.insert_client("conn1".into(), Some("token-x"), tx);
        room.remove_client("conn1");

        let (tx, _rx2) = channel();
        let v2 = room.insert_client("conn2".into(), Some("token-x"), tx);
        assert_eq!(v1, v2);

        let (tx, _rx3) = channel();
        let v3 = room.insert_client("conn3".into(), Some("token-y"), tx);
        assert_ne!(v3, v1);
    }

    #[test]
    fn test_registry_deletes_empty_room() {
        let mut reg = RoomRegistry::new();
        let (tx, _rx) = channel();
        reg.join("r", "a".into()).insert_client("a".into(), None, tx);
        assert_eq!(reg.len(), 1);

        reg.leave("a");
        assert!(reg.is_empty());
        assert!(!reg.contains("r"));
    }

    #[test]
    fn test_directory_lists_public_rooms_only() {
        let mut reg = RoomRegistry::new();
        let (tx, _rx1) = channel();
        reg.join("open", "a".into()).insert_client("a".into(), None, tx);
        reg.get_mut("open").unwrap().public = true;
        reg.get_mut("open").unwrap().meta_name = Some("Open".into());

        let (tx, _rx2) = channel();
        reg.join("secret", "b".into()).insert_client("b".into(), None, tx);

        let dir = reg.directory();
        assert_eq!(dir.len(), 1);
        assert_eq!(dir[0].id, "open");
        assert_eq!(dir[0].count, 1);
    }

    #[test]
    fn test_broadcast_skips_excluded_and_dead_peers() {
        let mut room = Room::new("r");
        let (tx_a, mut rx_a) = channel();
        room.insert_client("a".into(), None, tx_a);
        let (tx_b, rx_b) = channel();
        room.insert_client("b".into(), None, tx_b);
        drop(rx_b); // dead peer must not abort the fan-out

        room.broadcast(&ServerMessage::Presence { count: 2 }, Some("a"));
        assert!(rx_a.try_recv().is_err());

        room.broadcast(&ServerMessage::Presence { count: 2 }, None);
        assert!(matches!(
            rx_a.try_recv(),
            Ok(ServerMessage::Presence { count: 2 })
        ));
    }
}
