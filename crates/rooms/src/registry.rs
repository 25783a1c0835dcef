use std::collections::HashMap;

use parking_lot::Mutex;

use domain::{ClientId, RoomId};

use crate::connection::{ConnectionRecord, OutboundSink, PeerInfo};
use crate::room::Room;

struct State {
    connections: HashMap<ClientId, ConnectionRecord>,
    rooms: HashMap<RoomId, Room>,
}

/// Outcome of a successful `join`. Both snapshots are captured under the
/// same lock acquisition that performed the mutation, so presence frames
/// built from them are guaranteed consistent with the membership change
/// that triggered them.
pub struct JoinOutcome {
    /// `(roomId, remaining members)` for the room the connection was
    /// previously in, if any and if it actually changed.
    pub former_room: Option<(RoomId, Vec<PeerInfo>)>,
    pub new_room: (RoomId, Vec<PeerInfo>),
}

pub enum DocUpdateOutcome {
    Accepted { version: u64, text: String, members: Vec<PeerInfo> },
    Rejected { current_version: u64, text: String },
}

/// Thread-safe mapping of `roomId -> members` plus the full set of active
/// connections. A single lock guards both maps so mutation and the
/// snapshot taken for broadcast are always consistent.
pub struct Registry {
    state: Mutex<State>,
}

impl Registry {
    pub fn new() -> Self {
        Self { state: Mutex::new(State { connections: HashMap::new(), rooms: HashMap::new() }) }
    }

    pub fn register(&self, record: ConnectionRecord) {
        let mut state = self.state.lock();
        state.connections.insert(record.client_id.clone(), record);
    }

    pub fn sink(&self, client_id: &str) -> Option<OutboundSink> {
        self.state.lock().connections.get(client_id).map(|c| c.sink.clone())
    }

    pub fn current_room(&self, client_id: &str) -> Option<RoomId> {
        self.state.lock().connections.get(client_id).and_then(|c| c.current_room_id.clone())
    }

    pub fn set_alive(&self, client_id: &str, alive: bool) {
        if let Some(c) = self.state.lock().connections.get_mut(client_id) {
            c.is_alive = alive;
        }
    }

    pub fn is_alive(&self, client_id: &str) -> Option<bool> {
        self.state.lock().connections.get(client_id).map(|c| c.is_alive)
    }

    pub fn touch(&self, client_id: &str) {
        if let Some(c) = self.state.lock().connections.get_mut(client_id) {
            c.last_activity = std::time::Instant::now();
        }
    }

    /// The identifier this connection is addressed by: `userId` if known,
    /// else `clientId`.
    pub fn peer_identifier(&self, client_id: &str) -> String {
        self.state
            .lock()
            .connections
            .get(client_id)
            .map(|c| c.peer_identifier().to_string())
            .unwrap_or_else(|| client_id.to_string())
    }

    pub fn connection_count(&self) -> usize {
        self.state.lock().connections.len()
    }

    pub fn room_count(&self) -> usize {
        self.state.lock().rooms.len()
    }

    pub fn all_sinks(&self) -> Vec<(ClientId, OutboundSink)> {
        self.state.lock().connections.values().map(|c| (c.client_id.clone(), c.sink.clone())).collect()
    }

    /// Join `room_id`, implicitly leaving any previous room first
    /// (`Connected(joined r) -> Connected(joined r')` on a second `join`).
    /// Rejoining the room a connection is already in is a no-op with
    /// respect to the old room — there is nothing to leave — but the
    /// new-room snapshot is still returned so the dispatcher can reply.
    pub fn join(&self, client_id: &str, room_id: &str) -> Option<JoinOutcome> {
        let mut state = self.state.lock();
        if !state.connections.contains_key(client_id) {
            return None;
        }

        let previous = state.connections.get(client_id).and_then(|c| c.current_room_id.clone());
        let former_room = match previous {
            Some(ref old) if old != room_id => {
                let snapshot = remove_member(&mut state, old, client_id);
                Some((old.clone(), snapshot))
            }
            _ => None,
        };

        let room = state.rooms.entry(room_id.to_string()).or_default();
        room.members.insert(client_id.to_string());

        if let Some(c) = state.connections.get_mut(client_id) {
            c.current_room_id = Some(room_id.to_string());
        }

        let new_room_snapshot = snapshot_members(&state, room_id);
        Some(JoinOutcome { former_room, new_room: (room_id.to_string(), new_room_snapshot) })
    }

    /// Leave the current room, if any. Returns `(roomId, remaining
    /// members)` for the room left.
    pub fn leave(&self, client_id: &str) -> Option<(RoomId, Vec<PeerInfo>)> {
        let mut state = self.state.lock();
        let room_id = state.connections.get(client_id)?.current_room_id.clone()?;
        let snapshot = remove_member(&mut state, &room_id, client_id);
        if let Some(c) = state.connections.get_mut(client_id) {
            c.current_room_id = None;
        }
        Some((room_id, snapshot))
    }

    /// Remove a connection entirely (transport closed). Returns the former
    /// room and its remaining members if the connection was joined to one.
    pub fn remove(&self, client_id: &str) -> Option<(RoomId, Vec<PeerInfo>)> {
        let mut state = self.state.lock();
        let room_id = state.connections.get(client_id).and_then(|c| c.current_room_id.clone());
        state.connections.remove(client_id);
        let room_id = room_id?;
        let snapshot = remove_member(&mut state, &room_id, client_id);
        Some((room_id, snapshot))
    }

    pub fn peers_snapshot(&self, room_id: &str) -> Vec<PeerInfo> {
        let state = self.state.lock();
        snapshot_members(&state, room_id)
    }

    pub fn get_doc(&self, room_id: &str) -> (u64, String) {
        let state = self.state.lock();
        match state.rooms.get(room_id) {
            Some(room) => (room.version, room.text.clone()),
            None => (0, String::new()),
        }
    }

    /// Conditional document update. `base_version` absent or equal to the
    /// current version accepts and bumps `version` by exactly one; anything
    /// else is rejected with no mutation. Creates the room if it doesn't
    /// exist yet, mirroring `join`'s create-on-demand behavior.
    pub fn update_doc(&self, room_id: &str, text: String, base_version: Option<u64>) -> DocUpdateOutcome {
        let mut state = self.state.lock();
        let room = state.rooms.entry(room_id.to_string()).or_default();

        match base_version {
            None => {}
            Some(v) if v == room.version => {}
            Some(_) => {
                return DocUpdateOutcome::Rejected { current_version: room.version, text: room.text.clone() };
            }
        }

        room.version += 1;
        room.text = text;
        let version = room.version;
        let text = room.text.clone();
        let members = snapshot_members(&state, room_id);
        DocUpdateOutcome::Accepted { version, text, members }
    }

    /// Resolve a relay target by `userId` first, then `clientId`, scoped to
    /// the sender's room first and then the whole registry.
    pub fn resolve_target(&self, sender_room_id: Option<&str>, to: &str) -> Option<ClientId> {
        let state = self.state.lock();

        if let Some(room_id) = sender_room_id {
            if let Some(room) = state.rooms.get(room_id) {
                if let Some(id) = room
                    .members
                    .iter()
                    .filter_map(|cid| state.connections.get(cid))
                    .find(|c| c.peer_identifier() == to)
                {
                    return Some(id.client_id.clone());
                }
            }
        }

        state.connections.values().find(|c| c.peer_identifier() == to).map(|c| c.client_id.clone())
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

/// Remove `client_id` from `room_id`'s members, deleting the room (and its
/// document) if it becomes empty, and return a snapshot of whoever remains.
fn remove_member(state: &mut State, room_id: &str, client_id: &str) -> Vec<PeerInfo> {
    let mut now_empty = false;
    if let Some(room) = state.rooms.get_mut(room_id) {
        room.members.remove(client_id);
        now_empty = room.members.is_empty();
    }
    if now_empty {
        state.rooms.remove(room_id);
        return Vec::new();
    }
    snapshot_members(state, room_id)
}

fn snapshot_members(state: &State, room_id: &str) -> Vec<PeerInfo> {
    match state.rooms.get(room_id) {
        Some(room) => room
            .members
            .iter()
            .filter_map(|cid| state.connections.get(cid))
            .map(PeerInfo::from)
            .collect(),
        None => Vec::new(),
    }
}
