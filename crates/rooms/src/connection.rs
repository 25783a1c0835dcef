use std::time::Instant;

use tokio::sync::mpsc;

use domain::{ClientId, RoomId, UserId};

/// Outbound sink for a connection. Owned exclusively by that connection's
/// worker; every other worker delivers by enqueueing a frame here rather
/// than writing to a transport directly.
pub type OutboundSink = mpsc::UnboundedSender<String>;

/// Per-connection metadata. Mutated only by the dispatcher that owns the
/// connection and by the heartbeat supervisor (`is_alive`); the registry
/// mutates `current_room_id` on the connection's behalf as part of
/// join/leave, under the same lock that updates room membership, so the two
/// never drift apart.
pub struct ConnectionRecord {
    pub client_id: ClientId,
    pub user_id: Option<UserId>,
    pub current_room_id: Option<RoomId>,
    pub is_alive: bool,
    pub last_activity: Instant,
    pub remote_address: Option<String>,
    pub user_agent: Option<String>,
    pub origin: Option<String>,
    pub sink: OutboundSink,
}

impl ConnectionRecord {
    pub fn new(
        client_id: ClientId,
        user_id: Option<UserId>,
        remote_address: Option<String>,
        user_agent: Option<String>,
        origin: Option<String>,
        sink: OutboundSink,
    ) -> Self {
        Self {
            client_id,
            user_id,
            current_room_id: None,
            is_alive: true,
            last_activity: Instant::now(),
            remote_address,
            user_agent,
            origin,
            sink,
        }
    }

    /// The identifier other peers address this connection by: `userId` if
    /// known, else `clientId`.
    pub fn peer_identifier(&self) -> &str {
        self.user_id.as_deref().unwrap_or(&self.client_id)
    }
}

/// Lightweight, cloneable view of a connection used for presence snapshots
/// and relay target resolution. Never stored — always derived on demand.
#[derive(Debug, Clone)]
pub struct PeerInfo {
    pub client_id: ClientId,
    pub user_id: Option<UserId>,
    pub origin: Option<String>,
    pub user_agent: Option<String>,
    pub remote_address: Option<String>,
}

impl From<&ConnectionRecord> for PeerInfo {
    fn from(c: &ConnectionRecord) -> Self {
        Self {
            client_id: c.client_id.clone(),
            user_id: c.user_id.clone(),
            origin: c.origin.clone(),
            user_agent: c.user_agent.clone(),
            remote_address: c.remote_address.clone(),
        }
    }
}
