use serde::Serialize;

use crate::RoomId;

/// Derived, never-stored descriptor of a connection as seen by presence.
/// Computed on demand from connection state — see the data model's note
/// that this is never persisted.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PeerDescriptor {
    pub id: String,
    pub origin: Option<String>,
    #[serde(rename = "userAgent")]
    pub user_agent: Option<String>,
    #[serde(rename = "remoteAddress")]
    pub remote_address: Option<String>,
    #[serde(rename = "roomId")]
    pub room_id: RoomId,
}
