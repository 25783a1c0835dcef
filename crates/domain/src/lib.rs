//! Shared wire/domain types for the signaling core.
//!
//! Nothing in this crate talks to a socket or holds a registry; it just
//! defines the identifiers, the inbound/outbound frame shapes, and the
//! closed error vocabularies that cross the wire. Keeping them here lets
//! `rooms`, `presence`, `auth` and the gateway binary agree on a single
//! definition instead of re-deriving JSON shapes in three places.

mod error;
mod frame;
mod peer;

pub use error::WireErrorReason;
pub use frame::{InboundFrame, OutboundFrame, SignalingKind, FrameError, FROM_SERVER};
pub use peer::PeerDescriptor;

/// Stable, server-generated identity of one transport connection.
pub type ClientId = String;
/// Principal identity, normally drawn from a verified token.
pub type UserId = String;
/// Opaque, non-empty room name (1-256 chars).
pub type RoomId = String;

/// Milliseconds since the Unix epoch, as carried on every outbound frame.
pub fn now_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Validate a room id per the data model: 1-256 characters, non-empty.
pub fn is_valid_room_id(room_id: &str) -> bool {
    !room_id.is_empty() && room_id.len() <= 256
}
