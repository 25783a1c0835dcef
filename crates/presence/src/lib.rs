//! Presence Broadcaster: computes and fans out peer-list deltas after every
//! membership transition.

use serde_json::json;

use domain::{OutboundFrame, PeerDescriptor, FROM_SERVER};
use rooms::Registry;

/// Stateless — every call takes the registry it should read a fresh
/// snapshot from, so there is nothing to own between broadcasts.
pub struct PresenceBroadcaster;

impl PresenceBroadcaster {
    pub fn new() -> Self {
        Self
    }

    /// Send `peers-updated` to every member of `room_id`. A no-op if the
    /// room has no members left (already removed from the registry, or
    /// never had any) — presence is never emitted to an empty room.
    pub fn broadcast(&self, registry: &Registry, room_id: &str) {
        let peers = registry.peers_snapshot(room_id);
        if peers.is_empty() {
            return;
        }

        let descriptors: Vec<PeerDescriptor> = peers
            .iter()
            .map(|p| PeerDescriptor {
                id: p.user_id.clone().unwrap_or_else(|| p.client_id.clone()),
                origin: p.origin.clone(),
                user_agent: p.user_agent.clone(),
                remote_address: p.remote_address.clone(),
                room_id: room_id.to_string(),
            })
            .collect();

        let total = descriptors.len();
        let payload = json!({ "peers": descriptors, "total": total, "count": total - 1 });

        for recipient in &peers {
            let Some(sink) = registry.sink(&recipient.client_id) else { continue };
            let frame = OutboundFrame::new("peers-updated", FROM_SERVER, payload.clone());
            if sink.send(frame.to_json_string()).is_err() {
                tracing::debug!(client_id = %recipient.client_id, "dropped presence frame, sink closed");
            }
        }
    }
}

impl Default for PresenceBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rooms::{ConnectionRecord, Registry};
    use serde_json::Value;

    fn connect(registry: &Registry, client_id: &str, user_id: Option<&str>) -> tokio::sync::mpsc::UnboundedReceiver<String> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        registry.register(ConnectionRecord::new(client_id.to_string(), user_id.map(str::to_string), None, None, None, tx));
        rx
    }

    #[test]
    fn broadcasts_full_peer_list_to_every_member_including_recipient() {
        let registry = Registry::new();
        let mut alice = connect(&registry, "c1", Some("alice"));
        let mut bob = connect(&registry, "c2", Some("bob"));
        registry.join("c1", "r1").unwrap();
        registry.join("c2", "r1").unwrap();
        // drain the join-triggered broadcasts.
        while alice.try_recv().is_ok() {}
        while bob.try_recv().is_ok() {}

        let broadcaster = PresenceBroadcaster::new();
        broadcaster.broadcast(&registry, "r1");

        let a_frame: Value = serde_json::from_str(&alice.try_recv().unwrap()).unwrap();
        assert_eq!(a_frame["type"], "peers-updated");
        assert_eq!(a_frame["payload"]["total"], 2);
        assert_eq!(a_frame["payload"]["count"], 1);
        let ids: Vec<String> = a_frame["payload"]["peers"]
            .as_array()
            .unwrap()
            .iter()
            .map(|p| p["id"].as_str().unwrap().to_string())
            .collect();
        assert!(ids.contains(&"alice".to_string()));
        assert!(ids.contains(&"bob".to_string()));

        let b_frame: Value = serde_json::from_str(&bob.try_recv().unwrap()).unwrap();
        assert_eq!(b_frame["payload"]["total"], 2);
    }

    #[test]
    fn no_frame_is_sent_for_an_empty_or_unknown_room() {
        let registry = Registry::new();
        let broadcaster = PresenceBroadcaster::new();
        // Never panics, never looks up a room that doesn't exist.
        broadcaster.broadcast(&registry, "ghost-room");
    }

    #[test]
    fn departed_member_is_excluded_after_leaving() {
        let registry = Registry::new();
        let mut alice = connect(&registry, "c1", Some("alice"));
        let mut bob = connect(&registry, "c2", Some("bob"));
        registry.join("c1", "r1").unwrap();
        registry.join("c2", "r1").unwrap();
        while alice.try_recv().is_ok() {}
        while bob.try_recv().is_ok() {}

        registry.leave("c1");
        let broadcaster = PresenceBroadcaster::new();
        broadcaster.broadcast(&registry, "r1");

        let b_frame: Value = serde_json::from_str(&bob.try_recv().unwrap()).unwrap();
        assert_eq!(b_frame["payload"]["total"], 1);
        assert_eq!(b_frame["payload"]["count"], 0);
        assert!(alice.try_recv().is_err());
    }
}
