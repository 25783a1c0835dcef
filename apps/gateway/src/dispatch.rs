// Message Dispatcher, Signaling Relay and Document Coordinator wiring. One
// call to `dispatch` handles exactly one inbound frame for exactly one
// connection; the registry lock only ever spans a single mutation +
// snapshot, never an I/O wait.

use serde_json::{json, Value};

use domain::{FrameError, InboundFrame, OutboundFrame, SignalingKind, WireErrorReason, FROM_SERVER};
use rooms::{DocUpdateOutcome, JoinOutcome};

use crate::state::AppState;

/// Send one frame to a single connection, if it's still registered. Best
/// effort — a closed sink just means the connection is already tearing
/// down elsewhere.
fn send_to(state: &AppState, client_id: &str, frame: OutboundFrame) {
    if let Some(sink) = state.registry.sink(client_id) {
        if sink.send(frame.to_json_string()).is_err() {
            tracing::debug!(client_id, "send failed, sink closed");
        }
    }
}

fn send_error(state: &AppState, client_id: &str, reason: WireErrorReason, extra: Value) {
    let mut payload = json!({ "reason": reason.to_string() });
    if let (Some(obj), Some(extra_obj)) = (payload.as_object_mut(), extra.as_object()) {
        for (k, v) in extra_obj {
            obj.insert(k.clone(), v.clone());
        }
    }
    send_to(state, client_id, OutboundFrame::new("error", FROM_SERVER, payload));
}

fn broadcast_except(state: &AppState, room_id: &str, except: &str, frame: OutboundFrame) {
    for peer in state.registry.peers_snapshot(room_id) {
        if peer.client_id == except {
            continue;
        }
        send_to(state, &peer.client_id, frame.clone());
    }
}

fn broadcast_all(state: &AppState, room_id: &str, frame: OutboundFrame) {
    for peer in state.registry.peers_snapshot(room_id) {
        send_to(state, &peer.client_id, frame.clone());
    }
}

/// Entry point: apply the message rate limiter, parse, and route one raw
/// text frame from `client_id`. Oversize/unparseable/invalid frames and
/// rate-limit breaches all resolve to an `error` frame; the connection
/// stays open in every case.
pub fn dispatch(state: &AppState, client_id: &str, raw: &str) {
    if raw.len() > state.config.max_frame_bytes {
        send_error(state, client_id, WireErrorReason::InvalidJson, json!({}));
        return;
    }

    if let Err(retry_after) = state.message_limiter.allow(client_id) {
        tracing::debug!(client_id, retry_after, "message rate limit breached");
        send_error(state, client_id, WireErrorReason::RateLimited, json!({ "retryAfter": retry_after }));
        return;
    }

    state.registry.touch(client_id);

    let value: Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(_) => {
            send_error(state, client_id, WireErrorReason::InvalidJson, json!({}));
            return;
        }
    };

    let frame = match InboundFrame::parse(&value) {
        Ok(f) => f,
        Err(FrameError::UnknownType(_)) => {
            send_error(state, client_id, WireErrorReason::UnknownType, json!({}));
            return;
        }
        Err(FrameError::MissingRoomId) => {
            send_error(state, client_id, WireErrorReason::JoinRequiresRoomId, json!({}));
            return;
        }
        Err(FrameError::InvalidShape(detail)) => {
            send_error(state, client_id, WireErrorReason::InvalidMessage, json!({ "detail": detail }));
            return;
        }
    };

    match frame {
        InboundFrame::Join { room_id } => handle_join(state, client_id, &room_id),
        InboundFrame::Leave => handle_leave(state, client_id),
        InboundFrame::GetPeers => handle_get_peers(state, client_id),
        InboundFrame::GetDoc => handle_get_doc(state, client_id),
        InboundFrame::Update { room_id, text, base_version, user_id } => {
            handle_update(state, client_id, &room_id, text, base_version, user_id)
        }
        InboundFrame::Cursor { room_id, payload } => handle_cursor(state, client_id, &room_id, payload),
        InboundFrame::Signaling { kind, room_id, to, payload } => {
            handle_signaling(state, client_id, kind, room_id, to, payload)
        }
    }
}

pub(crate) fn handle_join(state: &AppState, client_id: &str, room_id: &str) {
    let Some(JoinOutcome { former_room, new_room }) = state.registry.join(client_id, room_id) else {
        return;
    };
    tracing::debug!(client_id, room_id, "joined room");

    send_to(
        state,
        client_id,
        OutboundFrame::new("joined", FROM_SERVER, json!({ "roomId": room_id })),
    );

    let (version, text) = state.registry.get_doc(room_id);
    send_to(state, client_id, OutboundFrame::new("doc", FROM_SERVER, json!({ "version": version, "text": text })));

    if let Some((former_id, _)) = &former_room {
        state.presence.broadcast(&state.registry, former_id);
    }
    let _ = new_room;
    state.presence.broadcast(&state.registry, room_id);
}

fn handle_leave(state: &AppState, client_id: &str) {
    let Some((room_id, _)) = state.registry.leave(client_id) else {
        return;
    };
    tracing::debug!(client_id, room_id = %room_id, "left room");
    send_to(state, client_id, OutboundFrame::new("left", FROM_SERVER, json!({ "roomId": room_id })));
    state.presence.broadcast(&state.registry, &room_id);
}

fn handle_get_peers(state: &AppState, client_id: &str) {
    let Some(room_id) = state.registry.current_room(client_id) else {
        return;
    };
    let peers = state.registry.peers_snapshot(&room_id);
    let descriptors: Vec<_> = peers
        .iter()
        .map(|p| {
            json!({
                "id": p.user_id.clone().unwrap_or_else(|| p.client_id.clone()),
                "origin": p.origin,
                "userAgent": p.user_agent,
                "remoteAddress": p.remote_address,
                "roomId": room_id,
            })
        })
        .collect();
    let total = descriptors.len();
    send_to(
        state,
        client_id,
        OutboundFrame::new("peers-updated", FROM_SERVER, json!({ "peers": descriptors, "total": total, "count": total.saturating_sub(1) })),
    );
}

fn handle_get_doc(state: &AppState, client_id: &str) {
    let Some(room_id) = state.registry.current_room(client_id) else {
        return;
    };
    let (version, text) = state.registry.get_doc(&room_id);
    send_to(state, client_id, OutboundFrame::new("doc", FROM_SERVER, json!({ "version": version, "text": text })));
}

fn handle_update(
    state: &AppState,
    client_id: &str,
    room_id: &str,
    text: String,
    base_version: Option<u64>,
    user_id: Option<String>,
) {
    let author = user_id.unwrap_or_else(|| state.registry.peer_identifier(client_id));
    match state.registry.update_doc(room_id, text, base_version) {
        DocUpdateOutcome::Accepted { version, text, .. } => {
            let frame = OutboundFrame::new("doc-updated", FROM_SERVER, json!({ "version": version, "text": text, "author": author }));
            broadcast_all(state, room_id, frame);
        }
        DocUpdateOutcome::Rejected { current_version, text } => {
            tracing::debug!(
                client_id,
                room_id,
                base_version = ?base_version,
                current_version,
                "document update rejected: stale baseVersion"
            );
            send_to(
                state,
                client_id,
                OutboundFrame::new("update-rejected", FROM_SERVER, json!({ "currentVersion": current_version, "text": text })),
            );
        }
    }
}

fn handle_cursor(state: &AppState, client_id: &str, room_id: &str, payload: Value) {
    let from = state.registry.peer_identifier(client_id);
    let frame = OutboundFrame::new("cursor", from, payload);
    broadcast_except(state, room_id, client_id, frame);
}

/// Signaling relay (spec §4.6): direct-to-peer when a unique `to` target is
/// found (sender's room first, then globally), else fan out to the
/// sender's room excluding the sender.
fn handle_signaling(state: &AppState, client_id: &str, kind: SignalingKind, room_id: Option<String>, to: Option<String>, payload: Value) {
    let from = state.registry.peer_identifier(client_id);
    let sender_room = room_id.or_else(|| state.registry.current_room(client_id));

    let mut frame = OutboundFrame::new(kind.wire_type(), from, payload);
    if let Some(target) = &to {
        frame = frame.with_to(target.clone());
    }

    if let Some(target) = &to {
        if let Some(target_client) = state.registry.resolve_target(sender_room.as_deref(), target) {
            send_to(state, &target_client, frame);
            return;
        }
    }

    let Some(room_id) = sender_room else {
        return;
    };
    broadcast_except(state, &room_id, client_id, frame);
}

#[cfg(test)]
mod tests {
    use rooms::ConnectionRecord;
    use tokio::sync::mpsc;

    use super::*;
    use crate::config::Config;

    fn test_state() -> AppState {
        let (_tx, rx) = tokio::sync::watch::channel(false);
        AppState::new(Config::from_env(), rx)
    }

    fn connect(state: &AppState, client_id: &str, user_id: Option<&str>) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        state.registry.register(ConnectionRecord::new(
            client_id.to_string(),
            user_id.map(str::to_string),
            None,
            None,
            None,
            tx,
        ));
        rx
    }

    fn next_frame(rx: &mut mpsc::UnboundedReceiver<String>) -> Value {
        serde_json::from_str(&rx.try_recv().expect("expected a queued frame")).unwrap()
    }

    #[test]
    fn join_replies_with_joined_and_doc_and_broadcasts_presence() {
        let state = test_state();
        let mut alice = connect(&state, "c1", Some("alice"));

        dispatch(&state, "c1", r#"{"type":"join","roomId":"r1"}"#);

        assert_eq!(next_frame(&mut alice)["type"], "joined");
        assert_eq!(next_frame(&mut alice)["type"], "doc");
        assert_eq!(next_frame(&mut alice)["type"], "peers-updated");
    }

    #[test]
    fn unknown_type_yields_error_frame_and_leaves_connection_open() {
        let state = test_state();
        let mut alice = connect(&state, "c1", Some("alice"));

        dispatch(&state, "c1", r#"{"type":"teleport"}"#);

        let frame = next_frame(&mut alice);
        assert_eq!(frame["type"], "error");
        assert_eq!(frame["payload"]["reason"], "unknown_type");
        assert!(state.registry.is_alive("c1").is_some());
    }

    #[test]
    fn join_without_room_id_reports_dedicated_reason() {
        let state = test_state();
        let mut alice = connect(&state, "c1", Some("alice"));

        dispatch(&state, "c1", r#"{"type":"join"}"#);

        let frame = next_frame(&mut alice);
        assert_eq!(frame["type"], "error");
        assert_eq!(frame["payload"]["reason"], "join requires roomId");
    }

    #[test]
    fn update_broadcasts_doc_updated_and_rejects_stale_base_version() {
        let state = test_state();
        let mut alice = connect(&state, "c1", Some("alice"));
        let mut bob = connect(&state, "c2", Some("bob"));
        dispatch(&state, "c1", r#"{"type":"join","roomId":"r1"}"#);
        dispatch(&state, "c2", r#"{"type":"join","roomId":"r1"}"#);
        // drain join/doc/presence frames from both sinks: alice sees her own
        // solo join's presence frame plus a second one once bob joins.
        for _ in 0..4 {
            next_frame(&mut alice);
        }
        for _ in 0..3 {
            next_frame(&mut bob);
        }

        dispatch(&state, "c1", r#"{"type":"update","roomId":"r1","text":"hello","baseVersion":0}"#);
        assert_eq!(next_frame(&mut alice)["type"], "doc-updated");
        assert_eq!(next_frame(&mut bob)["type"], "doc-updated");

        dispatch(&state, "c1", r#"{"type":"update","roomId":"r1","text":"stale","baseVersion":0}"#);
        let rejected = next_frame(&mut alice);
        assert_eq!(rejected["type"], "update-rejected");
        assert_eq!(rejected["payload"]["currentVersion"], 1);
    }

    #[test]
    fn signaling_relays_directly_to_named_target() {
        let state = test_state();
        let mut alice = connect(&state, "c1", Some("alice"));
        let mut bob = connect(&state, "c2", Some("bob"));
        dispatch(&state, "c1", r#"{"type":"join","roomId":"r1"}"#);
        dispatch(&state, "c2", r#"{"type":"join","roomId":"r1"}"#);
        for _ in 0..4 {
            next_frame(&mut alice);
        }
        for _ in 0..3 {
            next_frame(&mut bob);
        }

        dispatch(&state, "c1", r#"{"type":"offer","roomId":"r1","to":"bob","sdp":{"sdp":"..."}}"#);

        let offer = next_frame(&mut bob);
        assert_eq!(offer["type"], "offer");
        assert_eq!(offer["from"], "alice");
        assert!(alice.try_recv().is_err());
    }

    #[test]
    fn signaling_falls_back_to_room_broadcast_when_target_not_found() {
        let state = test_state();
        let mut alice = connect(&state, "c1", Some("alice"));
        let mut bob = connect(&state, "c2", Some("bob"));
        dispatch(&state, "c1", r#"{"type":"join","roomId":"r1"}"#);
        dispatch(&state, "c2", r#"{"type":"join","roomId":"r1"}"#);
        for _ in 0..4 {
            next_frame(&mut alice);
        }
        for _ in 0..3 {
            next_frame(&mut bob);
        }

        dispatch(&state, "c1", r#"{"type":"ice-candidate","roomId":"r1","to":"nobody","candidate":{}}"#);

        let candidate = next_frame(&mut bob);
        assert_eq!(candidate["type"], "ice-candidate");
        assert_eq!(candidate["from"], "alice");
    }

    #[test]
    fn get_peers_replies_to_sender_scoped_to_its_room() {
        let state = test_state();
        let mut alice = connect(&state, "c1", Some("alice"));
        let mut bob = connect(&state, "c2", Some("bob"));
        dispatch(&state, "c1", r#"{"type":"join","roomId":"r1"}"#);
        dispatch(&state, "c2", r#"{"type":"join","roomId":"r1"}"#);
        for _ in 0..4 {
            next_frame(&mut alice);
        }
        for _ in 0..3 {
            next_frame(&mut bob);
        }

        dispatch(&state, "c1", r#"{"type":"get-peers"}"#);
        let reply = next_frame(&mut alice);
        assert_eq!(reply["type"], "peers-updated");
        assert_eq!(reply["payload"]["total"], 2);
        assert_eq!(reply["payload"]["count"], 1);
        assert!(bob.try_recv().is_err());
    }

    #[test]
    fn get_doc_replies_with_current_version_and_text() {
        let state = test_state();
        let mut alice = connect(&state, "c1", Some("alice"));
        dispatch(&state, "c1", r#"{"type":"join","roomId":"r1"}"#);
        for _ in 0..3 {
            next_frame(&mut alice);
        }
        dispatch(&state, "c1", r#"{"type":"update","roomId":"r1","text":"hi","baseVersion":0}"#);
        next_frame(&mut alice); // doc-updated

        dispatch(&state, "c1", r#"{"type":"request-doc"}"#);
        let doc = next_frame(&mut alice);
        assert_eq!(doc["type"], "doc");
        assert_eq!(doc["payload"]["version"], 1);
        assert_eq!(doc["payload"]["text"], "hi");
    }

    #[test]
    fn cursor_broadcasts_to_room_excluding_sender() {
        let state = test_state();
        let mut alice = connect(&state, "c1", Some("alice"));
        let mut bob = connect(&state, "c2", Some("bob"));
        dispatch(&state, "c1", r#"{"type":"join","roomId":"r1"}"#);
        dispatch(&state, "c2", r#"{"type":"join","roomId":"r1"}"#);
        for _ in 0..4 {
            next_frame(&mut alice);
        }
        for _ in 0..3 {
            next_frame(&mut bob);
        }

        dispatch(&state, "c1", r#"{"type":"cursor","roomId":"r1","x":1,"y":2}"#);
        let cursor = next_frame(&mut bob);
        assert_eq!(cursor["type"], "cursor");
        assert_eq!(cursor["from"], "alice");
        assert_eq!(cursor["payload"]["x"], 1);
        assert!(alice.try_recv().is_err());
    }

    #[test]
    fn leave_emits_left_and_presence_update() {
        let state = test_state();
        let mut alice = connect(&state, "c1", Some("alice"));
        let mut bob = connect(&state, "c2", Some("bob"));
        dispatch(&state, "c1", r#"{"type":"join","roomId":"r1"}"#);
        dispatch(&state, "c2", r#"{"type":"join","roomId":"r1"}"#);
        for _ in 0..4 {
            next_frame(&mut alice);
        }
        for _ in 0..3 {
            next_frame(&mut bob);
        }

        dispatch(&state, "c1", r#"{"type":"leave"}"#);
        assert_eq!(next_frame(&mut alice)["type"], "left");
        let presence = next_frame(&mut bob);
        assert_eq!(presence["type"], "peers-updated");
        assert_eq!(presence["payload"]["total"], 1);
        assert!(alice.try_recv().is_err());
    }

    #[test]
    fn message_rate_limit_breach_yields_error_and_does_not_dispatch() {
        let mut config = Config::from_env();
        config.message_rate_capacity = 2;
        config.message_rate_window = std::time::Duration::from_secs(10);
        let (_tx, rx) = tokio::sync::watch::channel(false);
        let state = AppState::new(config, rx);
        let mut alice = connect(&state, "c1", Some("alice"));

        dispatch(&state, "c1", r#"{"type":"get-peers"}"#);
        dispatch(&state, "c1", r#"{"type":"get-peers"}"#);
        // c1 isn't in a room, so the two get-peers calls above produced no
        // frames; the third request breaches the 2-message bucket.
        dispatch(&state, "c1", r#"{"type":"get-peers"}"#);

        let frame = next_frame(&mut alice);
        assert_eq!(frame["type"], "error");
        assert_eq!(frame["payload"]["reason"], "rate_limited");
        assert!(frame["payload"]["retryAfter"].is_u64());
    }

    #[test]
    fn oversize_frame_yields_invalid_json() {
        let state = test_state();
        let mut alice = connect(&state, "c1", Some("alice"));
        let huge = format!(r#"{{"type":"cursor","roomId":"r1","pad":"{}"}}"#, "x".repeat(200_000));

        dispatch(&state, "c1", &huge);

        let frame = next_frame(&mut alice);
        assert_eq!(frame["type"], "error");
        assert_eq!(frame["payload"]["reason"], "invalid_json");
    }
}
