// Upgrade Gate: origin check, token check, connect-rate check, handshake
// completion, and hand-off into the connection's own worker.

use std::net::SocketAddr;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use domain::{OutboundFrame, WireErrorReason, FROM_SERVER};
use rooms::ConnectionRecord;

use crate::dispatch;
use crate::heartbeat::{self, WriterCtl};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct UpgradeQuery {
    pub token: Option<String>,
    #[serde(rename = "userId")]
    pub user_id: Option<String>,
    #[serde(rename = "roomId")]
    pub room_id: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/ws", get(upgrade))
}

async fn upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<UpgradeQuery>,
    headers: HeaderMap,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
) -> Response {
    let origin = headers.get("origin").and_then(|v| v.to_str().ok()).map(str::to_string);

    if state.config.production {
        match &origin {
            Some(o) if state.config.origin_allowed(o) => {}
            other => {
                tracing::warn!(origin = ?other, "upgrade rejected: origin not allowed");
                return (StatusCode::FORBIDDEN, "origin not allowed").into_response();
            }
        }
    }

    let mut identity = None;
    if state.config.production {
        let token = match &query.token {
            Some(t) if !t.is_empty() => t.clone(),
            _ => {
                tracing::warn!(?origin, "upgrade rejected: no token provided");
                return (StatusCode::UNAUTHORIZED, WireErrorReason::AuthRequired.to_string()).into_response();
            }
        };
        match state.verifier.verify(&token) {
            Ok(id) => identity = Some(id),
            Err(auth::VerifyError::TokenExpired) => {
                tracing::warn!(?origin, "upgrade rejected: token expired");
                return (StatusCode::UNAUTHORIZED, WireErrorReason::TokenExpired.to_string()).into_response();
            }
            Err(reason) => {
                tracing::warn!(?origin, %reason, "upgrade rejected: token invalid");
                return (StatusCode::UNAUTHORIZED, WireErrorReason::AuthFailed.to_string()).into_response();
            }
        }
    } else if let Some(token) = &query.token {
        if !token.is_empty() {
            identity = state.verifier.verify(token).ok();
        }
    }

    let addr_key = remote.ip().to_string();
    if let Err(breach) = state.connect_limiter.try_connect(&addr_key) {
        tracing::warn!(addr = %addr_key, ?breach, "upgrade rejected: connect rate limit");
        return (
            StatusCode::TOO_MANY_REQUESTS,
            [("Retry-After", state.config.connect_rate_window.as_secs().to_string())],
            "rate limited",
        )
            .into_response();
    }

    let user_agent = headers.get("user-agent").and_then(|v| v.to_str().ok()).map(str::to_string);

    tracing::info!(
        client_addr = %addr_key,
        user_id = identity.as_ref().map(|i| i.user_id.as_str()),
        ?origin,
        room_id = ?query.room_id,
        "upgrade accepted"
    );

    ws.on_upgrade(move |socket| {
        run_connection(socket, state, query, origin, user_agent, addr_key, identity)
    })
}

async fn run_connection(
    socket: WebSocket,
    state: AppState,
    query: UpgradeQuery,
    origin: Option<String>,
    user_agent: Option<String>,
    addr_key: String,
    identity: Option<auth::Identity>,
) {
    // userId comes from the token, optionally overridden by the upgrade
    // query parameter — except in production, where the token always wins
    // over a disagreeing query value (data model §3).
    let user_id = if state.config.production {
        identity.as_ref().map(|i| i.user_id.clone()).or(query.user_id.clone())
    } else {
        query.user_id.clone().or_else(|| identity.as_ref().map(|i| i.user_id.clone()))
    };

    let client_id = user_id.clone().unwrap_or_else(|| Uuid::new_v4().to_string());

    let (outbound_tx, mut outbound_rx) = tokio::sync::mpsc::unbounded_channel::<String>();
    let (mut ws_writer, mut ws_reader) = socket.split();

    let record = ConnectionRecord::new(
        client_id.clone(),
        user_id,
        Some(addr_key.clone()),
        user_agent,
        origin,
        outbound_tx.clone(),
    );
    state.registry.register(record);

    let (ctl_tx, mut ctl_rx) = tokio::sync::mpsc::unbounded_channel::<WriterCtl>();

    let mut writer_shutdown = state.shutdown.clone();
    let mut writer_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                text = outbound_rx.recv() => {
                    match text {
                        Some(text) => {
                            if ws_writer.send(Message::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                ctl = ctl_rx.recv() => {
                    match ctl {
                        Some(WriterCtl::Ping) => {
                            if ws_writer.send(Message::Ping(Vec::new().into())).await.is_err() {
                                break;
                            }
                        }
                        Some(WriterCtl::Close { code, reason }) => {
                            let _ = ws_writer
                                .send(Message::Close(Some(axum::extract::ws::CloseFrame {
                                    code,
                                    reason: reason.into(),
                                })))
                                .await;
                            break;
                        }
                        None => break,
                    }
                }
                changed = writer_shutdown.changed() => {
                    if changed.is_ok() && *writer_shutdown.borrow() {
                        let _ = ws_writer
                            .send(Message::Close(Some(axum::extract::ws::CloseFrame {
                                code: 1001,
                                reason: "Server shutting down".into(),
                            })))
                            .await;
                        break;
                    }
                }
            }
        }
    });

    let (hb_stop_tx, hb_stop_rx) = tokio::sync::mpsc::channel(1);
    let hb_registry = state.registry.clone();
    let hb_client_id = client_id.clone();
    let hb_interval = state.config.heartbeat_interval;
    let hb_max_missed = state.config.heartbeat_max_missed;
    let hb_ctl_tx = ctl_tx.clone();
    let mut heartbeat_task = tokio::spawn(async move {
        heartbeat::run(hb_registry, hb_client_id, hb_interval, hb_max_missed, hb_ctl_tx, hb_stop_rx).await
    });

    let snapshot_room = query.room_id.clone().filter(|r| domain::is_valid_room_id(r));

    // Presence snapshot for the `connected` frame: the connection isn't
    // joined to anything yet at this point (registration never implies
    // membership), so this is an empty peer list unless it's somehow
    // already a member of a room by the time this runs.
    let initial_peers: Vec<_> = state
        .registry
        .current_room(&client_id)
        .map(|room_id| state.registry.peers_snapshot(&room_id))
        .unwrap_or_default()
        .iter()
        .map(|p| {
            json!({
                "id": p.user_id.clone().unwrap_or_else(|| p.client_id.clone()),
                "origin": p.origin,
                "userAgent": p.user_agent,
                "remoteAddress": p.remote_address,
            })
        })
        .collect();
    let _ = outbound_tx.send(
        OutboundFrame::new("connected", FROM_SERVER, json!({ "clientId": client_id, "peers": initial_peers })).to_json_string(),
    );

    if let Some(room_id) = snapshot_room {
        dispatch::handle_join(&state, &client_id, &room_id);
    }

    let mut heartbeat_expired = false;
    loop {
        tokio::select! {
            msg = ws_reader.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => dispatch::dispatch(&state, &client_id, text.as_str()),
                    Some(Ok(Message::Pong(_))) => {
                        state.registry.set_alive(&client_id, true);
                    }
                    Some(Ok(Message::Close(_))) => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) | None => break,
                }
            }
            outcome = &mut heartbeat_task, if !heartbeat_expired => {
                heartbeat_expired = true;
                if matches!(outcome, Ok(Some(heartbeat::HeartbeatOutcome::Expired))) {
                    let _ = ctl_tx.send(WriterCtl::Close { code: 1001, reason: "going away".to_string() });
                    break;
                }
            }
        }
    }

    let _ = hb_stop_tx.send(()).await;
    if !heartbeat_task.is_finished() {
        heartbeat_task.abort();
    }
    drop(outbound_tx);
    drop(ctl_tx);
    // Give the writer task a chance to flush a pending close frame before
    // forcing it down; a dead/unresponsive peer just means this times out.
    let _ = tokio::time::timeout(std::time::Duration::from_millis(500), &mut writer_task).await;
    writer_task.abort();

    state.message_limiter.remove(&client_id);
    state.connect_limiter.release(&addr_key);
    if let Some((room_id, _)) = state.registry.remove(&client_id) {
        state.presence.broadcast(&state.registry, &room_id);
    }
}

