// Adjacent HTTP endpoints: health probe, ICE-server advertisement, and
// token issuance. None of these are part of the signaling core itself —
// they exist so a client can bootstrap a connection to it.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use serde_json::json;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(root))
        .route("/healthz", get(healthz))
        .route("/api/ice-servers", get(ice_servers))
        .route("/api/token", post(issue_token))
}

async fn root() -> Html<&'static str> {
    Html("signaling gateway up")
}

async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "connections": state.registry.connection_count(),
        "rooms": state.registry.room_count(),
    }))
}

/// Pure JSON endpoint; real STUN/TURN credentials are out of scope here —
/// this only advertises whatever the deployment configured as public STUN.
async fn ice_servers() -> impl IntoResponse {
    Json(json!({
        "iceServers": [
            { "urls": ["stun:stun.l.google.com:19302"] },
        ]
    }))
}

#[derive(Deserialize)]
struct TokenRequest {
    #[serde(rename = "userId")]
    user_id: String,
    #[serde(rename = "roomId")]
    room_id: Option<String>,
}

/// `POST /api/token`: mints a short-TTL signed token. The signaling core
/// never calls this itself — it only verifies whatever token a client
/// presents on upgrade; issuance is out of scope for the core and lives
/// here purely as a dev/test convenience mirroring an external issuer.
async fn issue_token(State(state): State<AppState>, Json(req): Json<TokenRequest>) -> impl IntoResponse {
    if !state.verifier.has_secret() {
        return (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "error": "no_secret_configured" }))).into_response();
    }
    match state.verifier.issue(&req.user_id, req.room_id.as_deref(), state.config.token_ttl_secs) {
        Ok(token) => Json(json!({ "token": token, "expiresIn": state.config.token_ttl_secs })).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": e.to_string() }))).into_response(),
    }
}
