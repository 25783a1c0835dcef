// Gateway entrypoint (Axum + Tokio).
//
// Wires the signaling core's services into an `AppState`, builds the HTTP
// router (adjacent endpoints + the `/ws` upgrade), attaches the ambient
// middleware stack, and serves with a bounded graceful drain.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Result;
use axum::http::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use axum::http::Method;
use axum::Router;
use tokio::net::TcpListener;
use tokio::signal;
use tower::timeout::TimeoutLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

mod config;
mod dispatch;
mod heartbeat;
mod routes;
mod state;

use config::Config;
use state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    let addr: SocketAddr = config.addr.parse()?;
    let drain = config.shutdown_drain;
    let production = config.production;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let state = AppState::new(config, shutdown_rx);

    if production && state.config.allowed_origins.is_empty() {
        tracing::warn!("SIGNALING_ENV=production but CORS_ALLOW_ORIGINS is empty; every upgrade will be rejected");
    }
    if production && !state.verifier.has_secret() {
        tracing::warn!("SIGNALING_ENV=production but AUTH_JWT_SECRET is unset; every upgrade will be rejected");
    }

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([ACCEPT, CONTENT_TYPE, AUTHORIZATION])
        .allow_origin(AllowOrigin::any());

    let app: Router = routes::all()
        .with_state(state.clone())
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(10)))
        .layer(cors);

    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, production, "gateway listening");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async move {
            let _ = signal::ctrl_c().await;
            tracing::info!("shutdown signal received, draining connections");
            let _ = shutdown_tx.send(true);
            tokio::time::sleep(drain).await;
        })
        .await?;

    Ok(())
}
