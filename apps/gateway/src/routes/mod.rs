// Route module aggregator. Each submodule owns a focused set of routes;
// `all()` merges them into a single router wired up in main.rs.

use axum::Router;

use crate::state::AppState;

pub mod http;
pub mod ws;

pub fn all() -> Router<AppState> {
    Router::new().merge(http::router()).merge(ws::router())
}
