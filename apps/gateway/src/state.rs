// Shared services the app uses, cloned into every handler and worker task
// via `State(AppState)` / explicit `Arc` capture.

use std::sync::Arc;

use auth::TokenVerifier;
use presence::PresenceBroadcaster;
use rate::{ConnectLimiter, MessageLimiter};
use rooms::Registry;

use crate::config::Config;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<Registry>,
    pub verifier: Arc<TokenVerifier>,
    pub presence: Arc<PresenceBroadcaster>,
    pub connect_limiter: Arc<ConnectLimiter>,
    pub message_limiter: Arc<MessageLimiter>,
    /// Flips to `true` when the server starts a graceful drain: stop
    /// accepting upgrades, send close 1001 to every connection.
    pub shutdown: tokio::sync::watch::Receiver<bool>,
}

impl AppState {
    pub fn new(config: Config, shutdown: tokio::sync::watch::Receiver<bool>) -> Self {
        let connect_limiter =
            Arc::new(ConnectLimiter::new(config.connect_rate_max, config.connect_rate_window, config.connect_rate_max_concurrent));
        let message_limiter = Arc::new(MessageLimiter::new(config.message_rate_capacity, config.message_rate_window));
        let verifier = Arc::new(TokenVerifier::new(config.jwt_secret.clone()));

        Self {
            config: Arc::new(config),
            registry: Arc::new(Registry::new()),
            verifier,
            presence: Arc::new(PresenceBroadcaster::new()),
            connect_limiter,
            message_limiter,
            shutdown,
        }
    }
}
