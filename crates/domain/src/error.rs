use thiserror::Error;

/// Closed vocabulary of reasons an `error` frame (or upgrade rejection) can
/// carry, per the wire error taxonomy. `Display` (derived via `thiserror`)
/// renders the exact lowercase wire string so handlers can do
/// `reason.to_string()` straight into JSON instead of hand-maintaining the
/// string table in two places.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum WireErrorReason {
    #[error("invalid_json")]
    InvalidJson,
    #[error("invalid_message")]
    InvalidMessage,
    #[error("unknown_type")]
    UnknownType,
    #[error("auth_required")]
    AuthRequired,
    #[error("auth_failed")]
    AuthFailed,
    #[error("token_expired")]
    TokenExpired,
    #[error("rate_limited")]
    RateLimited,
    #[error("server_error")]
    ServerError,
    #[error("join requires roomId")]
    JoinRequiresRoomId,
}
