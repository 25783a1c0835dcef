//! Token Verifier.
//!
//! Validates the bearer tokens clients present on the WebSocket upgrade and
//! extracts a normalized [`Identity`]. This crate only *verifies* — minting
//! tokens is the external issuer's job in production; `issue` exists purely
//! to back the adjacent `/api/token` dev/test endpoint, mirroring the
//! contract of that external issuer.

use std::time::{SystemTime, UNIX_EPOCH};

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Claims as minted by the external issuer. Every field beyond the user
/// identifier is optional.
#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    #[serde(skip_serializing_if = "Option::is_none")]
    sub: Option<String>,
    #[serde(rename = "userId", skip_serializing_if = "Option::is_none")]
    user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    uid: Option<String>,
    #[serde(rename = "roomId", skip_serializing_if = "Option::is_none")]
    room_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    iat: usize,
    exp: usize,
}

/// Normalized identity extracted from a verified token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub room_id: Option<String>,
    pub name: Option<String>,
    pub role: Option<String>,
}

/// Closed vocabulary of verification failure reasons. `Display` renders the
/// exact wire string.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum VerifyError {
    #[error("no_secret_configured")]
    NoSecretConfigured,
    #[error("no_token_provided")]
    NoTokenProvided,
    #[error("token_expired")]
    TokenExpired,
    #[error("invalid_token")]
    InvalidToken,
    #[error("missing_user_identifier")]
    MissingUserIdentifier,
}

/// Verifies tokens signed with a single symmetric secret (HS256). Holding
/// `None` as the secret means "no signing secret configured" and every
/// verification fails closed with [`VerifyError::NoSecretConfigured`] —
/// the gateway only constructs a verifier this way if it refuses to start
/// without one in production, or wants it in dev mode without auth enabled.
#[derive(Clone)]
pub struct TokenVerifier {
    secret: Option<String>,
}

impl TokenVerifier {
    pub fn new(secret: Option<String>) -> Self {
        Self { secret }
    }

    pub fn has_secret(&self) -> bool {
        self.secret.is_some()
    }

    /// Verify `token` and extract its normalized identity.
    ///
    /// Enforces a single symmetric algorithm (HS256); tokens signed with any
    /// other algorithm, including the unsigned `none` algorithm, are
    /// rejected as `invalid_token` because `jsonwebtoken` only attempts the
    /// algorithms listed in [`Validation`].
    pub fn verify(&self, token: &str) -> Result<Identity, VerifyError> {
        let secret = self.secret.as_deref().ok_or(VerifyError::NoSecretConfigured)?;
        if token.is_empty() {
            return Err(VerifyError::NoTokenProvided);
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.required_spec_claims.clear();

        let data = decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation).map_err(
            |e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => VerifyError::TokenExpired,
                _ => VerifyError::InvalidToken,
            },
        )?;

        let claims = data.claims;
        let user_id = claims
            .sub
            .or(claims.user_id)
            .or(claims.uid)
            .ok_or(VerifyError::MissingUserIdentifier)?;

        Ok(Identity { user_id, room_id: claims.room_id, name: claims.name, role: claims.role })
    }

    /// Mint a signed token for `user_id` (and optional `room_id`) with a TTL
    /// in seconds. Backs the adjacent dev/test `/api/token` endpoint only —
    /// the dispatcher never calls this itself.
    pub fn issue(&self, user_id: &str, room_id: Option<&str>, ttl_secs: usize) -> Result<String, VerifyError> {
        let secret = self.secret.as_deref().ok_or(VerifyError::NoSecretConfigured)?;
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as usize;
        let claims = Claims {
            sub: Some(user_id.to_string()),
            user_id: None,
            uid: None,
            room_id: room_id.map(str::to_string),
            name: None,
            role: None,
            iat: now,
            exp: now + ttl_secs,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(secret.as_bytes()))
            .map_err(|_| VerifyError::InvalidToken)
    }
}
