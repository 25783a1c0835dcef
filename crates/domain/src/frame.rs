use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::{now_ms, RoomId};

/// A frame the dispatcher accepted off the wire but couldn't turn into a
/// well-formed [`InboundFrame`]. Carries enough detail for an `invalid_message`
/// error frame without leaking internal parsing machinery.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// `type` was missing, not a string, or not one of the recognized values.
    #[error("unknown frame type `{0}`")]
    UnknownType(String),
    /// `type` was recognized but required fields were missing/malformed.
    #[error("invalid frame shape: {0}")]
    InvalidShape(String),
    /// A `join`/`join-room` frame arrived without a valid `roomId`. Broken
    /// out from `InvalidShape` because the wire error taxonomy gives this
    /// one its own reason string instead of the generic `invalid_message`.
    #[error("join requires roomId")]
    MissingRoomId,
}

/// Which of the three signaling message types a frame carries. Distinct from
/// the `type` string itself so relay code can match on it without restringing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalingKind {
    Offer,
    Answer,
    IceCandidate,
}

impl SignalingKind {
    pub fn wire_type(self) -> &'static str {
        match self {
            SignalingKind::Offer => "offer",
            SignalingKind::Answer => "answer",
            SignalingKind::IceCandidate => "ice-candidate",
        }
    }
}

/// A parsed, schema-validated inbound frame. Each inbound `type` string maps
/// to exactly one variant here.
#[derive(Debug, Clone)]
pub enum InboundFrame {
    Join { room_id: RoomId },
    Leave,
    GetPeers,
    GetDoc,
    Update {
        room_id: RoomId,
        text: String,
        base_version: Option<u64>,
        user_id: Option<String>,
    },
    Cursor { room_id: RoomId, payload: Value },
    Signaling {
        kind: SignalingKind,
        room_id: Option<RoomId>,
        to: Option<String>,
        /// Everything besides `type`/`roomId`/`to` — sdp, candidate, etc. —
        /// carried through untouched so the relay never has to understand it.
        payload: Value,
    },
}

impl InboundFrame {
    /// Parse an already-deserialized JSON value into a recognized frame.
    ///
    /// Two-phase: first read `type` so an unrecognized tag reports
    /// `unknown_type` rather than a generic shape-mismatch error, then
    /// validate the fields that type requires.
    pub fn parse(value: &Value) -> Result<Self, FrameError> {
        let obj = value
            .as_object()
            .ok_or_else(|| FrameError::InvalidShape("frame must be a JSON object".into()))?;

        let ty = obj
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| FrameError::InvalidShape("missing string field `type`".into()))?;

        let room_id_field = || -> Result<RoomId, FrameError> {
            obj.get("roomId")
                .and_then(Value::as_str)
                .map(str::to_string)
                .filter(|s| crate::is_valid_room_id(s))
                .ok_or_else(|| FrameError::InvalidShape("missing or invalid `roomId`".into()))
        };

        match ty {
            "join" | "join-room" => Ok(InboundFrame::Join {
                room_id: obj
                    .get("roomId")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .filter(|s| crate::is_valid_room_id(s))
                    .ok_or(FrameError::MissingRoomId)?,
            }),
            "leave" => Ok(InboundFrame::Leave),
            "get-peers" => Ok(InboundFrame::GetPeers),
            "get-doc" | "request-doc" => Ok(InboundFrame::GetDoc),
            "update" => {
                let room_id = room_id_field()?;
                let text = obj
                    .get("text")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .ok_or_else(|| FrameError::InvalidShape("missing string field `text`".into()))?;
                let base_version = match obj.get("baseVersion") {
                    None | Some(Value::Null) => None,
                    Some(v) => Some(
                        v.as_u64()
                            .ok_or_else(|| FrameError::InvalidShape("`baseVersion` must be an integer".into()))?,
                    ),
                };
                let user_id = obj.get("userId").and_then(Value::as_str).map(str::to_string);
                Ok(InboundFrame::Update { room_id, text, base_version, user_id })
            }
            "cursor" => {
                let room_id = room_id_field()?;
                let mut rest = obj.clone();
                rest.remove("type");
                rest.remove("roomId");
                Ok(InboundFrame::Cursor { room_id, payload: Value::Object(rest) })
            }
            "offer" | "answer" | "ice-candidate" | "ice" => {
                let kind = match ty {
                    "offer" => SignalingKind::Offer,
                    "answer" => SignalingKind::Answer,
                    _ => SignalingKind::IceCandidate,
                };
                let room_id = obj
                    .get("roomId")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .filter(|s| crate::is_valid_room_id(s));
                let to = obj.get("to").and_then(Value::as_str).map(str::to_string);
                let mut rest = obj.clone();
                rest.remove("type");
                rest.remove("roomId");
                rest.remove("to");
                Ok(InboundFrame::Signaling {
                    kind,
                    room_id,
                    to,
                    payload: Value::Object(rest),
                })
            }
            other => Err(FrameError::UnknownType(other.to_string())),
        }
    }
}

/// The sender string every outbound frame uses when the server itself is the
/// author (as opposed to relaying on behalf of a user).
pub const FROM_SERVER: &str = "server";

/// Builder for outbound frames. Every outbound frame carries `from`,
/// `payload`, and `timestamp`; signaling frames additionally carry `to`.
#[derive(Debug, Clone, Serialize)]
pub struct OutboundFrame {
    #[serde(rename = "type")]
    pub ty: &'static str,
    pub from: String,
    pub payload: Value,
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
}

impl OutboundFrame {
    pub fn new(ty: &'static str, from: impl Into<String>, payload: Value) -> Self {
        Self { ty, from: from.into(), payload, timestamp: now_ms(), to: None }
    }

    pub fn with_to(mut self, to: impl Into<String>) -> Self {
        self.to = Some(to.into());
        self
    }

    pub fn to_json_string(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            // Serialization of this type cannot fail (no maps with non-string
            // keys, no floats that could be NaN), but never panic on send.
            "{\"type\":\"error\",\"from\":\"server\",\"payload\":{\"reason\":\"server_error\"},\"timestamp\":0}".to_string()
        })
    }
}
