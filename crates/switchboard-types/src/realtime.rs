//! WebSocket wire protocol.
//!
//! Inbound frames are JSON objects discriminated by `type`. Outbound frames
//! share one envelope: `{type, data, success, error, timestamp}`.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;

/// Inbound event types the server understands.
pub const INBOUND_TYPES: &[&str] = &[
    "auth",
    "ping",
    "message",
    "typing",
    "join_session",
    "leave_session",
    "system",
];

/// A parsed inbound frame.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundEvent {
    Auth {
        #[serde(default)]
        token: Option<String>,
        #[serde(default, alias = "sessionId")]
        session_id: Option<String>,
    },
    Ping {
        #[serde(default)]
        timestamp: Option<Value>,
    },
    Message {
        #[serde(alias = "text")]
        content: String,
        #[serde(default, alias = "sessionId")]
        session_id: Option<String>,
        #[serde(default, alias = "message_id")]
        id: Option<String>,
    },
    Typing {
        #[serde(default, alias = "sessionId")]
        session_id: Option<String>,
        #[serde(default)]
        is_typing: bool,
    },
    JoinSession {
        #[serde(default, alias = "sessionId")]
        session_id: Option<String>,
    },
    LeaveSession,
    System {
        action: String,
        #[serde(default, alias = "sessionId")]
        session_id: Option<String>,
        #[serde(default, alias = "userId")]
        user_id: Option<String>,
    },
}

/// Why an inbound frame was rejected.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FrameError {
    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    #[error("missing message type")]
    MissingType,

    #[error("unknown message type: {0}")]
    UnknownType(String),

    #[error("invalid {kind} message: {reason}")]
    Invalid { kind: String, reason: String },
}

impl FrameError {
    /// Client-visible error code.
    pub fn code(&self) -> &'static str {
        match self {
            FrameError::InvalidJson(_) => "INVALID_JSON",
            FrameError::MissingType => "MISSING_TYPE",
            FrameError::UnknownType(_) => "UNKNOWN_TYPE",
            FrameError::Invalid { .. } => "VALIDATION_ERROR",
        }
    }
}

impl InboundEvent {
    /// Parse a text frame, classifying failures the way clients expect.
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| FrameError::InvalidJson(e.to_string()))?;

        let kind = match value.get("type").and_then(Value::as_str) {
            Some(kind) if !kind.is_empty() => kind.to_string(),
            _ => return Err(FrameError::MissingType),
        };
        if !INBOUND_TYPES.contains(&kind.as_str()) {
            return Err(FrameError::UnknownType(kind));
        }

        serde_json::from_value(value).map_err(|e| FrameError::Invalid {
            kind,
            reason: e.to_string(),
        })
    }
}

/// Outbound envelope sent to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: Value,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: String,
}

impl OutboundEvent {
    /// A successful event of the given type.
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data,
            success: true,
            error: None,
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    /// A failed response of the given type, e.g. a rejected `auth`.
    pub fn failure(kind: impl Into<String>, data: Value, error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::new(kind, data)
        }
    }

    /// A structured `error` event.
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        Self::failure(
            "error",
            json!({ "code": code, "message": message }),
            message.clone(),
        )
    }

    /// Keep-alive frame pushed by the heartbeat loop.
    pub fn heartbeat() -> Self {
        Self::new(
            "heartbeat",
            json!({ "timestamp": Utc::now().timestamp_millis() }),
        )
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"type":"error","data":{"code":"SERIALIZATION_ERROR"},"success":false}"#.to_string()
        })
    }
}

/// One incremental fragment of a generated reply.
///
/// Concatenating every non-final `content` of a generation, in order, gives
/// the final `full_content`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamChunk {
    pub session_id: String,
    pub content: String,
    pub full_content: String,
    pub is_complete: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

impl StreamChunk {
    pub fn into_event(self) -> OutboundEvent {
        OutboundEvent::new(
            "ai_stream",
            serde_json::to_value(self).unwrap_or(Value::Null),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_message_accepts_aliases() {
        let event =
            InboundEvent::parse(r#"{"type":"message","text":"hi","sessionId":"s1","message_id":"m1"}"#)
                .unwrap();
        assert_eq!(
            event,
            InboundEvent::Message {
                content: "hi".to_string(),
                session_id: Some("s1".to_string()),
                id: Some("m1".to_string()),
            }
        );
    }

    #[test]
    fn parse_classifies_failures() {
        assert_eq!(
            InboundEvent::parse("not json").unwrap_err().code(),
            "INVALID_JSON"
        );
        assert_eq!(
            InboundEvent::parse(r#"{"content":"x"}"#).unwrap_err().code(),
            "MISSING_TYPE"
        );
        assert_eq!(
            InboundEvent::parse(r#"{"type":"dance"}"#).unwrap_err(),
            FrameError::UnknownType("dance".to_string())
        );
        assert_eq!(
            InboundEvent::parse(r#"{"type":"message"}"#).unwrap_err().code(),
            "VALIDATION_ERROR"
        );
    }

    #[test]
    fn parse_unit_like_variants() {
        assert_eq!(
            InboundEvent::parse(r#"{"type":"leave_session"}"#).unwrap(),
            InboundEvent::LeaveSession
        );
        assert!(matches!(
            InboundEvent::parse(r#"{"type":"ping"}"#).unwrap(),
            InboundEvent::Ping { timestamp: None }
        ));
    }

    #[test]
    fn error_event_carries_code_and_flag() {
        let event = OutboundEvent::error("NOT_AUTHENTICATED", "login first");
        let value: Value = serde_json::from_str(&event.to_json()).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["success"], false);
        assert_eq!(value["data"]["code"], "NOT_AUTHENTICATED");
        assert_eq!(value["error"], "login first");
    }

    #[test]
    fn stream_chunk_becomes_ai_stream_event() {
        let event = StreamChunk {
            session_id: "s1".to_string(),
            content: "Hel".to_string(),
            full_content: "Hel".to_string(),
            is_complete: false,
            message_id: None,
        }
        .into_event();
        assert_eq!(event.kind, "ai_stream");
        assert_eq!(event.data["full_content"], "Hel");
        assert!(event.data.get("message_id").is_none());
    }
}
