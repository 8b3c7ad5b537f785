//! WebSocket message protocol
//!
//! Control messages travel as JSON text frames tagged by `type`. Live process
//! output travels as binary frames so the bytes arrive exactly as produced;
//! clients may also send raw input as binary frames.

use serde::{Deserialize, Serialize};

use crate::session::{SessionSummary, TermSize};

/// Client -> Server messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Attach to `session_id`, spawning its process if it is not live.
    Create {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        #[serde(default)]
        request_buffer: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        size: Option<TermSize>,
    },
    /// Kill `session_id`, or the session bound to this connection when
    /// it is omitted
    Kill {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },
    /// Resize the bound session (fire-and-forget)
    Resize { cols: u16, rows: u16 },
    /// Raw input for the bound session (fire-and-forget)
    Input { data: String },
    ListSessions,
    Ping,
}

impl ClientMessage {
    pub fn create(session_id: impl Into<String>, request_buffer: bool) -> Self {
        ClientMessage::Create {
            session_id: Some(session_id.into()),
            request_buffer,
            size: None,
        }
    }

    pub fn kill(session_id: impl Into<String>) -> Self {
        ClientMessage::Kill {
            session_id: Some(session_id.into()),
        }
    }
}

/// Reply to `create`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CreateResult {
    pub success: bool,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reconnected: Option<bool>,
    /// Replay snapshot, present only when it was requested
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "base64_bytes"
    )]
    pub buffer: Option<Vec<u8>>,
}

impl CreateResult {
    pub fn attached(session_id: String, reconnected: bool, buffer: Option<Vec<u8>>) -> Self {
        Self {
            success: true,
            session_id,
            error: None,
            reconnected: Some(reconnected),
            buffer,
        }
    }

    pub fn failed(session_id: String, error: impl Into<String>) -> Self {
        Self {
            success: false,
            session_id,
            error: Some(error.into()),
            reconnected: None,
            buffer: None,
        }
    }

    pub fn is_reconnect(&self) -> bool {
        self.reconnected.unwrap_or(false)
    }
}

/// Why a connection lost its binding without asking for it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetachReason {
    /// Another connection attached to the same session
    Superseded,
    /// The session was killed from elsewhere
    Killed,
}

/// Server -> Client messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Created(CreateResult),
    /// Ack for `kill`
    Killed {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },
    /// The bound session's process terminated
    Exit { exit_code: i32 },
    Detached {
        session_id: String,
        reason: DetachReason,
    },
    Error { message: String },
    Sessions { sessions: Vec<SessionSummary> },
    Pong,
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(bytes) => serializer.serialize_some(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded: Option<String> = Option::deserialize(deserializer)?;
        encoded
            .map(|s| STANDARD.decode(s).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_defaults_when_fields_are_omitted() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"create"}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Create {
                session_id: None,
                request_buffer: false,
                size: None,
            }
        );
    }

    #[test]
    fn created_carries_binary_snapshot() {
        let reply = ServerMessage::Created(CreateResult::attached(
            "main".into(),
            true,
            Some(vec![0x1b, b'[', b'H', 0xff]),
        ));
        let text = serde_json::to_string(&reply).unwrap();
        assert!(text.contains(r#""type":"created""#));
        assert!(text.contains(r#""reconnected":true"#));

        let back: ServerMessage = serde_json::from_str(&text).unwrap();
        assert_eq!(back, reply);
    }

    #[test]
    fn failed_create_omits_attach_fields() {
        let reply = ServerMessage::Created(CreateResult::failed("main".into(), "no such shell"));
        let value = serde_json::to_value(&reply).unwrap();
        assert_eq!(value["success"], false);
        assert_eq!(value["error"], "no such shell");
        assert!(value.get("reconnected").is_none());
        assert!(value.get("buffer").is_none());
    }

    #[test]
    fn kill_target_is_optional() {
        let bare: ClientMessage = serde_json::from_str(r#"{"type":"kill"}"#).unwrap();
        assert_eq!(bare, ClientMessage::Kill { session_id: None });
        assert_eq!(
            serde_json::to_string(&bare).unwrap(),
            r#"{"type":"kill"}"#
        );
        assert_eq!(
            serde_json::to_string(&ClientMessage::kill("main")).unwrap(),
            r#"{"type":"kill","session_id":"main"}"#
        );
    }

    #[test]
    fn unit_variants_are_tagged() {
        assert_eq!(
            serde_json::to_string(&ClientMessage::Ping).unwrap(),
            r#"{"type":"ping"}"#
        );
        let detached: ServerMessage = serde_json::from_str(
            r#"{"type":"detached","session_id":"main","reason":"superseded"}"#,
        )
        .unwrap();
        assert_eq!(
            detached,
            ServerMessage::Detached {
                session_id: "main".into(),
                reason: DetachReason::Superseded,
            }
        );
    }
}
