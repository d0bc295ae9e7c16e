use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientMessage {
    Authenticate {
        token: String,
    },
    Ping,
    JoinRoom {
        room_id: String,
    },
    LeaveRoom {
        room_id: String,
    },
    BroadcastMessage {
        room_id: String,
        message: String,
    },
    CollaborationOperation {
        room_id: String,
        operation: serde_json::Value,
    },
    CursorUpdate {
        room_id: String,
        position: serde_json::Value,
    },
}

impl ClientMessage {
    /// Operation name used for performance samples and metrics labels.
    pub fn operation_name(&self) -> &'static str {
        match self {
            Self::Authenticate { .. } => "authenticate",
            Self::Ping => "ping",
            Self::JoinRoom { .. } => "join_room",
            Self::LeaveRoom { .. } => "leave_room",
            Self::BroadcastMessage { .. } => "broadcast_message",
            Self::CollaborationOperation { .. } => "collaboration_operation",
            Self::CursorUpdate { .. } => "cursor_update",
        }
    }
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Connected {
        message: String,
    },
    Authenticated {
        user_id: String,
    },
    AuthError {
        message: String,
    },
    RoomJoined {
        room_id: String,
        participant_count: usize,
    },
    UserJoined {
        user_id: String,
        room_id: String,
        participant_count: usize,
    },
    RoomLeft {
        room_id: String,
    },
    UserLeft {
        user_id: String,
        room_id: String,
        participant_count: usize,
    },
    RoomMessage {
        user_id: String,
        room_id: String,
        message: String,
        timestamp: i64,
    },
    CollaborationUpdate {
        user_id: String,
        room_id: String,
        operation: serde_json::Value,
        timestamp: i64,
        operation_id: uuid::Uuid,
    },
    OperationConfirmed {
        room_id: String,
        operation_id: uuid::Uuid,
    },
    CursorMoved {
        user_id: String,
        room_id: String,
        position: serde_json::Value,
        timestamp: i64,
    },
    Pong {
        timestamp: i64,
    },
    Heartbeat,
    Error {
        code: String,
        message: String,
    },
}

impl ServerMessage {
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn connected() -> Self {
        Self::Connected {
            message: "Connected to collaboration hub".to_string(),
        }
    }
}

/// Outbound frame: either a message serialized at send time, or one
/// pre-serialized once and shared across a room fan-out.
#[derive(Debug, Clone)]
pub enum OutboundMessage {
    Raw(ServerMessage),
    Preserialized(Arc<str>),
}

impl OutboundMessage {
    pub fn preserialized(message: &ServerMessage) -> Result<Self, serde_json::Error> {
        let json = serde_json::to_string(message)?;
        Ok(Self::Preserialized(Arc::from(json.as_str())))
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        match self {
            Self::Raw(message) => serde_json::to_string(message),
            Self::Preserialized(json) => Ok(json.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_client_message_roundtrip() {
        let raw = r#"{"type":"join_room","payload":{"room_id":"song-42"}}"#;
        let msg: ClientMessage = serde_json::from_str(raw).unwrap();
        assert!(matches!(msg, ClientMessage::JoinRoom { ref room_id } if room_id == "song-42"));
    }

    #[test]
    fn test_client_ping_has_no_payload() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Ping));
        assert_eq!(msg.operation_name(), "ping");
    }

    #[test]
    fn test_client_operation_payload_is_opaque() {
        let raw = r#"{"type":"collaboration_operation","payload":{"room_id":"song-42","operation":{"op":"insert","pos":3}}}"#;
        let msg: ClientMessage = serde_json::from_str(raw).unwrap();
        match msg {
            ClientMessage::CollaborationOperation { operation, .. } => {
                assert_eq!(operation["op"], json!("insert"));
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_server_message_tags() {
        let msg = ServerMessage::RoomJoined {
            room_id: "song-42".to_string(),
            participant_count: 2,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""type":"room_joined""#));
        assert!(json.contains(r#""participant_count":2"#));
    }

    #[test]
    fn test_preserialized_matches_raw() {
        let msg = ServerMessage::Pong { timestamp: 123 };
        let raw = OutboundMessage::Raw(msg.clone()).to_json().unwrap();
        let pre = OutboundMessage::preserialized(&msg).unwrap().to_json().unwrap();
        assert_eq!(raw, pre);
    }
}
