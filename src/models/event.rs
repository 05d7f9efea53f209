//! Event models for the WebSocket protocol and HTTP API.

use serde::{Deserialize, Serialize};
use validator::Validate;

use super::message::{Attachment, Message, MessageType};
use super::presence::{ConnectionId, MessageId, Role, UserId};

pub const MAX_BODY_CHARS: u64 = 5000;

/// WebSocket client message, tagged by `event`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum ClientMessage {
    Register { data: RegisterPayload },
    VisibilityChange { data: VisibilityPayload },
    Heartbeat,
    SendMessage { data: SendMessagePayload },
    MarkSeen { data: MarkSeenPayload },
    Typing { data: TypingPayload },
    GetVisitorCount,
    GetOnlineUsers,
    Ping,
}

impl ClientMessage {
    /// Wire names of every inbound event.
    pub const EVENTS: [&'static str; 9] = [
        "register",
        "visibilityChange",
        "heartbeat",
        "sendMessage",
        "markSeen",
        "typing",
        "getVisitorCount",
        "getOnlineUsers",
        "ping",
    ];

    pub fn is_known_event(name: &str) -> bool {
        Self::EVENTS.contains(&name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterPayload {
    pub user_id: UserId,
    #[serde(default)]
    pub role: Option<Role>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisibilityPayload {
    pub is_visible: bool,
}

/// Fields default to empty so a missing recipient reaches validation instead of
/// failing to parse (and being dropped silently).
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SendMessagePayload {
    #[serde(default)]
    #[validate(length(min = 1, message = "senderId required"))]
    pub sender_id: UserId,
    #[serde(default)]
    #[validate(length(min = 1, message = "recipientId required"))]
    pub recipient_id: UserId,
    #[serde(default)]
    #[validate(length(max = MAX_BODY_CHARS, message = "message body too long"))]
    pub body: String,
    #[serde(default)]
    pub message_type: Option<MessageType>,
    #[serde(default)]
    pub attachment: Option<Attachment>,
    #[serde(default)]
    pub client_temp_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkSeenPayload {
    pub viewer_id: UserId,
    pub other_party_id: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    pub sender_id: UserId,
    pub recipient_id: UserId,
    pub is_typing: bool,
}

/// Event pushed from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    ConnectionEstablished {
        connection_id: ConnectionId,
    },
    VisitorCount {
        count: usize,
    },
    UserOnline {
        user_id: UserId,
        online: bool,
    },
    OnlineUsers {
        users: Vec<UserId>,
    },
    MessageSent {
        client_temp_id: Option<String>,
        message: Message,
    },
    MessageDelivered {
        message_ids: Vec<MessageId>,
    },
    MessagesSeen {
        by: UserId,
        message_ids: Vec<MessageId>,
    },
    NewMessage {
        message: Message,
    },
    UserTyping {
        user_id: UserId,
        is_typing: bool,
    },
    Error {
        code: String,
        message: String,
        client_temp_id: Option<String>,
    },
    Pong,
}

impl ServerEvent {
    pub fn error(code: &str, message: impl Into<String>, client_temp_id: Option<String>) -> Self {
        ServerEvent::Error {
            code: code.to_string(),
            message: message.into(),
            client_temp_id,
        }
    }

    /// Wire form. Serializing these plain structs cannot fail.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Payload for `POST /api/events/order`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderEventRequest {
    #[serde(default)]
    pub order_id: Option<String>,
}
