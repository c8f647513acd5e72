use serde::{Deserialize, Serialize};

use crate::errors::AppError;
use crate::models::{opaque_id, Message, PresenceStatus, Reaction};

/// WebSocket event received from the messaging service (internally tagged).
///
/// Several event names are aliases of one another on the wire; they share a
/// variant because they produce the same state transition.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "connection_established")]
    ConnectionEstablished,
    #[serde(rename = "new_message", alias = "message_sent")]
    NewMessage { message: Message },
    #[serde(rename = "message_edited")]
    MessageEdited { message: Message },
    #[serde(rename = "message_deleted")]
    MessageDeleted {
        #[serde(deserialize_with = "opaque_id")]
        message_id: String,
    },
    #[serde(rename = "message_unsent")]
    MessageUnsent { message: Message },
    #[serde(rename = "reaction_added")]
    ReactionAdded {
        #[serde(deserialize_with = "opaque_id")]
        message_id: String,
        #[serde(default)]
        reactions: Vec<Reaction>,
    },
    #[serde(rename = "reaction_removed")]
    ReactionRemoved {
        #[serde(deserialize_with = "opaque_id")]
        message_id: String,
        #[serde(default)]
        reactions: Vec<Reaction>,
    },
    #[serde(rename = "user_typing", alias = "typing_indicator")]
    Typing {
        user: String,
        #[serde(default)]
        is_typing: Option<bool>,
    },
    #[serde(rename = "presence_update", alias = "user_joined")]
    Presence {
        #[serde(default)]
        user: Option<String>,
        #[serde(default)]
        status: Option<PresenceStatus>,
        #[serde(default)]
        users: Option<Vec<String>>,
    },
    #[serde(rename = "user_left")]
    UserLeft { user: String },
    #[serde(rename = "pong")]
    Pong,
    #[serde(rename = "error")]
    Error {
        #[serde(default, alias = "error", alias = "detail")]
        message: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

impl ServerEvent {
    /// Parses one text frame.
    pub fn decode(text: &str) -> Result<Self, AppError> {
        serde_json::from_str(text).map_err(|e| AppError::decode("websocket frame", e))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ServerEvent::ConnectionEstablished => "connection_established",
            ServerEvent::NewMessage { .. } => "new_message",
            ServerEvent::MessageEdited { .. } => "message_edited",
            ServerEvent::MessageDeleted { .. } => "message_deleted",
            ServerEvent::MessageUnsent { .. } => "message_unsent",
            ServerEvent::ReactionAdded { .. } => "reaction_added",
            ServerEvent::ReactionRemoved { .. } => "reaction_removed",
            ServerEvent::Typing { .. } => "user_typing",
            ServerEvent::Presence { .. } => "presence_update",
            ServerEvent::UserLeft { .. } => "user_left",
            ServerEvent::Pong => "pong",
            ServerEvent::Error { .. } => "error",
            ServerEvent::Unknown => "unknown",
        }
    }
}

/// Command sent by the client. No acknowledgement is awaited.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    TypingStart { user: String },
    TypingStop { user: String },
    Ping,
}

impl ClientCommand {
    pub fn encode(&self) -> Result<String, AppError> {
        serde_json::to_string(self)
            .map_err(|e| AppError::Unexpected(format!("Failed to encode command: {e}")))
    }
}
