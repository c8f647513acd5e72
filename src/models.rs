use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// A message in a ticket's thread, as returned by the messaging service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(deserialize_with = "opaque_id")]
    pub id: String,
    #[serde(default, alias = "ticket_id", deserialize_with = "opaque_id")]
    pub ticket: String,
    #[serde(default)]
    pub sender: String,
    /// Absent for attachment-only messages.
    #[serde(rename = "message", default)]
    pub body: Option<String>,
    #[serde(default)]
    pub is_edited: bool,
    #[serde(default)]
    pub is_unsent: bool,
    #[serde(default)]
    pub unsent_for_all: bool,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub reactions: Vec<Reaction>,
    /// Stamped with the receive time when the server leaves it out.
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(
        id: impl Into<String>,
        ticket: impl Into<String>,
        sender: impl Into<String>,
        body: Option<String>,
    ) -> Self {
        Self {
            id: id.into(),
            ticket: ticket.into(),
            sender: sender.into(),
            body,
            is_edited: false,
            is_unsent: false,
            unsent_for_all: false,
            attachments: Vec::new(),
            reactions: Vec::new(),
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    #[serde(deserialize_with = "opaque_id")]
    pub id: String,
    pub filename: String,
    #[serde(default, alias = "file_size")]
    pub size: u64,
    #[serde(default, alias = "file_type")]
    pub content_type: String,
    #[serde(default, alias = "file_url")]
    pub url: String,
}

/// A reaction is keyed by the reacting user's display name, not a stable id.
/// Two users sharing a display name are indistinguishable here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reaction {
    #[serde(alias = "emoji")]
    pub reaction: String,
    #[serde(alias = "username")]
    pub user: String,
}

/// A file to upload alongside a new message.
#[derive(Debug, Clone)]
pub struct NewAttachment {
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Connected => "Connected",
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Offline,
}

// ── HTTP request bodies ──────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct EditMessageRequest<'a> {
    pub message: &'a str,
}

#[derive(Debug, Serialize)]
pub struct UnsendRequest {
    pub for_all: bool,
}

#[derive(Debug, Serialize)]
pub struct ReactionRequest<'a> {
    pub message_id: &'a str,
    pub reaction: &'a str,
}

/// Accepts ids sent either as JSON strings or integers.
pub(crate) fn opaque_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Number(i64),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Text(s) => s,
        RawId::Number(n) => n.to_string(),
    })
}
