use thiserror::Error;

/// Top-level client error.
/// All variants carry a human-readable message for display/logging.
#[derive(Debug, Error)]
pub enum AppError {
    // ── Configuration errors ─────────────────────────────────────────────────
    #[error("Missing configuration value: {name}")]
    MissingConfig { name: String },

    #[error("Invalid configuration value {name}: {reason}")]
    InvalidConfig { name: String, reason: String },

    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    // ── HTTP errors ──────────────────────────────────────────────────────────
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[source] reqwest::Error),

    #[error("Failed to decode {what}: {message}")]
    Decode { what: String, message: String },

    // ── WebSocket errors ─────────────────────────────────────────────────────
    #[error("WebSocket error: {0}")]
    WebSocket(#[source] tokio_tungstenite::tungstenite::Error),

    // ── Validation errors ────────────────────────────────────────────────────
    #[error("Field '{field_name}' cannot be empty")]
    EmptyField { field_name: String },

    #[error("Field '{field_name}' exceeds max length of {max_length} (actual: {actual_length})")]
    FieldTooLong {
        field_name: String,
        max_length: usize,
        actual_length: usize,
    },

    #[error("A message needs a body or at least one attachment")]
    EmptyMessage,

    // ── Session errors ───────────────────────────────────────────────────────
    #[error("Session for ticket '{ticket_id}' is closed")]
    SessionClosed { ticket_id: String },

    // ── System errors ────────────────────────────────────────────────────────
    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn decode(what: impl Into<String>, err: impl std::fmt::Display) -> Self {
        AppError::Decode { what: what.into(), message: err.to_string() }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, AppError::Http { status: 404, .. })
    }

    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            AppError::EmptyField { .. } | AppError::FieldTooLong { .. } | AppError::EmptyMessage
        )
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, AppError::Network(_) | AppError::WebSocket(_))
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            AppError::decode("response body", err)
        } else {
            AppError::Network(err)
        }
    }
}
