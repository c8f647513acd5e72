use std::time::Duration;

use url::Url;

use crate::errors::AppError;
use crate::ws::backoff::ReconnectPolicy;
use crate::ws::connection::ConnectionSettings;

const DEFAULT_API_BASE_URL: &str = "http://localhost:8000/api";
const MAX_HEARTBEAT_SECS: u64 = 3600;
const MAX_TYPING_TIMEOUT_MS: u64 = 60_000;

/// Client configuration, read from the environment (after `.env`).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_base_url: String,
    pub ws_base_url: String,
    pub auth_token: Option<String>,
    pub user: String,
    pub connection: ConnectionSettings,
}

impl ClientConfig {
    pub fn new(api_base_url: &str, user: &str) -> Result<Self, AppError> {
        Ok(Self {
            api_base_url: api_base_url.to_string(),
            ws_base_url: derive_ws_base(api_base_url)?,
            auth_token: None,
            user: user.to_string(),
            connection: ConnectionSettings::default(),
        })
    }

    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup, so tests need not touch the
    /// process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let api_base_url = lookup("TICKET_API_BASE_URL")
            .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string());
        let ws_base_url = match lookup("TICKET_WS_BASE_URL") {
            Some(url) => url,
            None => derive_ws_base(&api_base_url)?,
        };
        let user = lookup("TICKET_USER")
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| AppError::MissingConfig { name: "TICKET_USER".to_string() })?;
        let auth_token = lookup("TICKET_AUTH_TOKEN").filter(|t| !t.is_empty());

        let defaults = ConnectionSettings::default();
        let heartbeat_interval = bounded(&lookup, "TICKET_HEARTBEAT_SECS", MAX_HEARTBEAT_SECS)?
            .map(Duration::from_secs)
            .unwrap_or(defaults.heartbeat_interval);
        let typing_timeout = bounded(&lookup, "TICKET_TYPING_TIMEOUT_MS", MAX_TYPING_TIMEOUT_MS)?
            .map(Duration::from_millis)
            .unwrap_or(defaults.typing_timeout);
        let max_attempts = match lookup("TICKET_MAX_RECONNECT_ATTEMPTS") {
            Some(raw) => raw.trim().parse().map_err(|e| AppError::InvalidConfig {
                name: "TICKET_MAX_RECONNECT_ATTEMPTS".to_string(),
                reason: format!("'{raw}': {e}"),
            })?,
            None => defaults.reconnect.max_attempts,
        };

        Ok(Self {
            api_base_url,
            ws_base_url,
            auth_token,
            user,
            connection: ConnectionSettings {
                heartbeat_interval,
                typing_timeout,
                reconnect: ReconnectPolicy { max_attempts, ..defaults.reconnect },
            },
        })
    }
}

/// Reads a positive integer no larger than `max`. Unset means "use the default".
fn bounded(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    max: u64,
) -> Result<Option<u64>, AppError> {
    let Some(raw) = lookup(name) else {
        return Ok(None);
    };
    let invalid = |reason: String| AppError::InvalidConfig { name: name.to_string(), reason };
    let value: u64 = raw.trim().parse().map_err(|e| invalid(format!("'{raw}': {e}")))?;
    if value == 0 || value > max {
        return Err(invalid(format!("{value} is outside 1..={max}")));
    }
    Ok(Some(value))
}

/// `http://host:port/api` → `ws://host:port` (and `https` → `wss`).
pub fn derive_ws_base(api_base_url: &str) -> Result<String, AppError> {
    let invalid = |reason: String| AppError::InvalidUrl { url: api_base_url.to_string(), reason };
    let url = Url::parse(api_base_url).map_err(|e| invalid(e.to_string()))?;
    let scheme = match url.scheme() {
        "https" => "wss",
        "http" => "ws",
        other => return Err(invalid(format!("unsupported scheme '{other}'"))),
    };
    let host = url.host_str().ok_or_else(|| invalid("missing host".to_string()))?;
    Ok(match url.port() {
        Some(port) => format!("{scheme}://{host}:{port}"),
        None => format!("{scheme}://{host}"),
    })
}
