use tracing::{debug, info, warn};

use crate::models::PresenceStatus;
use crate::state::TicketState;
use crate::ws::frames::ServerEvent;

/// Decodes one text frame and applies it. Malformed frames are logged and
/// leave the state untouched. Returns whether the state changed.
pub fn handle_text(state: &mut TicketState, text: &str) -> bool {
    match ServerEvent::decode(text) {
        Ok(event) => apply(state, event),
        Err(e) => {
            warn!("Dropping malformed frame: {e}");
            false
        }
    }
}

/// Applies one inbound event: at most one state mutation.
pub fn apply(state: &mut TicketState, event: ServerEvent) -> bool {
    debug!("Inbound {}", event.kind());
    match event {
        ServerEvent::ConnectionEstablished => {
            info!("Server confirmed the ticket channel");
            false
        }
        ServerEvent::NewMessage { message } => state.upsert_message(message),
        ServerEvent::MessageEdited { message } | ServerEvent::MessageUnsent { message } => {
            state.replace_message(message)
        }
        ServerEvent::MessageDeleted { message_id } => state.remove_message(&message_id),
        ServerEvent::ReactionAdded { message_id, reactions }
        | ServerEvent::ReactionRemoved { message_id, reactions } => {
            state.set_reactions(&message_id, reactions)
        }
        ServerEvent::Typing { user, is_typing } => {
            state.set_typing(&user, is_typing.unwrap_or(true))
        }
        ServerEvent::Presence { user, status, users } => match (users, user) {
            (Some(users), _) => state.replace_online(users),
            (None, Some(user)) => state.set_online(&user, status != Some(PresenceStatus::Offline)),
            (None, None) => {
                warn!("presence_update without user or users");
                false
            }
        },
        ServerEvent::UserLeft { user } => state.user_left(&user),
        ServerEvent::Pong => false,
        ServerEvent::Error { message } => {
            let message = message.unwrap_or_else(|| "Unknown server error".to_string());
            warn!("Server error frame: {message}");
            state.set_error(Some(message))
        }
        ServerEvent::Unknown => {
            warn!("Ignoring unrecognized frame type");
            false
        }
    }
}
