use std::collections::{BTreeSet, HashSet};

use crate::models::{ConnectionState, Message, Reaction};

/// Everything one ticket view shows: the message list plus ephemeral
/// presence and typing sets.
///
/// Both the HTTP completion path and the WebSocket dispatch path mutate this
/// through the methods below, which keep message ids unique.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TicketState {
    pub local_user: String,
    pub messages: Vec<Message>,
    pub typing_users: BTreeSet<String>,
    pub online_users: BTreeSet<String>,
    pub connection: ConnectionState,
    pub error: Option<String>,
}

impl TicketState {
    pub fn new(local_user: impl Into<String>) -> Self {
        Self { local_user: local_user.into(), ..Default::default() }
    }

    pub fn message(&self, id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.messages.iter().position(|m| m.id == id)
    }

    fn is_self(&self, user: &str) -> bool {
        user == self.local_user
    }

    // ── Messages ─────────────────────────────────────────────────────────────

    /// Appends `message` unless an entry with the same id already exists.
    /// Whichever of the HTTP response and the WebSocket echo arrives first
    /// wins; the other is a no-op. Returns whether the list changed.
    pub fn upsert_message(&mut self, message: Message) -> bool {
        if self.position(&message.id).is_some() {
            return false;
        }
        self.messages.push(message);
        true
    }

    /// Replaces the entry with the same id. Unknown ids are ignored.
    pub fn replace_message(&mut self, message: Message) -> bool {
        match self.position(&message.id) {
            Some(idx) if self.messages[idx] != message => {
                self.messages[idx] = message;
                true
            }
            _ => false,
        }
    }

    pub fn remove_message(&mut self, id: &str) -> bool {
        let before = self.messages.len();
        self.messages.retain(|m| m.id != id);
        self.messages.len() != before
    }

    pub fn set_reactions(&mut self, message_id: &str, reactions: Vec<Reaction>) -> bool {
        match self.position(message_id) {
            Some(idx) if self.messages[idx].reactions != reactions => {
                self.messages[idx].reactions = reactions;
                true
            }
            _ => false,
        }
    }

    /// Installs fetched history, keeping live entries that arrived while the
    /// fetch was in flight and are not part of it yet.
    pub fn merge_history(&mut self, history: Vec<Message>) -> bool {
        let known: HashSet<&str> = history.iter().map(|m| m.id.as_str()).collect();
        let mut seen = HashSet::new();
        let mut merged: Vec<Message> = Vec::with_capacity(history.len() + self.messages.len());
        for m in &history {
            if seen.insert(m.id.clone()) {
                merged.push(m.clone());
            }
        }
        for m in &self.messages {
            if !known.contains(m.id.as_str()) && seen.insert(m.id.clone()) {
                merged.push(m.clone());
            }
        }
        if merged == self.messages {
            return false;
        }
        self.messages = merged;
        true
    }

    // ── Typing / presence ────────────────────────────────────────────────────

    pub fn set_typing(&mut self, user: &str, typing: bool) -> bool {
        if self.is_self(user) {
            return false;
        }
        if typing {
            self.typing_users.insert(user.to_string())
        } else {
            self.typing_users.remove(user)
        }
    }

    pub fn set_online(&mut self, user: &str, online: bool) -> bool {
        if self.is_self(user) {
            return false;
        }
        if online {
            self.online_users.insert(user.to_string())
        } else {
            self.online_users.remove(user)
        }
    }

    pub fn replace_online(&mut self, users: Vec<String>) -> bool {
        let next: BTreeSet<String> = users.into_iter().filter(|u| !self.is_self(u)).collect();
        if next == self.online_users {
            return false;
        }
        self.online_users = next;
        true
    }

    pub fn user_left(&mut self, user: &str) -> bool {
        let was_online = self.online_users.remove(user);
        let was_typing = self.typing_users.remove(user);
        was_online || was_typing
    }

    pub fn set_error(&mut self, error: Option<String>) -> bool {
        if self.error == error {
            return false;
        }
        self.error = error;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(id: &str, body: &str) -> Message {
        Message::new(id, "t1", "alice", Some(body.to_string()))
    }

    #[test]
    fn http_then_ws_keeps_one_entry() {
        let mut state = TicketState::new("me");
        let sent = msg("9", "hello");
        assert!(state.upsert_message(sent.clone()));
        assert!(!state.upsert_message(sent));
        assert_eq!(state.messages.len(), 1);
    }

    #[test]
    fn first_arrival_wins() {
        let mut state = TicketState::new("me");
        let mut edited = msg("9", "hello world");
        edited.is_edited = true;
        state.upsert_message(edited.clone());
        state.upsert_message(msg("9", "hello"));
        assert_eq!(state.message("9"), Some(&edited));
    }

    #[test]
    fn replace_ignores_unknown_ids() {
        let mut state = TicketState::new("me");
        assert!(!state.replace_message(msg("1", "x")));
        assert!(state.messages.is_empty());
    }

    #[test]
    fn merge_history_keeps_live_messages() {
        let mut state = TicketState::new("me");
        state.upsert_message(msg("3", "live"));
        state.upsert_message(msg("2", "live copy"));

        assert!(state.merge_history(vec![msg("1", "a"), msg("2", "b")]));
        let ids: Vec<&str> = state.messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
        assert_eq!(state.message("2").and_then(|m| m.body.as_deref()), Some("b"));
    }

    #[test]
    fn merge_history_drops_duplicate_ids_from_server() {
        let mut state = TicketState::new("me");
        state.merge_history(vec![msg("1", "a"), msg("1", "again")]);
        assert_eq!(state.messages.len(), 1);
    }

    #[test]
    fn self_is_never_tracked() {
        let mut state = TicketState::new("me");
        assert!(!state.set_typing("me", true));
        assert!(!state.set_online("me", true));
        state.replace_online(vec!["me".into(), "bob".into()]);
        assert!(state.typing_users.is_empty());
        assert_eq!(state.online_users.iter().collect::<Vec<_>>(), vec!["bob"]);
    }

    #[test]
    fn user_left_clears_both_sets() {
        let mut state = TicketState::new("me");
        state.set_online("bob", true);
        state.set_typing("bob", true);
        assert!(state.user_left("bob"));
        assert!(state.online_users.is_empty());
        assert!(state.typing_users.is_empty());
        assert!(!state.user_left("bob"));
    }
}
