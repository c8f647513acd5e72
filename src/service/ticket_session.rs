use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info};

use crate::api::MessagesApi;
use crate::config::ClientConfig;
use crate::errors::AppError;
use crate::models::{ConnectionState, Message, NewAttachment};
use crate::state::TicketState;
use crate::ws::connection::{ticket_socket_url, ConnectionManager};
use crate::ws::driver::{Command, ConnectionHandle};

const MAX_MESSAGE_LENGTH: usize = 8000;

/// One ticket's conversation: REST calls, the live channel and the single
/// state owner both paths write into.
///
/// HTTP calls never depend on the channel being connected.
pub struct TicketSession {
    api: MessagesApi,
    ticket_id: String,
    ws_base_url: String,
    auth_token: Option<String>,
    state: Arc<watch::Sender<TicketState>>,
    connection: ConnectionHandle,
}

impl TicketSession {
    /// Must be called from within a tokio runtime.
    pub fn new(config: &ClientConfig, ticket_id: impl Into<String>) -> Result<Self, AppError> {
        let api = MessagesApi::new(&config.api_base_url, config.auth_token.clone())?;
        let (tx, _) = watch::channel(TicketState::new(config.user.clone()));
        let state = Arc::new(tx);
        let manager = ConnectionManager::new(
            config.ws_base_url.clone(),
            config.user.clone(),
            config.connection,
        );
        let connection = ConnectionHandle::spawn(manager, state.clone());

        Ok(Self {
            api,
            ticket_id: ticket_id.into(),
            ws_base_url: config.ws_base_url.clone(),
            auth_token: config.auth_token.clone(),
            state,
            connection,
        })
    }

    pub fn ticket_id(&self) -> &str {
        &self.ticket_id
    }

    pub fn snapshot(&self) -> TicketState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<TicketState> {
        self.state.subscribe()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.state.borrow().connection
    }

    // ── Live channel ─────────────────────────────────────────────────────────

    pub fn connect(&self) -> Result<(), AppError> {
        ticket_socket_url(&self.ws_base_url, &self.ticket_id, self.auth_token.as_deref())?;
        self.command(Command::Connect {
            ticket_id: self.ticket_id.clone(),
            token: self.auth_token.clone(),
        })
    }

    pub fn disconnect(&self) -> Result<(), AppError> {
        self.command(Command::Disconnect)
    }

    pub fn reconnect(&self) -> Result<(), AppError> {
        self.command(Command::Reconnect)
    }

    pub fn start_typing(&self) -> Result<(), AppError> {
        self.command(Command::StartTyping)
    }

    pub fn stop_typing(&self) -> Result<(), AppError> {
        self.command(Command::StopTyping)
    }

    /// Closes the channel and waits for the connection task to finish.
    pub async fn shutdown(self) {
        info!("Closing session for ticket {}", self.ticket_id);
        self.connection.shutdown().await;
    }

    fn command(&self, command: Command) -> Result<(), AppError> {
        if self.connection.send(command) {
            Ok(())
        } else {
            Err(AppError::SessionClosed { ticket_id: self.ticket_id.clone() })
        }
    }

    // ── Messages ─────────────────────────────────────────────────────────────

    /// Fetches the thread history and merges it into the live list.
    pub async fn load_messages(&self) -> Result<Vec<Message>, AppError> {
        let history = self.api.fetch_messages(&self.ticket_id).await?;
        debug!("Fetched {} messages for ticket {}", history.len(), self.ticket_id);
        self.state.send_if_modified(|s| s.merge_history(history));
        Ok(self.state.borrow().messages.clone())
    }

    pub async fn send_message(
        &self,
        body: Option<&str>,
        attachments: Vec<NewAttachment>,
    ) -> Result<Message, AppError> {
        let body = body.map(str::trim).filter(|b| !b.is_empty());
        if body.is_none() && attachments.is_empty() {
            return Err(AppError::EmptyMessage);
        }
        if let Some(text) = body {
            check_length(text)?;
        }

        self.stop_typing()?;
        let message = self.api.send_message(&self.ticket_id, body, attachments).await?;
        self.state.send_if_modified(|s| s.upsert_message(message.clone()));
        Ok(message)
    }

    pub async fn edit_message(&self, message_id: &str, body: &str) -> Result<Message, AppError> {
        let body = body.trim();
        if body.is_empty() {
            return Err(AppError::EmptyField { field_name: "message".to_string() });
        }
        check_length(body)?;

        let message = self.api.edit_message(message_id, body).await?;
        self.state.send_if_modified(|s| s.replace_message(message.clone()));
        Ok(message)
    }

    pub async fn delete_message(&self, message_id: &str) -> Result<(), AppError> {
        self.api.delete_message(message_id).await?;
        self.state.send_if_modified(|s| s.remove_message(message_id));
        Ok(())
    }

    pub async fn unsend_message(
        &self,
        message_id: &str,
        for_all: bool,
    ) -> Result<Message, AppError> {
        let message = self.api.unsend_message(message_id, for_all).await?;
        self.state.send_if_modified(|s| s.replace_message(message.clone()));
        Ok(message)
    }

    pub async fn add_reaction(
        &self,
        message_id: &str,
        reaction: &str,
    ) -> Result<Message, AppError> {
        check_reaction(reaction)?;
        let message = self.api.add_reaction(message_id, reaction).await?;
        self.state.send_if_modified(|s| s.replace_message(message.clone()));
        Ok(message)
    }

    pub async fn remove_reaction(
        &self,
        message_id: &str,
        reaction: &str,
    ) -> Result<Message, AppError> {
        check_reaction(reaction)?;
        let message = self.api.remove_reaction(message_id, reaction).await?;
        self.state.send_if_modified(|s| s.replace_message(message.clone()));
        Ok(message)
    }

    pub async fn download_attachment(&self, attachment_id: &str) -> Result<Vec<u8>, AppError> {
        self.api.download_attachment(attachment_id).await
    }
}

fn check_length(body: &str) -> Result<(), AppError> {
    let length = body.chars().count();
    if length > MAX_MESSAGE_LENGTH {
        return Err(AppError::FieldTooLong {
            field_name: "message".to_string(),
            max_length: MAX_MESSAGE_LENGTH,
            actual_length: length,
        });
    }
    Ok(())
}

fn check_reaction(reaction: &str) -> Result<(), AppError> {
    if reaction.trim().is_empty() {
        return Err(AppError::EmptyField { field_name: "reaction".to_string() });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ClientConfig {
        ClientConfig::new("http://127.0.0.1:9/api", "me").expect("config")
    }

    #[tokio::test]
    async fn blank_message_is_rejected_before_any_request() {
        let session = TicketSession::new(&config(), "1").expect("session");
        let err = session.send_message(Some("   "), Vec::new()).await.unwrap_err();
        assert!(matches!(err, AppError::EmptyMessage));
        assert!(session.snapshot().messages.is_empty());
    }

    #[tokio::test]
    async fn oversized_message_is_rejected() {
        let session = TicketSession::new(&config(), "1").expect("session");
        let body = "x".repeat(MAX_MESSAGE_LENGTH + 1);
        let err = session.send_message(Some(&body), Vec::new()).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::FieldTooLong { actual_length, .. } if actual_length == MAX_MESSAGE_LENGTH + 1
        ));
    }

    #[tokio::test]
    async fn empty_reaction_is_rejected() {
        let session = TicketSession::new(&config(), "1").expect("session");
        assert!(session.add_reaction("5", " ").await.unwrap_err().is_validation());
    }

    #[tokio::test]
    async fn new_session_starts_disconnected() {
        let session = TicketSession::new(&config(), "1").expect("session");
        assert_eq!(session.connection_state(), ConnectionState::Disconnected);
        assert_eq!(session.snapshot().local_user, "me");
        session.disconnect().expect("disconnect");
        session.disconnect().expect("disconnect twice");
        session.shutdown().await;
    }
}
