use reqwest::multipart::{Form, Part};
use reqwest::{Client as HttpClient, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::AppError;
use crate::models::{EditMessageRequest, Message, NewAttachment, ReactionRequest, UnsendRequest};

/// Client for the messaging service's REST endpoints.
///
/// A bearer token is attached when present; the cookie store is always on so
/// same-origin cookie credentials work without a token.
#[derive(Clone)]
pub struct MessagesApi {
    http: HttpClient,
    base_url: String,
    token: Option<String>,
}

impl MessagesApi {
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self, AppError> {
        let http = HttpClient::builder().cookie_store(true).build().map_err(AppError::Network)?;
        Ok(Self { http, base_url: base_url.trim_end_matches('/').to_string(), token })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn with_auth(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(t) => req.bearer_auth(t),
            None => req,
        }
    }

    /// GET `/messages/by-ticket/?ticket_id=`. A 404 means "no messages yet".
    pub async fn fetch_messages(&self, ticket_id: &str) -> Result<Vec<Message>, AppError> {
        let req = self
            .http
            .get(self.endpoint("/messages/by-ticket/"))
            .query(&[("ticket_id", ticket_id)]);
        match self.send_json(req).await {
            Err(e) if e.is_not_found() => {
                debug!("No messages yet for ticket {ticket_id}");
                Ok(Vec::new())
            }
            other => other,
        }
    }

    /// POST `/messages/` as multipart (`ticket_id`, `message`, `attachments`).
    pub async fn send_message(
        &self,
        ticket_id: &str,
        body: Option<&str>,
        attachments: Vec<NewAttachment>,
    ) -> Result<Message, AppError> {
        let mut form = Form::new().text("ticket_id", ticket_id.to_string());
        if let Some(body) = body {
            form = form.text("message", body.to_string());
        }
        for file in attachments {
            let part = Part::bytes(file.bytes)
                .file_name(file.filename)
                .mime_str(&file.content_type)
                .map_err(|e| AppError::decode("attachment content type", e))?;
            form = form.part("attachments", part);
        }
        self.send_json(self.http.post(self.endpoint("/messages/")).multipart(form)).await
    }

    /// PUT `/messages/{id}/`
    pub async fn edit_message(&self, message_id: &str, body: &str) -> Result<Message, AppError> {
        let req = self
            .http
            .put(self.endpoint(&format!("/messages/{message_id}/")))
            .json(&EditMessageRequest { message: body });
        self.send_json(req).await
    }

    /// DELETE `/messages/{id}/`
    pub async fn delete_message(&self, message_id: &str) -> Result<(), AppError> {
        let req = self.http.delete(self.endpoint(&format!("/messages/{message_id}/")));
        self.send(req).await.map(|_| ())
    }

    /// POST `/messages/{id}/unsend/`
    pub async fn unsend_message(
        &self,
        message_id: &str,
        for_all: bool,
    ) -> Result<Message, AppError> {
        let req = self
            .http
            .post(self.endpoint(&format!("/messages/{message_id}/unsend/")))
            .json(&UnsendRequest { for_all });
        self.send_json(req).await
    }

    /// POST `/reactions/add/`
    pub async fn add_reaction(
        &self,
        message_id: &str,
        reaction: &str,
    ) -> Result<Message, AppError> {
        self.post_reaction("/reactions/add/", message_id, reaction).await
    }

    /// POST `/reactions/remove/`
    pub async fn remove_reaction(
        &self,
        message_id: &str,
        reaction: &str,
    ) -> Result<Message, AppError> {
        self.post_reaction("/reactions/remove/", message_id, reaction).await
    }

    /// GET `/attachments/{id}/download/`. Returns the raw file bytes.
    pub async fn download_attachment(&self, attachment_id: &str) -> Result<Vec<u8>, AppError> {
        let req = self.http.get(self.endpoint(&format!("/attachments/{attachment_id}/download/")));
        let resp = self.send(req).await?;
        Ok(resp.bytes().await?.to_vec())
    }

    // ── Helpers ──────────────────────────────────────────────────────────────

    async fn post_reaction(
        &self,
        path: &str,
        message_id: &str,
        reaction: &str,
    ) -> Result<Message, AppError> {
        let req = self
            .http
            .post(self.endpoint(path))
            .json(&ReactionRequest { message_id, reaction });
        self.send_json(req).await
    }

    async fn send(&self, req: RequestBuilder) -> Result<Response, AppError> {
        let resp = self.with_auth(req).send().await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let text = resp.text().await.unwrap_or_default();
        let message = error_message(status, &text);
        warn!("Request failed with {status}: {message}");
        Err(AppError::Http { status: status.as_u16(), message })
    }

    async fn send_json<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, AppError> {
        let resp = self.send(req).await?;
        let text = resp.text().await?;
        serde_json::from_str(&text).map_err(|e| AppError::decode("response body", e))
    }
}

/// Best-effort human message from an error response body.
pub(crate) fn error_message(status: StatusCode, body: &str) -> String {
    if let Ok(json) = serde_json::from_str::<Value>(body) {
        let found = json
            .get("detail")
            .or_else(|| json.get("error"))
            .or_else(|| json.get("message"))
            .and_then(|v| v.as_str());
        if let Some(msg) = found {
            return msg.to_string();
        }
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        status.canonical_reason().unwrap_or("Request failed").to_string()
    } else {
        trimmed.to_string()
    }
}
