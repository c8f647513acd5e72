#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Multipart, Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc};

use ticket_messaging::models::{Attachment, Reaction};
use ticket_messaging::{ClientConfig, Message, TicketSession, TicketState};

pub const TOKEN: &str = "test-token";
const CLOSE_COMMAND: &str = "__close__";
const WAIT: Duration = Duration::from_secs(5);

/// In-memory stand-in for the messaging service: REST routes plus the
/// ticket WebSocket.
pub struct Store {
    messages: Mutex<Vec<Message>>,
    next_id: AtomicU64,
    pub echo_new_messages: AtomicBool,
    pub connections: AtomicUsize,
    events: broadcast::Sender<String>,
    inbound: mpsc::UnboundedSender<String>,
}

impl Store {
    fn next_id(&self) -> String {
        (self.next_id.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    fn broadcast(&self, frame: Value) {
        let _ = self.events.send(frame.to_string());
    }
}

pub struct MockBackend {
    pub addr: SocketAddr,
    pub store: Arc<Store>,
    inbound: tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>,
}

impl MockBackend {
    pub async fn start() -> Self {
        let (events, _) = broadcast::channel(64);
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let store = Arc::new(Store {
            messages: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
            echo_new_messages: AtomicBool::new(true),
            connections: AtomicUsize::new(0),
            events,
            inbound: inbound_tx,
        });

        let app = Router::new()
            .route("/api/messages/by-ticket/", get(list_messages))
            .route("/api/messages/", post(create_message))
            .route("/api/messages/{id}/", put(edit_message).delete(delete_message))
            .route("/api/messages/{id}/unsend/", post(unsend_message))
            .route("/api/reactions/add/", post(add_reaction))
            .route("/api/reactions/remove/", post(remove_reaction))
            .route("/api/attachments/{id}/download/", get(download_attachment))
            .route("/ws/tickets/{ticket_id}/", get(ticket_socket))
            .with_state(store.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve");
        });

        Self { addr, store, inbound: tokio::sync::Mutex::new(inbound_rx) }
    }

    pub fn config(&self, user: &str) -> ClientConfig {
        let mut config =
            ClientConfig::new(&format!("http://{}/api", self.addr), user).expect("config");
        config.auth_token = Some(TOKEN.to_string());
        config
    }

    pub fn broadcast(&self, frame: Value) {
        self.store.broadcast(frame);
    }

    /// Makes the server drop every live socket with code 1011.
    pub fn close_sockets(&self) {
        let _ = self.store.events.send(CLOSE_COMMAND.to_string());
    }

    pub fn seed(&self, message: Message) {
        self.store.messages.lock().unwrap().push(message);
    }

    pub fn connections(&self) -> usize {
        self.store.connections.load(Ordering::SeqCst)
    }

    /// Next text frame the client sent over the socket.
    pub async fn next_inbound(&self) -> String {
        let mut rx = self.inbound.lock().await;
        tokio::time::timeout(WAIT, rx.recv())
            .await
            .expect("inbound frame in time")
            .expect("inbound channel open")
    }

    /// Waits until a socket is subscribed to server events.
    pub async fn wait_for_listeners(&self, count: usize) {
        tokio::time::timeout(WAIT, async {
            while self.store.events.receiver_count() < count {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("socket listener in time");
    }
}

/// Waits until the session state satisfies `pred`.
pub async fn wait_for(
    session: &TicketSession,
    pred: impl FnMut(&TicketState) -> bool,
) -> TicketState {
    let mut rx = session.subscribe();
    let state = tokio::time::timeout(WAIT, rx.wait_for(pred))
        .await
        .expect("state in time")
        .expect("state owner alive");
    let snapshot = state.clone();
    snapshot
}

/// Broadcasts a presence marker and waits for it, so every frame sent
/// before it has been applied.
pub async fn settle(backend: &MockBackend, session: &TicketSession, marker: &str) {
    backend.broadcast(json!({ "type": "user_joined", "user": marker }));
    wait_for(session, |s| s.online_users.contains(marker)).await;
}

// ── Handlers ─────────────────────────────────────────────────────────────────

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == format!("Bearer {TOKEN}"))
}

fn detail(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "detail": message }))).into_response()
}

fn not_found() -> Response {
    detail(StatusCode::NOT_FOUND, "No Message matches the given query.")
}

async fn list_messages(
    State(store): State<Arc<Store>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let ticket = params.get("ticket_id").cloned().unwrap_or_default();
    if ticket == "missing" {
        return detail(StatusCode::NOT_FOUND, "Not found.");
    }
    let messages: Vec<Message> =
        store.messages.lock().unwrap().iter().filter(|m| m.ticket == ticket).cloned().collect();
    Json(messages).into_response()
}

async fn create_message(
    State(store): State<Arc<Store>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Response {
    if !authorized(&headers) {
        return detail(StatusCode::UNAUTHORIZED, "Authentication credentials were not provided.");
    }

    let mut ticket = String::new();
    let mut body = None;
    let mut attachments = Vec::new();
    while let Ok(Some(field)) = multipart.next_field().await {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "ticket_id" => ticket = field.text().await.unwrap_or_default(),
            "message" => body = Some(field.text().await.unwrap_or_default()),
            "attachments" => {
                let filename = field.file_name().unwrap_or("file").to_string();
                let content_type =
                    field.content_type().unwrap_or("application/octet-stream").to_string();
                let bytes = field.bytes().await.unwrap_or_default();
                let id = store.next_id();
                attachments.push(Attachment {
                    url: format!("/attachments/{id}/download/"),
                    id,
                    filename,
                    size: bytes.len() as u64,
                    content_type,
                });
            }
            _ => {}
        }
    }

    let mut message = Message::new(store.next_id(), ticket, "me", body);
    message.attachments = attachments;
    store.messages.lock().unwrap().push(message.clone());
    if store.echo_new_messages.load(Ordering::SeqCst) {
        store.broadcast(json!({ "type": "new_message", "message": message }));
    }
    (StatusCode::CREATED, Json(message)).into_response()
}

#[derive(Deserialize)]
struct EditBody {
    message: String,
}

async fn edit_message(
    Path(id): Path<String>,
    State(store): State<Arc<Store>>,
    Json(req): Json<EditBody>,
) -> Response {
    let mut messages = store.messages.lock().unwrap();
    match messages.iter_mut().find(|m| m.id == id) {
        Some(m) => {
            m.body = Some(req.message);
            m.is_edited = true;
            Json(m.clone()).into_response()
        }
        None => not_found(),
    }
}

async fn delete_message(Path(id): Path<String>, State(store): State<Arc<Store>>) -> Response {
    let mut messages = store.messages.lock().unwrap();
    let before = messages.len();
    messages.retain(|m| m.id != id);
    if messages.len() == before {
        return not_found();
    }
    StatusCode::NO_CONTENT.into_response()
}

#[derive(Deserialize)]
struct UnsendBody {
    for_all: bool,
}

async fn unsend_message(
    Path(id): Path<String>,
    State(store): State<Arc<Store>>,
    Json(req): Json<UnsendBody>,
) -> Response {
    let mut messages = store.messages.lock().unwrap();
    match messages.iter_mut().find(|m| m.id == id) {
        Some(m) => {
            m.is_unsent = true;
            m.unsent_for_all = req.for_all;
            Json(m.clone()).into_response()
        }
        None => not_found(),
    }
}

#[derive(Deserialize)]
struct ReactionBody {
    message_id: String,
    reaction: String,
}

async fn add_reaction(State(store): State<Arc<Store>>, Json(req): Json<ReactionBody>) -> Response {
    let mut messages = store.messages.lock().unwrap();
    match messages.iter_mut().find(|m| m.id == req.message_id) {
        Some(m) => {
            m.reactions.push(Reaction { reaction: req.reaction, user: "me".to_string() });
            Json(m.clone()).into_response()
        }
        None => not_found(),
    }
}

async fn remove_reaction(
    State(store): State<Arc<Store>>,
    Json(req): Json<ReactionBody>,
) -> Response {
    let mut messages = store.messages.lock().unwrap();
    match messages.iter_mut().find(|m| m.id == req.message_id) {
        Some(m) => {
            m.reactions.retain(|r| !(r.reaction == req.reaction && r.user == "me"));
            Json(m.clone()).into_response()
        }
        None => not_found(),
    }
}

async fn download_attachment(Path(id): Path<String>) -> Response {
    (StatusCode::OK, format!("attachment-{id}").into_bytes()).into_response()
}

async fn ticket_socket(
    ws: WebSocketUpgrade,
    Path(_ticket_id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    State(store): State<Arc<Store>>,
) -> Response {
    if params.get("token").map(String::as_str) != Some(TOKEN) {
        return detail(StatusCode::FORBIDDEN, "Invalid token.");
    }
    store.connections.fetch_add(1, Ordering::SeqCst);
    ws.on_upgrade(move |socket| handle_socket(socket, store))
}

async fn handle_socket(socket: WebSocket, store: Arc<Store>) {
    let (mut sink, mut stream) = socket.split();
    let mut events = store.events.subscribe();
    let hello = json!({ "type": "connection_established" }).to_string();
    if sink.send(WsMessage::Text(hello.into())).await.is_err() {
        return;
    }

    let forward = tokio::spawn(async move {
        while let Ok(text) = events.recv().await {
            if text == CLOSE_COMMAND {
                let frame = CloseFrame { code: 1011, reason: "restart".to_string().into() };
                let _ = sink.send(WsMessage::Close(Some(frame))).await;
                break;
            }
            if sink.send(WsMessage::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = stream.next().await {
        match msg {
            WsMessage::Text(text) => {
                let _ = store.inbound.send(text.to_string());
            }
            WsMessage::Close(frame) => {
                let code = frame.map(|f| f.code).unwrap_or(1005);
                let _ = store.inbound.send(format!("closed:{code}"));
                break;
            }
            _ => {}
        }
    }
    forward.abort();
}
