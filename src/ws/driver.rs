use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, timeout, Instant};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, warn};

use crate::errors::AppError;
use crate::state::TicketState;
use crate::ws::connection::{Action, ConnectionManager, ABNORMAL_CLOSURE};
use crate::ws::dispatcher;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const NO_STATUS_RECEIVED: u16 = 1005;

/// Requests from the session to its connection task.
#[derive(Debug)]
pub enum Command {
    Connect { ticket_id: String, token: Option<String> },
    Disconnect,
    Reconnect,
    StartTyping,
    StopTyping,
    Shutdown,
}

enum LoopEvent {
    Command(Option<Command>),
    Frame(Option<Result<WsMessage, WsError>>),
    Timer,
}

/// Handle to the task that owns one ticket's socket. Dropping the handle
/// shuts the task down: timers are cancelled and the socket is closed with
/// the normal closure code.
pub struct ConnectionHandle {
    commands: mpsc::UnboundedSender<Command>,
    task: Option<JoinHandle<()>>,
}

impl ConnectionHandle {
    /// Spawns the connection task. Must be called from within a tokio runtime.
    pub fn spawn(manager: ConnectionManager, state: Arc<watch::Sender<TicketState>>) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(manager, rx, state));
        Self { commands, task: Some(task) }
    }

    /// Returns `false` once the task has stopped.
    pub fn send(&self, command: Command) -> bool {
        self.commands.send(command).is_ok()
    }

    /// Stops the task and waits for the socket to be closed.
    pub async fn shutdown(mut self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!("Connection task panicked: {e}");
            }
        }
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        if self.task.is_some() {
            let _ = self.commands.send(Command::Shutdown);
        }
    }
}

async fn run(
    mut manager: ConnectionManager,
    mut commands: mpsc::UnboundedReceiver<Command>,
    state: Arc<watch::Sender<TicketState>>,
) {
    let mut socket: Option<Socket> = None;
    let mut published_error: Option<String> = None;
    let mut stopping = false;

    loop {
        while let Some(action) = manager.next_action() {
            perform(action, &mut manager, &mut socket).await;
        }
        publish(&state, &manager, &mut published_error);
        if stopping {
            break;
        }

        let deadline = manager.next_deadline();
        let event = tokio::select! {
            cmd = commands.recv() => LoopEvent::Command(cmd),
            frame = next_frame(&mut socket) => LoopEvent::Frame(frame),
            _ = wait_until(deadline) => LoopEvent::Timer,
        };

        match event {
            LoopEvent::Command(None) | LoopEvent::Command(Some(Command::Shutdown)) => {
                manager.disconnect();
                stopping = true;
            }
            LoopEvent::Command(Some(command)) => apply_command(command, &mut manager, &state),
            LoopEvent::Frame(frame) => handle_frame(frame, &mut manager, &mut socket, &state),
            LoopEvent::Timer => manager.poll(Instant::now()),
        }
    }
    debug!("Connection task stopped");
}

fn apply_command(
    command: Command,
    manager: &mut ConnectionManager,
    state: &watch::Sender<TicketState>,
) {
    match command {
        Command::Connect { ticket_id, token } => {
            if let Err(e) = manager.connect(&ticket_id, token.as_deref()) {
                error!("Cannot connect to ticket {ticket_id}: {e}");
                state.send_if_modified(|s| s.set_error(Some(e.to_string())));
            }
        }
        Command::Disconnect | Command::Shutdown => manager.disconnect(),
        Command::Reconnect => manager.reconnect(Instant::now()),
        Command::StartTyping => manager.start_typing(Instant::now()),
        Command::StopTyping => manager.stop_typing(),
    }
}

async fn perform(action: Action, manager: &mut ConnectionManager, socket: &mut Option<Socket>) {
    match action {
        Action::Open(url) => match timeout(CONNECT_TIMEOUT, connect_async(url.as_str())).await {
            Ok(Ok((ws, _))) => {
                *socket = Some(ws);
                manager.on_open(Instant::now());
            }
            Ok(Err(e)) => {
                manager.on_error(&AppError::WebSocket(e).to_string());
                manager.on_close(ABNORMAL_CLOSURE, Instant::now());
            }
            Err(_) => {
                manager.on_error("connect timed out");
                manager.on_close(ABNORMAL_CLOSURE, Instant::now());
            }
        },
        Action::Send(command) => {
            let Some(ws) = socket.as_mut() else {
                debug!("No socket; dropping {command:?}");
                return;
            };
            match command.encode() {
                Ok(text) => {
                    if let Err(e) = ws.send(WsMessage::Text(text)).await {
                        warn!("Failed to send {command:?}: {e}");
                    }
                }
                Err(e) => warn!("{e}"),
            }
        }
        Action::Close { code } => {
            if let Some(mut ws) = socket.take() {
                let frame = CloseFrame { code: CloseCode::from(code), reason: Cow::Borrowed("") };
                if let Err(e) = ws.close(Some(frame)).await {
                    debug!("Close handshake failed: {e}");
                }
            }
        }
    }
}

fn handle_frame(
    frame: Option<Result<WsMessage, WsError>>,
    manager: &mut ConnectionManager,
    socket: &mut Option<Socket>,
    state: &watch::Sender<TicketState>,
) {
    match frame {
        Some(Ok(WsMessage::Text(text))) => {
            state.send_if_modified(|s| dispatcher::handle_text(s, &text));
        }
        Some(Ok(WsMessage::Close(close))) => {
            let code = close.map(|f| u16::from(f.code)).unwrap_or(NO_STATUS_RECEIVED);
            *socket = None;
            manager.on_close(code, Instant::now());
        }
        Some(Ok(_)) => {}
        Some(Err(e)) => {
            manager.on_error(&e.to_string());
            *socket = None;
            manager.on_close(ABNORMAL_CLOSURE, Instant::now());
        }
        None => {
            *socket = None;
            manager.on_close(ABNORMAL_CLOSURE, Instant::now());
        }
    }
}

/// Mirrors the manager's connection state and transport error into the
/// shared state. Server error frames are left alone unless a transport
/// error replaces them.
fn publish(
    state: &watch::Sender<TicketState>,
    manager: &ConnectionManager,
    published_error: &mut Option<String>,
) {
    let current = manager.error().map(str::to_string);
    state.send_if_modified(|s| {
        let mut changed = false;
        if s.connection != manager.state() {
            s.connection = manager.state();
            changed = true;
        }
        if current != *published_error {
            match &current {
                Some(err) => changed |= s.set_error(Some(err.clone())),
                None if s.error == *published_error => changed |= s.set_error(None),
                None => {}
            }
        }
        changed
    });
    *published_error = current;
}

async fn next_frame(socket: &mut Option<Socket>) -> Option<Result<WsMessage, WsError>> {
    match socket {
        Some(ws) => ws.next().await,
        None => std::future::pending().await,
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}
