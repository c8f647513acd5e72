use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::errors::AppError;
use crate::models::ConnectionState;
use crate::ws::backoff::ReconnectPolicy;
use crate::ws::frames::ClientCommand;
use crate::ws::scheduler::{Scheduler, TimerKind};

pub const NORMAL_CLOSURE: u16 = 1000;
pub const ABNORMAL_CLOSURE: u16 = 1006;

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_TYPING_TIMEOUT: Duration = Duration::from_millis(3000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionSettings {
    pub heartbeat_interval: Duration,
    pub typing_timeout: Duration,
    pub reconnect: ReconnectPolicy,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            typing_timeout: DEFAULT_TYPING_TIMEOUT,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

/// Socket-level work requested by the [`ConnectionManager`]. The driver
/// performs these in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Open(Url),
    Send(ClientCommand),
    Close { code: u16 },
}

/// Builds `{ws_base}/ws/tickets/{ticket_id}/?token={token}`.
pub fn ticket_socket_url(
    ws_base: &str,
    ticket_id: &str,
    token: Option<&str>,
) -> Result<Url, AppError> {
    let raw = format!("{}/ws/tickets/{}/", ws_base.trim_end_matches('/'), ticket_id);
    let mut url = Url::parse(&raw)
        .map_err(|e| AppError::InvalidUrl { url: raw.clone(), reason: e.to_string() })?;
    if let Some(token) = token {
        url.query_pairs_mut().append_pair("token", token);
    }
    Ok(url)
}

/// Connection lifecycle for one ticket's real-time channel.
///
/// Holds no socket: every transition either queues an [`Action`] or arms a
/// timer in its [`Scheduler`]. The driver feeds socket events in through
/// `on_open` / `on_close` / `on_error`, calls `poll` when the next deadline
/// passes, and executes whatever `next_action` yields.
#[derive(Debug)]
pub struct ConnectionManager {
    ws_base: String,
    user: String,
    settings: ConnectionSettings,
    target: Option<Url>,
    state: ConnectionState,
    attempts: u32,
    exhausted: bool,
    socket_live: bool,
    typing: bool,
    error: Option<String>,
    scheduler: Scheduler,
    actions: VecDeque<Action>,
}

impl ConnectionManager {
    pub fn new(
        ws_base: impl Into<String>,
        user: impl Into<String>,
        settings: ConnectionSettings,
    ) -> Self {
        Self {
            ws_base: ws_base.into(),
            user: user.into(),
            settings,
            target: None,
            state: ConnectionState::Disconnected,
            attempts: 0,
            exhausted: false,
            socket_live: false,
            typing: false,
            error: None,
            scheduler: Scheduler::new(),
            actions: VecDeque::new(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_typing(&self) -> bool {
        self.typing
    }

    pub fn is_scheduled(&self, kind: TimerKind) -> bool {
        self.scheduler.is_scheduled(kind)
    }

    pub fn deadline(&self, kind: TimerKind) -> Option<Instant> {
        self.scheduler.deadline(kind)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.scheduler.next_deadline()
    }

    pub fn next_action(&mut self) -> Option<Action> {
        self.actions.pop_front()
    }

    // ── Lifecycle ────────────────────────────────────────────────────────────

    /// Targets a ticket and opens a socket with a fresh attempt budget.
    pub fn connect(&mut self, ticket_id: &str, token: Option<&str>) -> Result<(), AppError> {
        let url = ticket_socket_url(&self.ws_base, ticket_id, token)?;
        self.target = Some(url);
        self.attempts = 0;
        self.exhausted = false;
        self.error = None;
        self.scheduler.cancel(TimerKind::Reconnect);
        self.open();
        Ok(())
    }

    fn open(&mut self) {
        let Some(url) = self.target.clone() else {
            warn!("No ticket to connect to");
            return;
        };
        if self.socket_live {
            self.actions.push_back(Action::Close { code: NORMAL_CLOSURE });
        }
        info!("Connecting to ticket channel (attempt {})", self.attempts);
        self.state = ConnectionState::Connecting;
        self.socket_live = true;
        self.actions.push_back(Action::Open(url));
    }

    pub fn on_open(&mut self, now: Instant) {
        info!("Ticket channel connected");
        self.state = ConnectionState::Connected;
        self.attempts = 0;
        self.exhausted = false;
        self.error = None;
        self.arm_heartbeat(now);
    }

    pub fn on_error(&mut self, message: &str) {
        warn!("Ticket channel error: {message}");
    }

    pub fn on_close(&mut self, code: u16, now: Instant) {
        self.socket_live = false;
        self.state = ConnectionState::Disconnected;
        self.typing = false;
        self.scheduler.cancel(TimerKind::Heartbeat);
        self.scheduler.cancel(TimerKind::TypingTimeout);

        if code == NORMAL_CLOSURE || self.target.is_none() {
            info!("Ticket channel closed normally");
            return;
        }

        match self.settings.reconnect.delay_for(self.attempts) {
            Some(delay) => {
                warn!(
                    "Ticket channel closed with code {code}; reconnecting in {}ms (attempt {}/{})",
                    delay.as_millis(),
                    self.attempts + 1,
                    self.settings.reconnect.max_attempts
                );
                self.schedule_after(TimerKind::Reconnect, now, delay);
                self.attempts += 1;
            }
            None if !self.exhausted => {
                self.exhausted = true;
                let message = format!(
                    "Connection lost after {} reconnect attempts",
                    self.settings.reconnect.max_attempts
                );
                error!("{message}");
                self.error = Some(message);
            }
            None => {}
        }
    }

    /// Cancels every pending timer and closes the socket with the normal
    /// closure code. Safe to call any number of times.
    pub fn disconnect(&mut self) {
        self.scheduler.cancel_all();
        self.typing = false;
        if self.socket_live {
            info!("Disconnecting ticket channel");
            self.socket_live = false;
            self.actions.push_back(Action::Close { code: NORMAL_CLOSURE });
        }
        self.state = ConnectionState::Disconnected;
    }

    /// Manual retry: resets the attempt budget and connects on the next poll.
    pub fn reconnect(&mut self, now: Instant) {
        self.attempts = 0;
        self.exhausted = false;
        self.error = None;
        if self.target.is_none() {
            warn!("reconnect() called before connect()");
            return;
        }
        self.scheduler.schedule(TimerKind::Reconnect, now);
    }

    /// Fires every timer due at `now`.
    pub fn poll(&mut self, now: Instant) {
        for kind in self.scheduler.take_due(now) {
            match kind {
                TimerKind::Reconnect => self.open(),
                TimerKind::Heartbeat => {
                    if self.state.is_connected() {
                        self.send(ClientCommand::Ping);
                        self.arm_heartbeat(now);
                    }
                }
                TimerKind::TypingTimeout => self.finish_typing(),
            }
        }
    }

    // ── Typing ───────────────────────────────────────────────────────────────

    /// Records a keystroke: sends `typing_start` once per burst and pushes
    /// the auto-stop deadline out.
    pub fn start_typing(&mut self, now: Instant) {
        if !self.state.is_connected() {
            debug!("Not connected; dropping typing_start");
            return;
        }
        if !self.typing {
            self.typing = true;
            self.send(ClientCommand::TypingStart { user: self.user.clone() });
        }
        self.schedule_after(TimerKind::TypingTimeout, now, self.settings.typing_timeout);
    }

    pub fn stop_typing(&mut self) {
        self.scheduler.cancel(TimerKind::TypingTimeout);
        self.finish_typing();
    }

    fn finish_typing(&mut self) {
        if !self.typing {
            return;
        }
        self.typing = false;
        self.send(ClientCommand::TypingStop { user: self.user.clone() });
    }

    // ── Timers ───────────────────────────────────────────────────────────────

    fn arm_heartbeat(&mut self, now: Instant) {
        if self.settings.heartbeat_interval.is_zero() {
            warn!("Heartbeat interval is zero; heartbeat disabled");
            return;
        }
        self.schedule_after(TimerKind::Heartbeat, now, self.settings.heartbeat_interval);
    }

    fn schedule_after(&mut self, kind: TimerKind, now: Instant, delay: Duration) {
        match now.checked_add(delay) {
            Some(at) => self.scheduler.schedule(kind, at),
            None => warn!("{kind:?} delay of {delay:?} is out of range; timer not armed"),
        }
    }

    fn send(&mut self, command: ClientCommand) {
        if self.state.is_connected() {
            self.actions.push_back(Action::Send(command));
        } else {
            debug!("Not connected; dropping {command:?}");
        }
    }
}
