//! Connect-with-retry state machine for a single logical download.
//!
//! [`DownloadSession`] performs no I/O. It consumes [`SessionEvent`]s
//! (connection lifecycle, inbound messages, timer expiry) and answers with
//! [`Command`]s for whoever owns the socket and the clock. UI-facing
//! transitions are reported through a [`SessionListener`].
//!
//! Connection and timer identifiers are never reused, so events belonging
//! to a superseded connection or a cancelled timer are recognised and
//! dropped.

use std::time::Duration;

use tracing::{debug, info, warn};
use url::Url;

use crate::api::ApiConfig;
use crate::config::SessionConfig;
use crate::domain::{JobRequest, ProgressView, SessionPhase, SessionToken, StatusEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Opened(ConnectionId),
    Message(ConnectionId, String),
    Closed(ConnectionId),
    Errored(ConnectionId),
    TimerFired(TimerId),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Open { conn: ConnectionId, url: Url },
    Send { conn: ConnectionId, payload: String },
    Close { conn: ConnectionId },
    Schedule { timer: TimerId, after: Duration },
    CancelTimer { timer: TimerId },
    /// Fetch the finished artifact, outside the streaming channel.
    Retrieve { filename: String, url: Url },
}

/// Observer for UI-visible session transitions.
pub trait SessionListener {
    fn on_connecting(&mut self, attempt: u32, max: u32);
    fn on_downloading(&mut self);
    fn on_progress(&mut self, progress: &ProgressView);
    fn on_ready(&mut self, filename: &str);
    fn on_countdown(&mut self, remaining: u32);
    fn on_error(&mut self, message: &str);
    fn on_connection_exhausted(&mut self);
    /// The UI lock may be released. Called once per started session.
    fn on_released(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerKind {
    RetryBackoff,
    Countdown,
}

/// Immutable for the lifetime of one session.
#[derive(Debug, Clone)]
struct ActiveJob {
    token: SessionToken,
    payload: String,
}

pub struct DownloadSession<L> {
    api: ApiConfig,
    config: SessionConfig,
    listener: L,
    token: Option<SessionToken>,
    phase: SessionPhase,
    locked: bool,
    job: Option<ActiveJob>,
    failures: u32,
    connection: Option<ConnectionId>,
    timer: Option<(TimerId, TimerKind)>,
    countdown: u32,
    progress: ProgressView,
    next_id: u64,
}

impl<L: SessionListener> DownloadSession<L> {
    pub fn new(api: ApiConfig, config: SessionConfig, listener: L) -> Self {
        Self {
            api,
            config,
            listener,
            token: None,
            phase: SessionPhase::Idle,
            locked: false,
            job: None,
            failures: 0,
            connection: None,
            timer: None,
            countdown: 0,
            progress: ProgressView::default(),
            next_id: 0,
        }
    }

    pub fn set_token(&mut self, token: Option<SessionToken>) {
        self.token = token;
    }

    #[cfg(test)]
    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// True from `start` until the lock is released.
    pub fn is_active(&self) -> bool {
        self.locked
    }

    #[cfg(test)]
    pub fn progress(&self) -> &ProgressView {
        &self.progress
    }

    #[cfg(test)]
    pub fn listener(&self) -> &L {
        &self.listener
    }

    pub fn listener_mut(&mut self) -> &mut L {
        &mut self.listener
    }

    /// Begin a new session. Ignored while another one is active or
    /// before a token is known.
    pub fn start(&mut self, job: JobRequest) -> Vec<Command> {
        if self.locked {
            debug!("Download already in progress, ignoring start");
            return Vec::new();
        }
        let Some(token) = self.token.clone() else {
            warn!("No session token, ignoring start");
            return Vec::new();
        };
        let payload = match job.to_message() {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Failed to encode job request: {}", e);
                return Vec::new();
            }
        };

        info!("Starting download of {} as {:?}", job.url, job.format);

        let mut commands = Vec::new();
        self.clear_timer(&mut commands);
        self.locked = true;
        self.failures = 0;
        self.countdown = 0;
        self.progress = ProgressView::default();
        self.job = Some(ActiveJob { token, payload });
        self.connect(&mut commands);
        commands
    }

    /// Abandon the session without further listener calls.
    pub fn cancel(&mut self) -> Vec<Command> {
        let mut commands = Vec::new();
        if !self.locked && self.connection.is_none() && self.timer.is_none() {
            return commands;
        }

        info!("Download cancelled");
        self.close_connection(&mut commands);
        self.clear_timer(&mut commands);
        self.reset();
        commands
    }

    /// Single entry point for everything the outside world reports.
    pub fn handle_event(&mut self, event: SessionEvent) -> Vec<Command> {
        let mut commands = Vec::new();

        match event {
            SessionEvent::Opened(conn) => {
                if self.is_current(conn) && self.phase == SessionPhase::Connecting {
                    self.on_open(conn, &mut commands);
                }
            }
            SessionEvent::Message(conn, text) => {
                if self.is_current(conn) && self.phase == SessionPhase::Downloading {
                    self.on_message(&text, &mut commands);
                }
            }
            SessionEvent::Closed(conn) | SessionEvent::Errored(conn) => {
                if self.is_current(conn) {
                    self.on_connection_lost(&mut commands);
                } else {
                    debug!("Ignoring close of stale connection {:?}", conn);
                }
            }
            SessionEvent::TimerFired(timer) => match self.timer {
                Some((id, kind)) if id == timer => {
                    self.timer = None;
                    match kind {
                        TimerKind::RetryBackoff => self.connect(&mut commands),
                        TimerKind::Countdown => self.tick(&mut commands),
                    }
                }
                _ => debug!("Ignoring stale timer {:?}", timer),
            },
        }

        commands
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn is_current(&self, conn: ConnectionId) -> bool {
        self.connection == Some(conn)
    }

    fn connect(&mut self, commands: &mut Vec<Command>) {
        let Some(job) = &self.job else {
            return;
        };
        let url = self.api.stream_url(&job.token);

        let conn = ConnectionId(self.next_id());
        self.connection = Some(conn);
        self.phase = SessionPhase::Connecting;

        let attempt = self.failures + 1;
        debug!("Connection attempt {}/{}", attempt, self.config.max_attempts);
        self.listener.on_connecting(attempt, self.config.max_attempts);
        commands.push(Command::Open { conn, url });
    }

    fn on_open(&mut self, conn: ConnectionId, commands: &mut Vec<Command>) {
        let Some(job) = &self.job else {
            return;
        };

        commands.push(Command::Send {
            conn,
            payload: job.payload.clone(),
        });
        self.phase = SessionPhase::Downloading;
        self.listener.on_downloading();
    }

    fn on_message(&mut self, text: &str, commands: &mut Vec<Command>) {
        let event: StatusEvent = match serde_json::from_str(text) {
            Ok(event) => event,
            Err(e) => {
                warn!("Ignoring malformed status message: {}", e);
                return;
            }
        };

        match event {
            StatusEvent::Progress(update) => {
                self.progress.apply(&update);
                self.listener.on_progress(&self.progress);
            }
            StatusEvent::Ready { filename } => self.on_ready(filename, commands),
            StatusEvent::Error { message } => {
                warn!("Server reported error: {}", message);
                self.close_connection(commands);
                self.phase = SessionPhase::Failed;
                self.listener.on_error(&message);
                self.release();
            }
        }
    }

    fn on_ready(&mut self, filename: String, commands: &mut Vec<Command>) {
        let Some(job) = &self.job else {
            return;
        };
        let url = self.api.artifact_url(&filename, &job.token);

        info!("Artifact ready: {}", filename);
        self.close_connection(commands);
        self.phase = SessionPhase::Ready;
        self.listener.on_ready(&filename);
        commands.push(Command::Retrieve { filename, url });

        self.countdown = self.config.ready_countdown;
        if self.countdown == 0 {
            self.finish();
        } else {
            self.listener.on_countdown(self.countdown);
            self.schedule(TimerKind::Countdown, self.config.countdown_tick, commands);
        }
    }

    fn on_connection_lost(&mut self, commands: &mut Vec<Command>) {
        self.connection = None;
        self.failures += 1;

        if self.failures < self.config.max_attempts {
            warn!(
                "Connection lost (attempt {}/{}), retrying in {:?}",
                self.failures, self.config.max_attempts, self.config.retry_delay
            );
            self.phase = SessionPhase::Connecting;
            self.schedule(TimerKind::RetryBackoff, self.config.retry_delay, commands);
        } else {
            warn!("Giving up after {} connection attempts", self.failures);
            self.phase = SessionPhase::Failed;
            self.listener.on_connection_exhausted();
            self.release();
        }
    }

    fn tick(&mut self, commands: &mut Vec<Command>) {
        self.countdown = self.countdown.saturating_sub(1);
        if self.countdown == 0 {
            self.finish();
        } else {
            self.listener.on_countdown(self.countdown);
            self.schedule(TimerKind::Countdown, self.config.countdown_tick, commands);
        }
    }

    fn schedule(&mut self, kind: TimerKind, after: Duration, commands: &mut Vec<Command>) {
        self.clear_timer(commands);
        let timer = TimerId(self.next_id());
        self.timer = Some((timer, kind));
        commands.push(Command::Schedule { timer, after });
    }

    fn clear_timer(&mut self, commands: &mut Vec<Command>) {
        if let Some((timer, _)) = self.timer.take() {
            commands.push(Command::CancelTimer { timer });
        }
    }

    fn close_connection(&mut self, commands: &mut Vec<Command>) {
        if let Some(conn) = self.connection.take() {
            commands.push(Command::Close { conn });
        }
    }

    fn finish(&mut self) {
        self.release();
        self.reset();
    }

    fn release(&mut self) {
        if self.locked {
            self.locked = false;
            self.job = None;
            self.listener.on_released();
        }
    }

    fn reset(&mut self) {
        self.locked = false;
        self.job = None;
        self.failures = 0;
        self.countdown = 0;
        self.progress = ProgressView::default();
        self.phase = SessionPhase::Idle;
    }
}
