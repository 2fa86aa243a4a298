use std::collections::VecDeque;

use futures::channel::mpsc::{UnboundedReceiver, UnboundedSender};
use futures::future::BoxFuture;
use futures::{FutureExt, SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

use super::download_session::{
    Command, ConnectionId, DownloadSession, SessionEvent, SessionListener, TimerId,
};
use crate::api::ApiConfig;
use crate::config::SessionConfig;
use crate::domain::{JobRequest, ProgressView, SessionToken};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Handshake = BoxFuture<'static, Result<WsStream, String>>;

/// Requests from the UI to the session worker.
///
/// `session` is chosen by the UI and stamped on every update the session
/// produces, so leftovers from an abandoned session can be told apart.
#[derive(Debug, Clone)]
pub enum SessionRequest {
    Start {
        session: u64,
        token: SessionToken,
        job: JobRequest,
    },
    Cancel,
}

/// What the worker reports back to the UI.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    Connecting { attempt: u32, max: u32 },
    Downloading,
    Progress(ProgressView),
    Ready { filename: String },
    Retrieve { filename: String, url: Url },
    Countdown(u32),
    Error(String),
    ConnectionExhausted,
    Released,
}

/// A [`SessionUpdate`] and the session it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionNotice {
    pub session: u64,
    pub update: SessionUpdate,
}

/// Forwards listener calls as [`SessionNotice`]s.
struct UpdateSink {
    tx: UnboundedSender<SessionNotice>,
    session: u64,
}

impl UpdateSink {
    fn emit(&self, update: SessionUpdate) {
        // The receiver only goes away when the UI is shutting down.
        let _ = self.tx.unbounded_send(SessionNotice {
            session: self.session,
            update,
        });
    }
}

impl SessionListener for UpdateSink {
    fn on_connecting(&mut self, attempt: u32, max: u32) {
        self.emit(SessionUpdate::Connecting { attempt, max });
    }

    fn on_downloading(&mut self) {
        self.emit(SessionUpdate::Downloading);
    }

    fn on_progress(&mut self, progress: &ProgressView) {
        self.emit(SessionUpdate::Progress(*progress));
    }

    fn on_ready(&mut self, filename: &str) {
        self.emit(SessionUpdate::Ready {
            filename: filename.to_string(),
        });
    }

    fn on_countdown(&mut self, remaining: u32) {
        self.emit(SessionUpdate::Countdown(remaining));
    }

    fn on_error(&mut self, message: &str) {
        self.emit(SessionUpdate::Error(message.to_string()));
    }

    fn on_connection_exhausted(&mut self) {
        self.emit(SessionUpdate::ConnectionExhausted);
    }

    fn on_released(&mut self) {
        self.emit(SessionUpdate::Released);
    }
}

enum Input {
    Request(SessionRequest),
    Event(SessionEvent),
    Handshake(ConnectionId, Result<WsStream, String>),
}

/// Runs a [`DownloadSession`] against a real WebSocket and tokio timers.
///
/// One driver lives for the whole application run and serves any number
/// of consecutive sessions. Handshakes, frames and timers are all awaited
/// in the same `select!` as incoming requests, so a cancel always lands
/// before the next socket event is applied.
pub struct SessionDriver {
    session: DownloadSession<UpdateSink>,
    connect_timeout: std::time::Duration,
    connecting: Option<(ConnectionId, Handshake)>,
    socket: Option<(ConnectionId, WsStream)>,
    timer: Option<(TimerId, Instant)>,
}

impl SessionDriver {
    pub fn new(
        api: ApiConfig,
        config: SessionConfig,
        updates: UnboundedSender<SessionNotice>,
    ) -> Self {
        let connect_timeout = config.connect_timeout;
        let sink = UpdateSink {
            tx: updates,
            session: 0,
        };

        Self {
            session: DownloadSession::new(api, config, sink),
            connect_timeout,
            connecting: None,
            socket: None,
            timer: None,
        }
    }

    /// Serve requests until the request channel closes.
    pub async fn run(mut self, mut requests: UnboundedReceiver<SessionRequest>) {
        let mut pending: VecDeque<Command> = VecDeque::new();

        loop {
            while let Some(command) = pending.pop_front() {
                if let Some(event) = self.execute(command).await {
                    self.observe(&event);
                    pending.extend(self.session.handle_event(event));
                }
            }

            let input = tokio::select! {
                biased;
                request = requests.next() => match request {
                    Some(request) => Input::Request(request),
                    None => break,
                },
                wake = next_event(&mut self.connecting, &mut self.socket, self.timer) => wake,
            };

            match input {
                Input::Request(SessionRequest::Start {
                    session,
                    token,
                    job,
                }) => {
                    if !self.session.is_active() {
                        self.session.set_token(Some(token));
                        self.session.listener_mut().session = session;
                    }
                    pending.extend(self.session.start(job));
                }
                Input::Request(SessionRequest::Cancel) => {
                    pending.extend(self.session.cancel());
                }
                Input::Handshake(conn, result) => {
                    self.connecting = None;
                    let event = match result {
                        Ok(ws) => {
                            self.socket = Some((conn, ws));
                            SessionEvent::Opened(conn)
                        }
                        Err(e) => {
                            tracing::warn!("{}", e);
                            SessionEvent::Errored(conn)
                        }
                    };
                    pending.extend(self.session.handle_event(event));
                }
                Input::Event(event) => {
                    self.observe(&event);
                    pending.extend(self.session.handle_event(event));
                }
            }
        }

        for command in self.session.cancel() {
            self.execute(command).await;
        }
        tracing::debug!("Session worker stopped");
    }

    /// Keep the socket and timer slots in step with delivered events.
    fn observe(&mut self, event: &SessionEvent) {
        match event {
            SessionEvent::Closed(conn) | SessionEvent::Errored(conn) => {
                if matches!(&self.socket, Some((current, _)) if current == conn) {
                    self.socket = None;
                }
            }
            SessionEvent::TimerFired(timer) => {
                if matches!(self.timer, Some((current, _)) if current == *timer) {
                    self.timer = None;
                }
            }
            _ => {}
        }
    }

    async fn execute(&mut self, command: Command) -> Option<SessionEvent> {
        match command {
            Command::Open { conn, url } => {
                let timeout = self.connect_timeout;
                let handshake = async move {
                    let connect = tokio_tungstenite::connect_async(url.as_str());
                    match tokio::time::timeout(timeout, connect).await {
                        Ok(Ok((ws, _response))) => Ok(ws),
                        Ok(Err(e)) => Err(format!("WebSocket connect failed: {}", e)),
                        Err(_) => Err(format!("WebSocket connect timed out after {:?}", timeout)),
                    }
                };
                self.connecting = Some((conn, handshake.boxed()));
                None
            }
            Command::Send { conn, payload } => {
                let (current, ws) = self.socket.as_mut()?;
                if *current != conn {
                    return None;
                }
                if let Err(e) = ws.send(Message::Text(payload.into())).await {
                    tracing::warn!("Failed to send job request: {}", e);
                    return Some(SessionEvent::Errored(conn));
                }
                None
            }
            Command::Close { conn } => {
                // Dropping an unfinished handshake abandons it
                if matches!(&self.connecting, Some((current, _)) if *current == conn) {
                    self.connecting = None;
                }
                if matches!(&self.socket, Some((current, _)) if *current == conn) {
                    if let Some((_, mut ws)) = self.socket.take() {
                        let _ = ws.close(None).await;
                    }
                }
                None
            }
            Command::Schedule { timer, after } => {
                self.timer = Some((timer, Instant::now() + after));
                None
            }
            Command::CancelTimer { timer } => {
                if matches!(self.timer, Some((current, _)) if current == timer) {
                    self.timer = None;
                }
                None
            }
            Command::Retrieve { filename, url } => {
                self.session
                    .listener_mut()
                    .emit(SessionUpdate::Retrieve { filename, url });
                None
            }
        }
    }
}

/// Wait for whichever comes first: the pending handshake, a socket frame
/// that matters, or the pending timer.
async fn next_event(
    connecting: &mut Option<(ConnectionId, Handshake)>,
    socket: &mut Option<(ConnectionId, WsStream)>,
    timer: Option<(TimerId, Instant)>,
) -> Input {
    let timer_fired = async move {
        match timer {
            Some((id, deadline)) => {
                tokio::time::sleep_until(deadline).await;
                id
            }
            None => std::future::pending().await,
        }
    };

    let handshake = async {
        match connecting.as_mut() {
            Some((conn, handshake)) => (*conn, handshake.await),
            None => std::future::pending().await,
        }
    };

    let frame = async {
        let Some((conn, ws)) = socket.as_mut() else {
            return std::future::pending().await;
        };
        let conn = *conn;
        loop {
            if let Some(event) = frame_event(conn, ws.next().await) {
                return event;
            }
        }
    };

    tokio::select! {
        id = timer_fired => Input::Event(SessionEvent::TimerFired(id)),
        (conn, result) = handshake => Input::Handshake(conn, result),
        event = frame => Input::Event(event),
    }
}

fn frame_event(
    conn: ConnectionId,
    frame: Option<Result<Message, tungstenite::Error>>,
) -> Option<SessionEvent> {
    match frame {
        Some(Ok(Message::Text(text))) => Some(SessionEvent::Message(conn, text.as_str().to_owned())),
        Some(Ok(Message::Close(_))) | None => Some(SessionEvent::Closed(conn)),
        Some(Ok(_)) => None,
        Some(Err(e)) => {
            tracing::warn!("WebSocket error: {}", e);
            Some(SessionEvent::Errored(conn))
        }
    }
}
