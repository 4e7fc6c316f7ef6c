//! Real-time event channel
//!
//! One background task owns the WebSocket and an explicit state machine:
//!
//! ```text
//! Disconnected ─▶ Connecting ─▶ Authenticating ─▶ Open
//!                     ▲                │            │
//!                     │                ▼            ▼
//!                     └── (delay) ── Closed / Error ┘
//! ```
//!
//! Unexpected closes reconnect after a fixed delay; an owner-requested
//! shutdown cancels any pending reconnect and closes with code 1000.

use crate::protocol::{ChannelMessage, ClientMessage, RemoteEvent};
use futures_util::{SinkExt, StreamExt};
use itemsync_common::sanitizer::LogSanitizer;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Authenticating,
    Open,
    Closed,
    Error,
}

impl ChannelState {
    /// A socket exists or is being established
    pub fn is_live(self) -> bool {
        matches!(
            self,
            ChannelState::Connecting | ChannelState::Authenticating | ChannelState::Open
        )
    }
}

/// Inputs driving the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelInput {
    Connect,
    SocketOpened,
    Authenticated,
    SocketClosed,
    SocketError,
    ReconnectDue,
    Shutdown,
}

/// Transition table of the channel
#[derive(Debug)]
pub struct ChannelStateMachine {
    state: ChannelState,
    shutdown_requested: bool,
}

impl Default for ChannelStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelStateMachine {
    pub fn new() -> Self {
        Self {
            state: ChannelState::Disconnected,
            shutdown_requested: false,
        }
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// Apply `input`; returns false and keeps the state when not allowed
    pub fn apply(&mut self, input: ChannelInput) -> bool {
        use ChannelInput as I;
        use ChannelState as S;

        let next = match (self.state, input) {
            (_, I::Shutdown) => {
                self.shutdown_requested = true;
                Some(S::Disconnected)
            }
            _ if self.shutdown_requested => None,
            (S::Disconnected, I::Connect) => Some(S::Connecting),
            (S::Closed | S::Error, I::ReconnectDue) => Some(S::Connecting),
            (S::Connecting, I::SocketOpened) => Some(S::Authenticating),
            (S::Authenticating, I::Authenticated) => Some(S::Open),
            (S::Authenticating | S::Open, I::SocketClosed) => Some(S::Closed),
            (S::Connecting | S::Authenticating | S::Open, I::SocketError) => Some(S::Error),
            _ => None,
        };

        match next {
            Some(state) => {
                tracing::trace!("Channel {:?} --{:?}--> {:?}", self.state, input, state);
                self.state = state;
                true
            }
            None => {
                tracing::debug!("Channel ignored {:?} while {:?}", input, self.state);
                false
            }
        }
    }

    /// Closed unexpectedly and not shut down by the owner
    pub fn should_reconnect(&self) -> bool {
        !self.shutdown_requested && matches!(self.state, ChannelState::Closed | ChannelState::Error)
    }
}

/// Notifications delivered to the channel owner
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// Channel usable; identity valid until the next `Disconnected`
    Authenticated {
        connection_id: String,
        user_id: Option<i64>,
    },
    Remote(RemoteEvent),
    ServerError(String),
    Disconnected,
}

/// Owner side of the event channel
pub struct EventChannel {
    url: String,
    token: String,
    reconnect_delay: Duration,
    state_rx: watch::Receiver<ChannelState>,
    state_tx: Option<watch::Sender<ChannelState>>,
    shutdown_tx: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
}

impl EventChannel {
    pub fn new(url: impl Into<String>, token: impl Into<String>, reconnect_delay: Duration) -> Self {
        let (state_tx, state_rx) = watch::channel(ChannelState::Disconnected);
        Self {
            url: url.into(),
            token: token.into(),
            reconnect_delay,
            state_rx,
            state_tx: Some(state_tx),
            shutdown_tx: None,
            task: None,
        }
    }

    pub fn state(&self) -> ChannelState {
        *self.state_rx.borrow()
    }

    /// Watch state changes (e.g. for a connection badge)
    pub fn subscribe_state(&self) -> watch::Receiver<ChannelState> {
        self.state_rx.clone()
    }

    /// Start the connection task and return its event stream.
    ///
    /// Fails while a previous task is still running.
    pub fn connect(&mut self) -> crate::Result<mpsc::Receiver<ChannelEvent>> {
        if self.task.as_ref().is_some_and(|t| !t.is_finished()) {
            return Err(crate::SyncError::Connectivity(
                "event channel already connected".to_string(),
            ));
        }

        let state_tx = match self.state_tx.take() {
            Some(tx) => tx,
            None => {
                let (tx, rx) = watch::channel(ChannelState::Disconnected);
                self.state_rx = rx;
                tx
            }
        };
        let (events_tx, events_rx) = mpsc::channel(256);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = ChannelTask {
            url: self.url.clone(),
            token: self.token.clone(),
            reconnect_delay: self.reconnect_delay,
            machine: ChannelStateMachine::new(),
            state_tx,
            events_tx,
            shutdown_rx,
            sanitizer: LogSanitizer::new(),
            attempt: 0,
        };

        self.shutdown_tx = Some(shutdown_tx);
        self.task = Some(tokio::spawn(task.run()));
        Ok(events_rx)
    }

    /// Close the socket normally and stop reconnecting
    pub async fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(true);
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!("Event channel task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for EventChannel {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(true);
        }
    }
}

/// How one socket session ended
enum SessionEnd {
    Shutdown,
    Closed,
    Failed(String),
}

struct ChannelTask {
    url: String,
    token: String,
    reconnect_delay: Duration,
    machine: ChannelStateMachine,
    state_tx: watch::Sender<ChannelState>,
    events_tx: mpsc::Sender<ChannelEvent>,
    shutdown_rx: watch::Receiver<bool>,
    sanitizer: LogSanitizer,
    attempt: u64,
}

impl ChannelTask {
    fn step(&mut self, input: ChannelInput) {
        if self.machine.apply(input) {
            let _ = self.state_tx.send(self.machine.state());
        }
    }

    fn shutdown_requested(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    async fn run(mut self) {
        self.step(ChannelInput::Connect);

        loop {
            if self.shutdown_requested() {
                break;
            }
            self.attempt += 1;

            match self.session().await {
                SessionEnd::Shutdown => break,
                SessionEnd::Closed => {
                    tracing::info!("Event channel closed by server");
                    self.step(ChannelInput::SocketClosed);
                }
                SessionEnd::Failed(e) => {
                    tracing::warn!("Event channel error: {}", self.sanitizer.sanitize(&e));
                    self.step(ChannelInput::SocketError);
                }
            }

            if self.events_tx.send(ChannelEvent::Disconnected).await.is_err() {
                break;
            }
            if !self.machine.should_reconnect() {
                break;
            }

            tracing::info!("Reconnecting in {:?}", self.reconnect_delay);
            tokio::select! {
                _ = tokio::time::sleep(self.reconnect_delay) => {}
                _ = self.shutdown_rx.changed() => break,
            }
            self.step(ChannelInput::ReconnectDue);
        }

        self.step(ChannelInput::Shutdown);
        tracing::debug!("Event channel stopped");
    }

    async fn session(&mut self) -> SessionEnd {
        tracing::debug!("Connecting to {} (attempt {})", self.url, self.attempt);

        let connect = tokio_tungstenite::connect_async(self.url.as_str());
        let ws_stream = tokio::select! {
            result = connect => match result {
                Ok((stream, _)) => stream,
                Err(e) => return SessionEnd::Failed(e.to_string()),
            },
            _ = self.shutdown_rx.changed() => return SessionEnd::Shutdown,
        };
        self.step(ChannelInput::SocketOpened);

        let (mut write, mut read) = ws_stream.split();

        let auth = match (ClientMessage::Auth {
            token: self.token.clone(),
        })
        .to_text()
        {
            Ok(text) => text,
            Err(e) => return SessionEnd::Failed(e.to_string()),
        };
        tracing::trace!("Sending {}", self.sanitizer.sanitize(&auth));
        if let Err(e) = write.send(Message::Text(auth)).await {
            return SessionEnd::Failed(e.to_string());
        }

        loop {
            tokio::select! {
                _ = self.shutdown_rx.changed() => {
                    let frame = CloseFrame {
                        code: CloseCode::Normal,
                        reason: "client shutdown".into(),
                    };
                    if let Err(e) = write.send(Message::Close(Some(frame))).await {
                        tracing::debug!("Close frame not sent: {}", e);
                    }
                    return SessionEnd::Shutdown;
                }
                message = read.next() => match message {
                    None => return SessionEnd::Closed,
                    Some(Err(e)) => return SessionEnd::Failed(e.to_string()),
                    Some(Ok(Message::Close(frame))) => {
                        tracing::debug!("Close frame received: {:?}", frame);
                        return SessionEnd::Closed;
                    }
                    Some(Ok(Message::Text(text))) => {
                        if !self.handle_text(&text).await {
                            return SessionEnd::Shutdown;
                        }
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    /// Returns false once the owner stopped listening
    async fn handle_text(&mut self, text: &str) -> bool {
        let message = match ChannelMessage::from_text(text) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!("Unreadable channel message: {}", e);
                return true;
            }
        };

        let event = match message {
            ChannelMessage::Authenticated {
                connection_id,
                user_id,
            } => {
                self.step(ChannelInput::Authenticated);
                let connection_id = connection_id
                    .unwrap_or_else(|| format!("local-{}-{}", std::process::id(), self.attempt));
                tracing::info!("Event channel authenticated as {}", connection_id);
                ChannelEvent::Authenticated {
                    connection_id,
                    user_id,
                }
            }
            _ if self.machine.state() != ChannelState::Open => {
                tracing::debug!("Dropping message received before authentication");
                return true;
            }
            ChannelMessage::Error { message } => {
                let message = message.unwrap_or_else(|| "unknown error".to_string());
                tracing::warn!("Server reported: {}", self.sanitizer.sanitize(&message));
                ChannelEvent::ServerError(message)
            }
            lifecycle => match lifecycle.into_remote_event() {
                Some(event) => ChannelEvent::Remote(event),
                None => {
                    tracing::debug!("Lifecycle message without item id ignored");
                    return true;
                }
            },
        };

        self.events_tx.send(event).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let mut machine = ChannelStateMachine::new();
        assert!(machine.apply(ChannelInput::Connect));
        assert!(machine.apply(ChannelInput::SocketOpened));
        assert_eq!(machine.state(), ChannelState::Authenticating);
        assert!(machine.apply(ChannelInput::Authenticated));
        assert_eq!(machine.state(), ChannelState::Open);
    }

    #[test]
    fn test_no_second_connection_while_live() {
        let mut machine = ChannelStateMachine::new();
        machine.apply(ChannelInput::Connect);
        assert!(!machine.apply(ChannelInput::Connect));
        machine.apply(ChannelInput::SocketOpened);
        machine.apply(ChannelInput::Authenticated);
        assert!(!machine.apply(ChannelInput::Connect));
        assert!(!machine.apply(ChannelInput::ReconnectDue));
        assert_eq!(machine.state(), ChannelState::Open);
    }

    #[test]
    fn test_unexpected_close_reconnects() {
        let mut machine = ChannelStateMachine::new();
        machine.apply(ChannelInput::Connect);
        machine.apply(ChannelInput::SocketOpened);
        machine.apply(ChannelInput::Authenticated);
        machine.apply(ChannelInput::SocketClosed);

        assert!(machine.should_reconnect());
        assert!(machine.apply(ChannelInput::ReconnectDue));
        assert_eq!(machine.state(), ChannelState::Connecting);
    }

    #[test]
    fn test_connect_failure_reconnects() {
        let mut machine = ChannelStateMachine::new();
        machine.apply(ChannelInput::Connect);
        machine.apply(ChannelInput::SocketError);
        assert_eq!(machine.state(), ChannelState::Error);
        assert!(machine.should_reconnect());
    }

    #[test]
    fn test_shutdown_is_final() {
        let mut machine = ChannelStateMachine::new();
        machine.apply(ChannelInput::Connect);
        machine.apply(ChannelInput::SocketOpened);
        machine.apply(ChannelInput::Shutdown);

        assert_eq!(machine.state(), ChannelState::Disconnected);
        assert!(!machine.should_reconnect());
        assert!(!machine.apply(ChannelInput::Connect));
        assert!(!machine.apply(ChannelInput::ReconnectDue));
    }

    #[test]
    fn test_messages_before_authentication_do_not_open() {
        let mut machine = ChannelStateMachine::new();
        machine.apply(ChannelInput::Connect);
        assert!(!machine.apply(ChannelInput::Authenticated));
        assert_eq!(machine.state(), ChannelState::Connecting);
    }
}
