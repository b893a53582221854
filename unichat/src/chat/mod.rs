//! Chat orchestration for unichat.
//!
//! Contains the [`ChatController`], a single actor that owns the
//! [`AuthSession`], the [`MessageLog`] and the [`TransportChannel`]. It
//! reacts to authentication transitions by loading history and opening the
//! channel, turns user input into optimistic log entries and outbound frames,
//! and folds channel events back into the log.
//!
//! ```text
//! ChatHandle ── ChatCommand ──►┐
//! channel task ─ ChannelEvent ─►  ChatController ── ChatView ──► watch::Receiver
//! request tasks ─ Completion ──►┘
//! ```
//!
//! Network requests run on spawned tasks and post a completion back. Every
//! completion carries the session epoch it was started in; the epoch moves on
//! every authentication transition, so results that arrive after the session
//! they belong to has ended are dropped.

pub mod log;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use unichat_proto::message::MessageDto;

use crate::api::{ApiError, ChatApi};
use crate::auth::{self, AuthError, AuthSession, AuthState};
use crate::session::{Identity, KeyValueStore, SessionStore};
use crate::transport::{
    ChannelEvent, ChannelEventKind, ConnectionState, Connector, DEFAULT_CONNECT_TIMEOUT,
    TransportChannel,
};

use self::log::{DEFAULT_FAILED_MARKER, Message, MessageLog, ReconcileOutcome};

/// Default capacity of the command, event and completion queues.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Settings for a [`ChatController`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatConfig {
    /// WebSocket URL of the chat server.
    pub websocket_url: String,
    /// Bound on each connection attempt.
    pub connect_timeout: Duration,
    /// Capacity of the internal queues.
    pub channel_capacity: usize,
    /// Text shown in place of messages that could not be sent.
    pub failed_marker: String,
}

impl ChatConfig {
    /// Creates a config for `websocket_url` with default settings.
    #[must_use]
    pub fn new(websocket_url: impl Into<String>) -> Self {
        Self {
            websocket_url: websocket_url.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            failed_marker: DEFAULT_FAILED_MARKER.to_string(),
        }
    }
}

/// Requests from the front-end to the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCommand {
    /// Log in with the given credentials.
    Login {
        /// Login name.
        username: String,
        /// Password.
        password: String,
    },
    /// Log out and drop the session.
    Logout,
    /// Send a chat message.
    Send {
        /// Message text.
        text: String,
    },
    /// Close the channel and stop the controller.
    Shutdown,
}

/// Error returned by [`ChatHandle`] once the controller has stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("chat controller has stopped")]
pub struct ControllerStopped;

/// Cloneable front-end handle for sending [`ChatCommand`]s.
#[derive(Debug, Clone)]
pub struct ChatHandle {
    tx: mpsc::Sender<ChatCommand>,
}

impl ChatHandle {
    /// Sends a raw command.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerStopped`] if the controller is gone.
    pub async fn command(&self, command: ChatCommand) -> Result<(), ControllerStopped> {
        self.tx.send(command).await.map_err(|_| ControllerStopped)
    }

    /// Requests a login.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerStopped`] if the controller is gone.
    pub async fn login(
        &self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<(), ControllerStopped> {
        self.command(ChatCommand::Login {
            username: username.into(),
            password: password.into(),
        })
        .await
    }

    /// Requests a logout.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerStopped`] if the controller is gone.
    pub async fn logout(&self) -> Result<(), ControllerStopped> {
        self.command(ChatCommand::Logout).await
    }

    /// Sends a chat message.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerStopped`] if the controller is gone.
    pub async fn send(&self, text: impl Into<String>) -> Result<(), ControllerStopped> {
        self.command(ChatCommand::Send { text: text.into() }).await
    }

    /// Stops the controller.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerStopped`] if the controller is already gone.
    pub async fn shutdown(&self) -> Result<(), ControllerStopped> {
        self.command(ChatCommand::Shutdown).await
    }
}

/// Snapshot of everything the display shows.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChatView {
    /// Authentication state.
    pub auth: AuthState,
    /// Channel state.
    pub connection: ConnectionState,
    /// Whether a history fetch is in flight.
    pub loading_history: bool,
    /// Whether a login request is in flight.
    pub login_pending: bool,
    /// Messages in display order.
    pub messages: Vec<Message>,
    /// Last error worth showing to the user.
    pub error: Option<String>,
}

impl ChatView {
    /// The message with the given id.
    #[must_use]
    pub fn message(&self, id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }
}

/// Result of a request task, tagged with the epoch it was started in.
#[derive(Debug)]
enum Completion {
    Verified {
        epoch: u64,
        identity: Identity,
        result: Result<bool, ApiError>,
    },
    LoggedIn {
        epoch: u64,
        result: Result<Identity, AuthError>,
    },
    History {
        epoch: u64,
        result: Result<Vec<MessageDto>, ApiError>,
    },
}

impl Completion {
    const fn epoch(&self) -> u64 {
        match self {
            Self::Verified { epoch, .. }
            | Self::LoggedIn { epoch, .. }
            | Self::History { epoch, .. } => *epoch,
        }
    }
}

/// The chat actor.
///
/// Create with [`ChatController::new`], then drive with
/// [`run`](Self::run) (usually on its own task), or with
/// [`start`](Self::start) and [`step`](Self::step).
pub struct ChatController<A: ChatApi, K: KeyValueStore, C: Connector> {
    auth: AuthSession<A, K>,
    connector: Arc<C>,
    log: MessageLog,
    channel: TransportChannel,
    websocket_url: String,
    /// Bumped on every authentication transition.
    epoch: u64,
    history_loading: bool,
    /// The log changed since the current history fetch started.
    log_dirty: bool,
    login_pending: bool,
    error: Option<String>,
    commands: mpsc::Receiver<ChatCommand>,
    channel_events: mpsc::Receiver<ChannelEvent>,
    completion_tx: mpsc::Sender<Completion>,
    completions: mpsc::Receiver<Completion>,
    view: watch::Sender<ChatView>,
}

impl<A: ChatApi, K: KeyValueStore, C: Connector> ChatController<A, K, C> {
    /// Creates a controller, its command handle and the snapshot receiver.
    #[must_use]
    pub fn new(
        api: Arc<A>,
        store: SessionStore<K>,
        connector: Arc<C>,
        config: ChatConfig,
    ) -> (Self, ChatHandle, watch::Receiver<ChatView>) {
        let capacity = config.channel_capacity.max(1);
        let (command_tx, commands) = mpsc::channel(capacity);
        let (event_tx, channel_events) = mpsc::channel(capacity);
        let (completion_tx, completions) = mpsc::channel(capacity);
        let (view, view_rx) = watch::channel(ChatView::default());

        let controller = Self {
            auth: AuthSession::new(api, store),
            connector,
            log: MessageLog::with_failed_marker(config.failed_marker),
            channel: TransportChannel::new(event_tx, config.connect_timeout),
            websocket_url: config.websocket_url,
            epoch: 0,
            history_loading: false,
            log_dirty: false,
            login_pending: false,
            error: None,
            commands,
            channel_events,
            completion_tx,
            completions,
            view,
        };
        (controller, ChatHandle { tx: command_tx }, view_rx)
    }

    /// Starts validating the stored identity and publishes the first view.
    pub fn start(&mut self) {
        self.epoch += 1;
        if let Some(identity) = self.auth.begin_check() {
            let api = Arc::clone(self.auth.api());
            let tx = self.completion_tx.clone();
            let epoch = self.epoch;
            tokio::spawn(async move {
                let result = auth::verify(api.as_ref(), &identity).await;
                let _ = tx
                    .send(Completion::Verified {
                        epoch,
                        identity,
                        result,
                    })
                    .await;
            });
        }
        self.publish();
    }

    /// Processes one command, channel event or completion, then publishes
    /// a new view.
    ///
    /// Returns `false` once the controller has shut down.
    pub async fn step(&mut self) -> bool {
        tokio::select! {
            command = self.commands.recv() => match command {
                Some(ChatCommand::Shutdown) | None => {
                    self.shutdown();
                    return false;
                }
                Some(command) => self.handle_command(command),
            },
            Some(event) = self.channel_events.recv() => self.handle_channel_event(event),
            Some(completion) = self.completions.recv() => self.handle_completion(completion),
        }
        self.publish();
        true
    }

    /// Runs until shut down or every [`ChatHandle`] is dropped.
    pub async fn run(mut self) {
        self.start();
        while self.step().await {}
        tracing::info!("chat controller stopped");
    }

    /// Current authentication state.
    pub const fn auth_state(&self) -> &AuthState {
        self.auth.state()
    }

    /// The message log.
    pub const fn log(&self) -> &MessageLog {
        &self.log
    }

    /// Current channel state.
    pub const fn connection(&self) -> ConnectionState {
        self.channel.state()
    }

    fn handle_command(&mut self, command: ChatCommand) {
        match command {
            ChatCommand::Login { username, password } => self.login(username, password),
            ChatCommand::Logout => self.logout(),
            ChatCommand::Send { text } => self.send(&text),
            ChatCommand::Shutdown => self.shutdown(),
        }
    }

    fn login(&mut self, username: String, password: String) {
        match self.auth.state() {
            AuthState::Unauthenticated => {}
            AuthState::Authenticated(_) => {
                self.error = Some("already logged in".to_string());
                return;
            }
            AuthState::Unknown | AuthState::Checking => {
                self.error = Some("still checking the saved session".to_string());
                return;
            }
        }
        if self.login_pending {
            tracing::debug!("login already in flight");
            return;
        }
        let username = username.trim().to_string();
        if username.is_empty() {
            self.error = Some("username is required".to_string());
            return;
        }

        self.login_pending = true;
        self.error = None;
        let api = Arc::clone(self.auth.api());
        let tx = self.completion_tx.clone();
        let epoch = self.epoch;
        tokio::spawn(async move {
            let result = auth::authenticate(api.as_ref(), &username, &password).await;
            let _ = tx.send(Completion::LoggedIn { epoch, result }).await;
        });
    }

    fn logout(&mut self) {
        self.auth.logout();
        self.end_session();
    }

    fn send(&mut self, text: &str) {
        if text.trim().is_empty() {
            return;
        }
        let Some(identity) = self.auth.sender_identity() else {
            if self.auth.state().is_authenticated() {
                tracing::warn!("stored user id missing, logging out");
                self.logout();
                self.error = Some("session expired, please log in again".to_string());
            } else {
                self.error = Some("log in to send messages".to_string());
            }
            return;
        };

        let id = self
            .log
            .append_optimistic(&identity.user_id, &identity.display_name, text);
        self.log_dirty = true;
        if let Err(e) = self.channel.send(&id, text) {
            tracing::debug!(message_id = %id, error = %e, "send failed immediately");
            self.log.mark_failed(&id);
        }
    }

    fn shutdown(&mut self) {
        self.channel.close();
        self.publish();
    }

    fn handle_channel_event(&mut self, event: ChannelEvent) {
        if !self.channel.accept(&event) {
            return;
        }
        match event.kind {
            ChannelEventKind::Opened => {}
            ChannelEventKind::Inbound(candidate) => {
                let outcome = self.log.reconcile_or_append(candidate);
                if outcome != ReconcileOutcome::Duplicate {
                    self.log_dirty = true;
                }
                tracing::trace!(outcome = ?outcome, "inbound message applied");
            }
            ChannelEventKind::SendFailed { message_id } => {
                self.log.mark_failed(&message_id);
            }
            ChannelEventKind::Closed { reason } => {
                if let Some(reason) = reason {
                    self.error = Some(format!("disconnected: {reason}"));
                }
            }
        }
    }

    fn handle_completion(&mut self, completion: Completion) {
        if completion.epoch() != self.epoch {
            tracing::debug!(
                epoch = completion.epoch(),
                current = self.epoch,
                "discarding stale request result"
            );
            return;
        }
        match completion {
            Completion::Verified {
                identity, result, ..
            } => {
                self.auth.finish_check(identity, result);
                if self.auth.state().is_authenticated() {
                    self.begin_session();
                }
            }
            Completion::LoggedIn { result, .. } => {
                self.login_pending = false;
                match self.auth.finish_login(result) {
                    Ok(()) => self.begin_session(),
                    Err(e) => self.error = Some(e.to_string()),
                }
            }
            Completion::History { result, .. } => {
                self.history_loading = false;
                self.apply_history(result);
            }
        }
    }

    fn apply_history(&mut self, result: Result<Vec<MessageDto>, ApiError>) {
        match result {
            Ok(records) if self.log_dirty => {
                let kept = self.log.merge_history(records);
                tracing::debug!(kept, "merged history with live messages");
            }
            Ok(records) => {
                self.log.replace_all(records);
                tracing::debug!(count = self.log.len(), "history loaded");
            }
            Err(e) => {
                tracing::warn!(error = %e, "history fetch failed");
                if !self.log_dirty {
                    self.log.clear();
                }
                self.error = Some(format!("could not load messages: {e}"));
            }
        }
        self.log_dirty = false;
    }

    /// Entered on every transition into `Authenticated`.
    fn begin_session(&mut self) {
        let Some(identity) = self.auth.identity().cloned() else {
            return;
        };
        self.epoch += 1;
        self.log.clear();
        self.log_dirty = false;
        self.history_loading = true;
        self.error = None;

        let api = Arc::clone(self.auth.api());
        let tx = self.completion_tx.clone();
        let epoch = self.epoch;
        tokio::spawn(async move {
            let result = api.fetch_history().await;
            let _ = tx.send(Completion::History { epoch, result }).await;
        });

        self.channel
            .open(Arc::clone(&self.connector), &self.websocket_url, &identity);
    }

    /// Entered on every transition into `Unauthenticated`.
    fn end_session(&mut self) {
        self.epoch += 1;
        self.channel.close();
        self.log.clear();
        self.log_dirty = false;
        self.history_loading = false;
        self.login_pending = false;
        self.error = None;
    }

    fn publish(&self) {
        self.view.send_replace(ChatView {
            auth: self.auth.state().clone(),
            connection: self.channel.state(),
            loading_history: self.history_loading,
            login_pending: self.login_pending,
            messages: self.log.messages().to_vec(),
            error: self.error.clone(),
        });
    }
}
