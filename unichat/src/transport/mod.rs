//! Real-time message channel to the chat server.
//!
//! A [`TransportChannel`] owns at most one live connection. Each call to
//! [`TransportChannel::open`] tears down the previous connection, starts a
//! new generation and spawns a connection task that reports back through
//! [`ChannelEvent`]s tagged with that generation. Events from older
//! generations are rejected by [`TransportChannel::accept`].
//!
//! Connections are produced by a [`Connector`]. Implementations:
//! - [`ws::WsConnector`] — WebSocket over tokio-tungstenite
//! - [`loopback::LoopbackConnector`] — in-process link for testing

pub mod loopback;
pub mod ws;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use unichat_proto::frame::{FrameError, OutboundFrame, decode_inbound};
use unichat_proto::message::MessageCandidate;

use crate::session::Identity;

/// Default bound on a connection attempt.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Capacity of the per-connection outbound command queue.
const COMMAND_BUFFER: usize = 64;

/// Lifecycle state of the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Never opened.
    #[default]
    Idle,
    /// A connection attempt is in progress.
    Connecting,
    /// Connected; sends are accepted.
    Open,
    /// Closed by the client, the server, or a failure.
    Closed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Connecting => write!(f, "connecting"),
            Self::Open => write!(f, "connected"),
            Self::Closed => write!(f, "disconnected"),
        }
    }
}

/// Errors from channel operations.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// The channel is not open.
    #[error("not connected")]
    NotConnected,

    /// The connection could not be established.
    #[error("connection failed: {0}")]
    Connect(String),

    /// The connection attempt did not finish in time.
    #[error("connection timed out")]
    Timeout,

    /// The connection was closed.
    #[error("connection closed")]
    Closed,

    /// Reading or writing a frame failed.
    #[error("transport I/O error: {0}")]
    Io(String),

    /// An outbound frame could not be encoded.
    #[error("failed to encode frame: {0}")]
    Encode(#[from] FrameError),
}

/// What happened on a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEventKind {
    /// The connection is established.
    Opened,
    /// A message frame arrived and decoded.
    Inbound(MessageCandidate),
    /// Writing the frame for `message_id` failed.
    SendFailed {
        /// Log id of the message that was not sent.
        message_id: String,
    },
    /// The connection ended. `reason` is `None` for a client-initiated close.
    Closed {
        /// Why the connection ended.
        reason: Option<String>,
    },
}

/// An event from the connection task of one generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelEvent {
    /// Generation of the connection that produced the event.
    pub generation: u64,
    /// The event.
    pub kind: ChannelEventKind,
}

/// A bidirectional text-frame link.
pub trait FrameLink: Send + 'static {
    /// Writes one text frame.
    fn send_text(
        &mut self,
        text: String,
    ) -> impl std::future::Future<Output = Result<(), ChannelError>> + Send;

    /// Reads the next text frame. `None` means the peer closed the link.
    fn next_text(
        &mut self,
    ) -> impl std::future::Future<Output = Option<Result<String, ChannelError>>> + Send;

    /// Closes the link. Errors are ignored.
    fn close(&mut self) -> impl std::future::Future<Output = ()> + Send;
}

/// Establishes [`FrameLink`]s to a URL.
pub trait Connector: Send + Sync + 'static {
    /// The link type produced.
    type Link: FrameLink;

    /// Connects to `url`.
    fn connect(
        &self,
        url: &str,
    ) -> impl std::future::Future<Output = Result<Self::Link, ChannelError>> + Send;
}

#[derive(Debug)]
enum LinkCommand {
    Send { message_id: String, frame: String },
}

/// Client end of the real-time channel.
///
/// Dropping the channel stops the connection task.
#[derive(Debug)]
pub struct TransportChannel {
    state: ConnectionState,
    generation: u64,
    identity: Option<Identity>,
    commands: Option<mpsc::Sender<LinkCommand>>,
    task: Option<JoinHandle<()>>,
    events: mpsc::Sender<ChannelEvent>,
    connect_timeout: Duration,
}

impl TransportChannel {
    /// Creates an idle channel whose connection tasks report on `events`.
    #[must_use]
    pub const fn new(events: mpsc::Sender<ChannelEvent>, connect_timeout: Duration) -> Self {
        Self {
            state: ConnectionState::Idle,
            generation: 0,
            identity: None,
            commands: None,
            task: None,
            events,
            connect_timeout,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// Generation of the current (or last) connection.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Opens a connection to `url` for `identity`, replacing any current one.
    ///
    /// Returns the new generation. The outcome arrives later as
    /// [`ChannelEventKind::Opened`] or [`ChannelEventKind::Closed`].
    pub fn open<C: Connector>(&mut self, connector: Arc<C>, url: &str, identity: &Identity) -> u64 {
        self.close();
        self.generation += 1;
        self.state = ConnectionState::Connecting;
        self.identity = Some(identity.clone());

        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        self.commands = Some(command_tx);
        tracing::info!(generation = self.generation, url, "opening channel");
        self.task = Some(tokio::spawn(run_connection(
            connector,
            url.to_string(),
            self.connect_timeout,
            self.generation,
            command_rx,
            self.events.clone(),
        )));
        self.generation
    }

    /// Queues `text` for sending as the current identity.
    ///
    /// Never queued while the channel is not open. A write failure after
    /// this returns is reported as [`ChannelEventKind::SendFailed`].
    ///
    /// # Errors
    ///
    /// - [`ChannelError::NotConnected`] unless the state is
    ///   [`ConnectionState::Open`].
    /// - [`ChannelError::Encode`] if the frame cannot be built.
    /// - [`ChannelError::Closed`] if the connection task has ended or its
    ///   queue is full.
    pub fn send(&self, message_id: &str, text: &str) -> Result<(), ChannelError> {
        let (Some(commands), Some(identity)) = (&self.commands, &self.identity) else {
            return Err(ChannelError::NotConnected);
        };
        if self.state != ConnectionState::Open {
            return Err(ChannelError::NotConnected);
        }
        let frame = OutboundFrame::send(
            text,
            identity.user_id.clone(),
            Some(identity.display_name.clone()),
        )
        .encode()?;
        commands
            .try_send(LinkCommand::Send {
                message_id: message_id.to_string(),
                frame,
            })
            .map_err(|e| {
                tracing::warn!(message_id, error = %e, "channel send queue rejected frame");
                ChannelError::Closed
            })
    }

    /// Checks an event against the current generation and applies its
    /// effect on the state.
    ///
    /// Returns `false` for events of a torn-down connection, which the
    /// caller must ignore.
    pub fn accept(&mut self, event: &ChannelEvent) -> bool {
        if event.generation != self.generation || self.commands.is_none() {
            tracing::debug!(
                generation = event.generation,
                current = self.generation,
                "ignoring stale channel event"
            );
            return false;
        }
        match &event.kind {
            ChannelEventKind::Opened => {
                tracing::info!(generation = self.generation, "channel open");
                self.state = ConnectionState::Open;
            }
            ChannelEventKind::Closed { reason } => {
                tracing::info!(generation = self.generation, reason = ?reason, "channel closed");
                self.state = ConnectionState::Closed;
                self.commands = None;
                self.task = None;
            }
            ChannelEventKind::Inbound(_) | ChannelEventKind::SendFailed { .. } => {}
        }
        true
    }

    /// Closes the current connection, if any.
    ///
    /// An attempt still connecting is aborted. An open connection finishes
    /// the close on its own task. Either way its remaining events are
    /// rejected by [`accept`](Self::accept).
    pub fn close(&mut self) {
        if self.commands.take().is_some() {
            tracing::info!(generation = self.generation, "closing channel");
        }
        if let Some(task) = self.task.take()
            && self.state == ConnectionState::Connecting
        {
            tracing::debug!(generation = self.generation, "aborting connect attempt");
            task.abort();
        }
        self.identity = None;
        if self.state != ConnectionState::Idle {
            self.state = ConnectionState::Closed;
        }
    }
}

impl Drop for TransportChannel {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Connection task: connect, then pump frames until either side closes.
async fn run_connection<C: Connector>(
    connector: Arc<C>,
    url: String,
    connect_timeout: Duration,
    generation: u64,
    mut commands: mpsc::Receiver<LinkCommand>,
    events: mpsc::Sender<ChannelEvent>,
) {
    let emit = |kind| ChannelEvent { generation, kind };

    let connected = tokio::time::timeout(connect_timeout, connector.connect(&url))
        .await
        .unwrap_or(Err(ChannelError::Timeout));
    let mut link = match connected {
        Ok(link) => link,
        Err(e) => {
            tracing::warn!(generation, url = %url, error = %e, "channel connect failed");
            let _ = events
                .send(emit(ChannelEventKind::Closed {
                    reason: Some(e.to_string()),
                }))
                .await;
            return;
        }
    };

    if events.send(emit(ChannelEventKind::Opened)).await.is_err() {
        link.close().await;
        return;
    }

    let reason = loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(LinkCommand::Send { message_id, frame }) => {
                    if let Err(e) = link.send_text(frame).await {
                        tracing::warn!(generation, message_id = %message_id, error = %e, "frame write failed");
                        let _ = events
                            .send(emit(ChannelEventKind::SendFailed { message_id }))
                            .await;
                        link.close().await;
                        break Some(e.to_string());
                    }
                }
                None => {
                    link.close().await;
                    break None;
                }
            },
            inbound = link.next_text() => match inbound {
                Some(Ok(text)) => match decode_inbound(&text) {
                    Ok(candidate) => {
                        if events
                            .send(emit(ChannelEventKind::Inbound(candidate)))
                            .await
                            .is_err()
                        {
                            link.close().await;
                            break None;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(generation, error = %e, "discarding malformed frame");
                    }
                },
                Some(Err(e)) => {
                    tracing::warn!(generation, error = %e, "channel read failed");
                    break Some(e.to_string());
                }
                None => break Some(ChannelError::Closed.to_string()),
            },
        }
    };

    let _ = events.send(emit(ChannelEventKind::Closed { reason })).await;
    tracing::debug!(generation, "connection task exiting");
}
