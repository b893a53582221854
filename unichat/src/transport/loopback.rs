//! Loopback connector for testing.
//!
//! Every successful [`LoopbackConnector::connect`] creates an in-process
//! link and hands its server end, a [`LoopbackPeer`], to the test through
//! the receiver returned by [`LoopbackConnector::new`]. Frames written by the
//! client arrive at the peer and frames the peer sends arrive at the client.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;

use super::{ChannelError, Connector, FrameLink};

/// In-process [`Connector`] backed by unbounded `mpsc` channels.
#[derive(Debug)]
pub struct LoopbackConnector {
    peers: mpsc::UnboundedSender<LoopbackPeer>,
    refuse: AtomicBool,
}

impl LoopbackConnector {
    /// Creates a connector and the receiver on which the server end of each
    /// new link is delivered.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<LoopbackPeer>) {
        let (peers, peer_rx) = mpsc::unbounded_channel();
        let connector = Self {
            peers,
            refuse: AtomicBool::new(false),
        };
        (connector, peer_rx)
    }

    /// When `refuse` is set, connection attempts fail.
    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }
}

impl Connector for LoopbackConnector {
    type Link = LoopbackLink;

    async fn connect(&self, url: &str) -> Result<LoopbackLink, ChannelError> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(ChannelError::Connect(format!("{url}: connection refused")));
        }
        let (to_peer, from_client) = mpsc::unbounded_channel();
        let (to_client, from_peer) = mpsc::unbounded_channel();
        let peer = LoopbackPeer {
            url: url.to_string(),
            tx: to_client,
            rx: from_client,
        };
        self.peers
            .send(peer)
            .map_err(|_| ChannelError::Connect(format!("{url}: no server listening")))?;
        Ok(LoopbackLink {
            tx: Some(to_peer),
            rx: from_peer,
        })
    }
}

/// Client end of a loopback link.
#[derive(Debug)]
pub struct LoopbackLink {
    tx: Option<mpsc::UnboundedSender<String>>,
    rx: mpsc::UnboundedReceiver<String>,
}

impl FrameLink for LoopbackLink {
    async fn send_text(&mut self, text: String) -> Result<(), ChannelError> {
        let tx = self.tx.as_ref().ok_or(ChannelError::Closed)?;
        tx.send(text).map_err(|_| ChannelError::Closed)
    }

    async fn next_text(&mut self) -> Option<Result<String, ChannelError>> {
        self.rx.recv().await.map(Ok)
    }

    async fn close(&mut self) {
        self.tx = None;
        self.rx.close();
    }
}

/// Server end of a loopback link, driven by the test.
#[derive(Debug)]
pub struct LoopbackPeer {
    url: String,
    tx: mpsc::UnboundedSender<String>,
    rx: mpsc::UnboundedReceiver<String>,
}

impl LoopbackPeer {
    /// URL the client connected to.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Delivers a frame to the client. Returns `false` if the client end is
    /// gone.
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.tx.send(text.into()).is_ok()
    }

    /// Next frame written by the client, or `None` once the client closed.
    pub async fn recv_text(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    /// Closes the link from the server side.
    pub fn close(self) {
        drop(self);
    }
}
