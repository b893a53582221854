//! WebSocket [`Connector`] over tokio-tungstenite.

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use super::{ChannelError, Connector, FrameLink};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Connects to `ws://` and `wss://` URLs.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl Connector for WsConnector {
    type Link = WsLink;

    async fn connect(&self, url: &str) -> Result<WsLink, ChannelError> {
        let (stream, _response) = connect_async(url).await.map_err(|e| {
            tracing::warn!(url, error = %e, "WebSocket connect failed");
            map_ws_connect_error(e)
        })?;
        tracing::debug!(url, "WebSocket connected");
        Ok(WsLink { stream })
    }
}

/// An established WebSocket connection.
#[derive(Debug)]
pub struct WsLink {
    stream: WsStream,
}

impl FrameLink for WsLink {
    async fn send_text(&mut self, text: String) -> Result<(), ChannelError> {
        self.stream
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| ChannelError::Io(e.to_string()))
    }

    async fn next_text(&mut self) -> Option<Result<String, ChannelError>> {
        while let Some(message) = self.stream.next().await {
            match message {
                Ok(Message::Text(text)) => return Some(Ok(text.as_str().to_string())),
                Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                    Ok(text) => return Some(Ok(text)),
                    Err(_) => tracing::warn!(len = data.len(), "discarding non-UTF-8 binary frame"),
                },
                Ok(Message::Close(frame)) => {
                    tracing::info!(frame = ?frame, "WebSocket closed by server");
                    return None;
                }
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {}
                Err(e) => return Some(Err(ChannelError::Io(e.to_string()))),
            }
        }
        None
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            tracing::debug!(error = %e, "WebSocket close failed");
        }
    }
}

fn map_ws_connect_error(err: tokio_tungstenite::tungstenite::Error) -> ChannelError {
    use tokio_tungstenite::tungstenite::Error as WsError;
    match err {
        WsError::Http(response) => {
            ChannelError::Connect(format!("server answered HTTP {}", response.status()))
        }
        WsError::Url(e) => ChannelError::Connect(format!("invalid URL: {e}")),
        other => ChannelError::Connect(other.to_string()),
    }
}
