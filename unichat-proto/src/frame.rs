//! WebSocket frame encoding and decoding.
//!
//! Outbound frames always use the enveloped form
//! `{"action":"send","messageDTO":{...}}`. Inbound frames arrive in one of
//! three shapes, all reduced to a [`MessageCandidate`] by [`decode_inbound`]:
//!
//! - enveloped: `{"action":"receive","messageDTO":{...},"id":...}`
//! - flat: `{"sender":...,"content":...,"username":...,"id":...}`
//! - legacy flat: `{"author":...,"text":...,"id":...}`

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::message::{CandidateError, MessageCandidate, MessageDto, deserialize_scalar};

/// Action tag of client-to-server message frames.
pub const SEND_ACTION: &str = "send";

/// Action tag of server-to-client message frames.
pub const RECEIVE_ACTION: &str = "receive";

/// Error type for frame encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The frame is not valid JSON, or could not be serialized.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// Valid JSON that matches none of the known message shapes.
    #[error("frame does not match any known message shape")]
    UnknownShape,
    /// Enveloped frame carrying an action other than `receive`.
    #[error("unsupported frame action {0:?}")]
    UnsupportedAction(String),
    /// A known shape with required fields missing.
    #[error("invalid message: {0}")]
    Invalid(#[from] CandidateError),
}

/// Inbound frame shapes, tried in declaration order.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum InboundFrame {
    Enveloped {
        #[serde(default)]
        action: Option<String>,
        #[serde(rename = "messageDTO")]
        message_dto: MessageDto,
        #[serde(default, deserialize_with = "deserialize_scalar")]
        id: Option<String>,
    },
    Legacy {
        author: String,
        text: String,
        #[serde(default, deserialize_with = "deserialize_scalar")]
        id: Option<String>,
    },
    Flat(MessageDto),
}

/// Decodes one inbound text frame into a canonical message candidate.
///
/// # Errors
///
/// - [`FrameError::Json`] if the text is not JSON.
/// - [`FrameError::UnknownShape`] if it is not an object of a known shape.
/// - [`FrameError::UnsupportedAction`] for envelopes not tagged `receive`.
/// - [`FrameError::Invalid`] if sender or content is missing.
pub fn decode_inbound(text: &str) -> Result<MessageCandidate, FrameError> {
    let value: Value = serde_json::from_str(text)?;
    if !value.is_object() {
        return Err(FrameError::UnknownShape);
    }
    let frame = InboundFrame::deserialize(value).map_err(|_| FrameError::UnknownShape)?;

    let dto = match frame {
        InboundFrame::Enveloped {
            action,
            mut message_dto,
            id,
        } => {
            if let Some(action) = action
                && action != RECEIVE_ACTION
            {
                return Err(FrameError::UnsupportedAction(action));
            }
            if message_dto.id.is_none() {
                message_dto.id = id;
            }
            message_dto
        }
        InboundFrame::Legacy { author, text, id } => MessageDto {
            id,
            sender: Some(author),
            content: Some(text),
            ..MessageDto::default()
        },
        InboundFrame::Flat(dto) => dto,
    };

    Ok(MessageCandidate::try_from(dto)?)
}

/// The message body of an outbound frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// Message text, exactly as typed.
    pub content: String,
    /// Sender's user id.
    pub sender: String,
    /// Sender's display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

/// A client-to-server frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundFrame {
    /// Always [`SEND_ACTION`] for frames built by [`OutboundFrame::send`].
    pub action: String,
    /// The message being sent.
    #[serde(rename = "messageDTO")]
    pub message_dto: OutboundMessage,
}

impl OutboundFrame {
    /// Builds a `send` frame.
    #[must_use]
    pub fn send(
        content: impl Into<String>,
        sender: impl Into<String>,
        username: Option<String>,
    ) -> Self {
        Self {
            action: SEND_ACTION.to_string(),
            message_dto: OutboundMessage {
                content: content.into(),
                sender: sender.into(),
                username,
            },
        }
    }

    /// Serializes the frame to its JSON text form.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::Json`] if serialization fails.
    pub fn encode(&self) -> Result<String, FrameError> {
        Ok(serde_json::to_string(self)?)
    }
}
