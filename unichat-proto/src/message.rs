//! Message records exchanged with the chat server.
//!
//! The same record shape is used by the history endpoint and inside
//! WebSocket frames. Servers are inconsistent about scalar types (ids may be
//! numbers, timestamps may be epoch millis or ISO-8601 strings), so
//! deserialization is lenient and [`MessageCandidate`] is the validated,
//! canonical form handed to the client.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Millisecond-precision UTC timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Creates a timestamp for the current instant.
    #[must_use]
    pub fn now() -> Self {
        Self(chrono::Utc::now().timestamp_millis())
    }

    /// Creates a timestamp from milliseconds since the UNIX epoch.
    #[must_use]
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Returns the timestamp as milliseconds since the UNIX epoch.
    #[must_use]
    pub const fn as_millis(&self) -> i64 {
        self.0
    }

    /// Parses a timestamp from its textual wire forms.
    ///
    /// Accepts RFC 3339 (`2024-05-01T10:00:00Z`), zone-less ISO-8601 local
    /// date-times (read as UTC), and decimal epoch milliseconds.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(text) {
            return Some(Self(dt.timestamp_millis()));
        }
        if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f") {
            return Some(Self(naive.and_utc().timestamp_millis()));
        }
        text.parse::<i64>().ok().map(Self)
    }

    fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f as i64))
                .map(Self),
            Value::String(s) => Self::parse(s),
            _ => None,
        }
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// A message record as it appears on the wire.
///
/// Every field is optional at this level; [`MessageCandidate::try_from`]
/// enforces the required ones.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageDto {
    /// Server-assigned message id (string or number on the wire).
    #[serde(
        default,
        deserialize_with = "deserialize_scalar",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<String>,
    /// Sender's user id.
    #[serde(
        default,
        deserialize_with = "deserialize_scalar",
        skip_serializing_if = "Option::is_none"
    )]
    pub sender: Option<String>,
    /// Sender's display name, when the server includes it.
    #[serde(
        default,
        deserialize_with = "deserialize_scalar",
        skip_serializing_if = "Option::is_none"
    )]
    pub username: Option<String>,
    /// Message text.
    #[serde(
        default,
        deserialize_with = "deserialize_scalar",
        skip_serializing_if = "Option::is_none"
    )]
    pub content: Option<String>,
    /// When the server accepted the message.
    #[serde(
        default,
        deserialize_with = "deserialize_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<Timestamp>,
}

impl MessageDto {
    /// Creates a record with the two required fields set.
    #[must_use]
    pub fn new(sender: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            sender: Some(sender.into()),
            content: Some(content.into()),
            ..Self::default()
        }
    }

    /// Sets the server id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Sets the sender display name.
    #[must_use]
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Sets the server timestamp.
    #[must_use]
    pub const fn with_timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

/// Why a wire record could not become a [`MessageCandidate`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CandidateError {
    /// No sender id (absent or empty).
    #[error("message has no sender")]
    MissingSender,
    /// No content (absent or empty).
    #[error("message has no content")]
    MissingContent,
}

/// A validated, server-confirmed message in canonical form.
///
/// All inbound shapes (history records, enveloped and flat frames) are
/// reduced to this before they reach the message log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageCandidate {
    /// Server id, if the server sent one.
    pub id: Option<String>,
    /// Sender's user id.
    pub sender_id: String,
    /// Name to display for the sender (username, falling back to the id).
    pub author_name: String,
    /// Message text.
    pub text: String,
    /// Server timestamp, if present and parseable.
    pub timestamp: Option<Timestamp>,
}

impl TryFrom<MessageDto> for MessageCandidate {
    type Error = CandidateError;

    fn try_from(dto: MessageDto) -> Result<Self, Self::Error> {
        let sender_id = dto
            .sender
            .filter(|s| !s.is_empty())
            .ok_or(CandidateError::MissingSender)?;
        let text = dto
            .content
            .filter(|c| !c.is_empty())
            .ok_or(CandidateError::MissingContent)?;
        let author_name = dto
            .username
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| sender_id.clone());

        Ok(Self {
            id: dto.id,
            sender_id,
            author_name,
            text,
            timestamp: dto.timestamp,
        })
    }
}

/// Accepts a JSON string or number and yields its string form.
///
/// Empty strings and other JSON types are treated as absent.
pub(crate) fn deserialize_scalar<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(match raw {
        Some(Value::String(s)) if !s.is_empty() => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<Option<Timestamp>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(raw.as_ref().and_then(Timestamp::from_json))
}
