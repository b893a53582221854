//! Request bodies and response parsing for the authentication endpoints.

use serde::{Deserialize, Serialize};

/// Body of `POST /api/auth`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthRequest {
    /// Login name.
    pub username: String,
    /// Plain-text password (the transport is responsible for protecting it).
    pub password: String,
}

/// Body of `POST /api/exists`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExistsRequest {
    /// User id to check.
    pub id: String,
}

/// Identity fields carried by a successful auth response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityToken {
    /// Server-issued user id.
    pub user_id: String,
    /// Display name, when the server sent `id;displayName`.
    pub display_name: Option<String>,
}

/// Error returned when an auth response body carries no usable identity.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityParseError {
    /// The body is empty once whitespace and quotes are removed.
    #[error("response body contains no user id")]
    Empty,
}

/// Separator between user id and display name in auth responses.
const IDENTITY_SEPARATOR: char = ';';

/// Parses the body of a successful `POST /api/auth` response.
///
/// Accepts a plain id (`u1`) or `id;displayName` (`u1;alice`), with or
/// without surrounding quote characters on the whole body or on either part.
///
/// # Errors
///
/// Returns [`IdentityParseError::Empty`] if no user id remains after trimming.
pub fn parse_identity_body(body: &str) -> Result<IdentityToken, IdentityParseError> {
    let body = strip_quotes(body);
    let (raw_id, raw_name) = match body.split_once(IDENTITY_SEPARATOR) {
        Some((id, name)) => (id, Some(name)),
        None => (body, None),
    };

    let user_id = strip_quotes(raw_id);
    if user_id.is_empty() {
        return Err(IdentityParseError::Empty);
    }
    let display_name = raw_name
        .map(strip_quotes)
        .filter(|name| !name.is_empty())
        .map(str::to_string);

    Ok(IdentityToken {
        user_id: user_id.to_string(),
        display_name,
    })
}

fn strip_quotes(text: &str) -> &str {
    text.trim().trim_matches(|c| c == '"' || c == '\'').trim()
}
