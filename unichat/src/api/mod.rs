//! HTTP API of the chat server.
//!
//! Defines the [`ChatApi`] trait covering the three REST endpoints the client
//! uses. Implementations:
//! - [`http::HttpChatApi`] — reqwest client against a real server
//! - [`stub::StubApi`] — scripted responses for tests

pub mod http;
pub mod stub;

use unichat_proto::message::MessageDto;

/// Errors from a chat API call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    /// The server answered with a non-success status.
    #[error("HTTP {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body (may be empty).
        body: String,
    },

    /// The request could not be sent or the response not received.
    #[error("network error: {0}")]
    Network(String),

    /// The response body did not have the expected shape.
    #[error("malformed response: {0}")]
    Decode(String),
}

/// Async client for the chat server's REST endpoints.
///
/// All methods catch transport and decoding failures and report them as
/// [`ApiError`]; none of them panic on unexpected server behavior.
pub trait ChatApi: Send + Sync + 'static {
    /// `POST /api/auth`. Returns the raw success body (identity token).
    fn authenticate(
        &self,
        username: &str,
        password: &str,
    ) -> impl std::future::Future<Output = Result<String, ApiError>> + Send;

    /// `POST /api/exists`. Returns whether the server knows `user_id`.
    fn user_exists(
        &self,
        user_id: &str,
    ) -> impl std::future::Future<Output = Result<bool, ApiError>> + Send;

    /// `GET /api/messages`. Returns the history records in server order.
    fn fetch_history(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<MessageDto>, ApiError>> + Send;
}
