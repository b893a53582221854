//! reqwest implementation of [`ChatApi`].

use std::time::Duration;

use reqwest::{Client, Response};
use url::Url;

use unichat_proto::auth::{AuthRequest, ExistsRequest};
use unichat_proto::message::MessageDto;

use super::{ApiError, ChatApi};

/// Chat API client over HTTP.
#[derive(Debug, Clone)]
pub struct HttpChatApi {
    client: Client,
    base_url: Url,
}

impl HttpChatApi {
    /// Creates a client for the server at `base_url` (e.g.
    /// `http://localhost:8080/`). Every request is bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Network`] if the HTTP client cannot be built.
    pub fn new(base_url: Url, timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Network(e.to_string()))?;
        Ok(Self { client, base_url })
    }

    /// The server base URL.
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        self.base_url
            .join(path)
            .map_err(|e| ApiError::Network(format!("invalid endpoint {path}: {e}")))
    }
}

impl ChatApi for HttpChatApi {
    async fn authenticate(&self, username: &str, password: &str) -> Result<String, ApiError> {
        let request = AuthRequest {
            username: username.to_string(),
            password: password.to_string(),
        };
        let response = self
            .client
            .post(self.endpoint("api/auth")?)
            .json(&request)
            .send()
            .await
            .map_err(network_error)?;
        success_body(response).await
    }

    async fn user_exists(&self, user_id: &str) -> Result<bool, ApiError> {
        let request = ExistsRequest {
            id: user_id.to_string(),
        };
        let response = self
            .client
            .post(self.endpoint("api/exists")?)
            .json(&request)
            .send()
            .await
            .map_err(network_error)?;
        let body = success_body(response).await?;
        serde_json::from_str(&body).map_err(|e| ApiError::Decode(e.to_string()))
    }

    async fn fetch_history(&self) -> Result<Vec<MessageDto>, ApiError> {
        let response = self
            .client
            .get(self.endpoint("api/messages")?)
            .send()
            .await
            .map_err(network_error)?;
        let body = success_body(response).await?;
        decode_history(&body)
    }
}

/// Decodes a history body record by record.
///
/// The body must be a JSON array. Elements that are not message records are
/// dropped with a warning instead of failing the whole history.
fn decode_history(body: &str) -> Result<Vec<MessageDto>, ApiError> {
    let records: Vec<serde_json::Value> =
        serde_json::from_str(body).map_err(|e| ApiError::Decode(e.to_string()))?;
    let total = records.len();
    let decoded: Vec<MessageDto> = records
        .into_iter()
        .filter_map(|record| match serde_json::from_value(record) {
            Ok(dto) => Some(dto),
            Err(e) => {
                tracing::warn!(error = %e, "skipping undecodable history record");
                None
            }
        })
        .collect();
    if decoded.len() < total {
        tracing::debug!(total, kept = decoded.len(), "history partially decoded");
    }
    Ok(decoded)
}

/// Reads the body, turning non-success statuses into [`ApiError::Status`].
async fn success_body(response: Response) -> Result<String, ApiError> {
    let status = response.status();
    let body = response.text().await.map_err(network_error)?;
    if !status.is_success() {
        tracing::debug!(status = status.as_u16(), "server returned error status");
        let body = if body.trim().is_empty() {
            status.canonical_reason().unwrap_or_default().to_string()
        } else {
            body
        };
        return Err(ApiError::Status {
            status: status.as_u16(),
            body,
        });
    }
    Ok(body)
}

#[allow(clippy::needless_pass_by_value)]
fn network_error(err: reqwest::Error) -> ApiError {
    ApiError::Network(err.to_string())
}
