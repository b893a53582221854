//! Scripted [`ChatApi`] for testing.
//!
//! Responses are configured up front (or changed between calls) and every
//! call is counted, so tests can assert both what the client did with a
//! response and whether a request was made at all.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;

use unichat_proto::message::MessageDto;

use super::{ApiError, ChatApi};

/// In-process [`ChatApi`] returning scripted responses.
#[derive(Debug)]
pub struct StubApi {
    login: Mutex<Result<String, ApiError>>,
    exists: Mutex<Result<bool, ApiError>>,
    history: Mutex<Result<Vec<MessageDto>, ApiError>>,
    history_gate: Mutex<Option<Arc<Notify>>>,
    login_gate: Mutex<Option<Arc<Notify>>>,
    login_calls: AtomicUsize,
    exists_calls: AtomicUsize,
    history_calls: AtomicUsize,
}

impl Default for StubApi {
    fn default() -> Self {
        Self::new()
    }
}

impl StubApi {
    /// Creates a stub that rejects logins with 401, reports unknown users,
    /// and serves an empty history.
    #[must_use]
    pub fn new() -> Self {
        Self {
            login: Mutex::new(Err(ApiError::Status {
                status: 401,
                body: "Unauthorized".to_string(),
            })),
            exists: Mutex::new(Ok(false)),
            history: Mutex::new(Ok(Vec::new())),
            history_gate: Mutex::new(None),
            login_gate: Mutex::new(None),
            login_calls: AtomicUsize::new(0),
            exists_calls: AtomicUsize::new(0),
            history_calls: AtomicUsize::new(0),
        }
    }

    /// Successful login responses carry `body`.
    #[must_use]
    pub fn with_login(self, body: impl Into<String>) -> Self {
        self.set_login(Ok(body.into()));
        self
    }

    /// Existence checks return `exists`.
    #[must_use]
    pub fn with_exists(self, exists: bool) -> Self {
        self.set_exists(Ok(exists));
        self
    }

    /// History fetches return `records`.
    #[must_use]
    pub fn with_history(self, records: Vec<MessageDto>) -> Self {
        self.set_history(Ok(records));
        self
    }

    /// Replaces the login response.
    pub fn set_login(&self, response: Result<String, ApiError>) {
        *self.login.lock() = response;
    }

    /// Replaces the existence-check response.
    pub fn set_exists(&self, response: Result<bool, ApiError>) {
        *self.exists.lock() = response;
    }

    /// Replaces the history response.
    pub fn set_history(&self, response: Result<Vec<MessageDto>, ApiError>) {
        *self.history.lock() = response;
    }

    /// Holds every later history fetch until the returned [`Notify`] is
    /// signalled (one permit releases one fetch).
    pub fn hold_history(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.history_gate.lock() = Some(Arc::clone(&gate));
        gate
    }

    /// Holds every later login request until the returned [`Notify`] is
    /// signalled. The response is read after release.
    pub fn hold_login(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.login_gate.lock() = Some(Arc::clone(&gate));
        gate
    }

    /// Number of `authenticate` calls so far.
    pub fn login_calls(&self) -> usize {
        self.login_calls.load(Ordering::SeqCst)
    }

    /// Number of `user_exists` calls so far.
    pub fn exists_calls(&self) -> usize {
        self.exists_calls.load(Ordering::SeqCst)
    }

    /// Number of `fetch_history` calls so far.
    pub fn history_calls(&self) -> usize {
        self.history_calls.load(Ordering::SeqCst)
    }
}

impl ChatApi for StubApi {
    async fn authenticate(&self, _username: &str, _password: &str) -> Result<String, ApiError> {
        self.login_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.login_gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.login.lock().clone()
    }

    async fn user_exists(&self, _user_id: &str) -> Result<bool, ApiError> {
        self.exists_calls.fetch_add(1, Ordering::SeqCst);
        self.exists.lock().clone()
    }

    async fn fetch_history(&self) -> Result<Vec<MessageDto>, ApiError> {
        self.history_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.history_gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.history.lock().clone()
    }
}
