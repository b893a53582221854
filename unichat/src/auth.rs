//! Authentication state and the login / session-restore flows.
//!
//! [`AuthSession`] owns the single [`AuthState`] of the process. Both network
//! flows are available in one piece ([`AuthSession::login`],
//! [`AuthSession::check_stored_identity`]) and split into a request phase and
//! a completion phase, so a caller running the request on another task can
//! apply the result later:
//!
//! ```text
//! begin_check() ──► verify(api, id) ──► finish_check(identity, result)
//! authenticate(api, user, pass)     ──► finish_login(result)
//! ```

use std::sync::Arc;

use unichat_proto::auth::parse_identity_body;

use crate::api::{ApiError, ChatApi};
use crate::session::{Identity, KeyValueStore, SessionStore};

/// Authentication state of the client.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AuthState {
    /// Nothing is known yet.
    #[default]
    Unknown,
    /// A stored identity is being validated with the server.
    Checking,
    /// Logged in as the given identity.
    Authenticated(Identity),
    /// No valid identity; only a successful login leaves this state.
    Unauthenticated,
}

impl AuthState {
    /// The identity, if authenticated.
    #[must_use]
    pub const fn identity(&self) -> Option<&Identity> {
        match self {
            Self::Authenticated(identity) => Some(identity),
            _ => None,
        }
    }

    /// Whether the state is [`AuthState::Authenticated`].
    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated(_))
    }
}

impl std::fmt::Display for AuthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            Self::Checking => write!(f, "checking session"),
            Self::Authenticated(identity) => write!(f, "logged in as {}", identity.display_name),
            Self::Unauthenticated => write!(f, "logged out"),
        }
    }
}

/// A failed login, one variant per failure class.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// The server rejected the request.
    #[error("login failed (HTTP {status}): {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Error text returned by the server.
        message: String,
    },

    /// The server could not be reached.
    #[error("could not reach the server: {0}")]
    Network(String),

    /// The server answered with a body that carries no identity.
    #[error("unexpected server response: {0}")]
    Parse(String),
}

impl From<ApiError> for AuthError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Status { status, body } => Self::Status {
                status,
                message: body,
            },
            ApiError::Network(reason) => Self::Network(reason),
            ApiError::Decode(reason) => Self::Parse(reason),
        }
    }
}

/// Calls the auth endpoint and parses the identity from its body.
///
/// A body carrying only an id takes `username` as the display name.
///
/// # Errors
///
/// Returns [`AuthError`] classified by failure: rejected, unreachable, or
/// unparseable.
pub async fn authenticate<A: ChatApi>(
    api: &A,
    username: &str,
    password: &str,
) -> Result<Identity, AuthError> {
    let body = api.authenticate(username, password).await?;
    let token = parse_identity_body(&body).map_err(|e| AuthError::Parse(e.to_string()))?;
    let display_name = token
        .display_name
        .unwrap_or_else(|| username.trim().to_string());
    Ok(Identity::new(token.user_id, display_name))
}

/// Asks the server whether `identity` still exists.
///
/// # Errors
///
/// Propagates the [`ApiError`] of the existence check.
pub async fn verify<A: ChatApi>(api: &A, identity: &Identity) -> Result<bool, ApiError> {
    api.user_exists(&identity.user_id).await
}

/// Owner of the authentication state and the persisted identity.
#[derive(Debug)]
pub struct AuthSession<A: ChatApi, K: KeyValueStore> {
    api: Arc<A>,
    store: SessionStore<K>,
    state: AuthState,
}

impl<A: ChatApi, K: KeyValueStore> AuthSession<A, K> {
    /// Creates a session in [`AuthState::Unknown`].
    pub const fn new(api: Arc<A>, store: SessionStore<K>) -> Self {
        Self {
            api,
            store,
            state: AuthState::Unknown,
        }
    }

    /// Current state.
    pub const fn state(&self) -> &AuthState {
        &self.state
    }

    /// The authenticated identity, if any.
    pub const fn identity(&self) -> Option<&Identity> {
        self.state.identity()
    }

    /// The API client used for network calls.
    pub const fn api(&self) -> &Arc<A> {
        &self.api
    }

    /// The persisted identity store.
    pub const fn store(&self) -> &SessionStore<K> {
        &self.store
    }

    /// Starts validating the stored identity.
    ///
    /// Returns the identity to verify and enters [`AuthState::Checking`], or
    /// enters [`AuthState::Unauthenticated`] and returns `None` when nothing
    /// is stored.
    pub fn begin_check(&mut self) -> Option<Identity> {
        match self.store.load() {
            Some(identity) => {
                tracing::debug!(user_id = %identity.user_id, "validating stored identity");
                self.state = AuthState::Checking;
                Some(identity)
            }
            None => {
                tracing::debug!("no stored identity");
                self.state = AuthState::Unauthenticated;
                None
            }
        }
    }

    /// Applies the result of [`verify`].
    ///
    /// Only a positive answer authenticates. A negative answer or any failure
    /// clears the stored identity. Ignored unless the state is still
    /// [`AuthState::Checking`].
    pub fn finish_check(&mut self, identity: Identity, result: Result<bool, ApiError>) {
        if self.state != AuthState::Checking {
            tracing::debug!(state = %self.state, "ignoring stale identity check");
            return;
        }
        match result {
            Ok(true) => {
                tracing::info!(user_id = %identity.user_id, "restored session");
                self.state = AuthState::Authenticated(identity);
            }
            Ok(false) => {
                tracing::info!(user_id = %identity.user_id, "stored identity no longer exists");
                self.invalidate();
            }
            Err(e) => {
                tracing::warn!(user_id = %identity.user_id, error = %e, "identity check failed");
                self.invalidate();
            }
        }
    }

    /// Validates the stored identity against the server in one step.
    pub async fn check_stored_identity(&mut self) -> &AuthState {
        if let Some(identity) = self.begin_check() {
            let result = verify(self.api.as_ref(), &identity).await;
            self.finish_check(identity, result);
        }
        &self.state
    }

    /// Applies the result of [`authenticate`].
    ///
    /// On success the identity is stored and the state becomes
    /// [`AuthState::Authenticated`]; on failure the state is unchanged.
    ///
    /// # Errors
    ///
    /// Hands back the login error for display.
    pub fn finish_login(&mut self, result: Result<Identity, AuthError>) -> Result<(), AuthError> {
        match result {
            Ok(identity) => {
                if let Err(e) = self.store.save(&identity) {
                    tracing::warn!(error = %e, "failed to persist identity");
                }
                tracing::info!(user_id = %identity.user_id, name = %identity.display_name, "logged in");
                self.state = AuthState::Authenticated(identity);
                Ok(())
            }
            Err(e) => {
                tracing::info!(error = %e, "login failed");
                Err(e)
            }
        }
    }

    /// Logs in with the given credentials in one step.
    ///
    /// # Errors
    ///
    /// Returns the [`AuthError`] of a failed login; the state is unchanged.
    pub async fn login(&mut self, username: &str, password: &str) -> Result<&Identity, AuthError> {
        let result = authenticate(self.api.as_ref(), username, password).await;
        self.finish_login(result)?;
        self.identity()
            .ok_or_else(|| AuthError::Parse("identity missing after login".to_string()))
    }

    /// Clears the stored identity and enters [`AuthState::Unauthenticated`].
    pub fn logout(&mut self) {
        if let Some(identity) = self.state.identity() {
            tracing::info!(user_id = %identity.user_id, "logged out");
        }
        self.invalidate();
    }

    /// The identity to send messages as.
    ///
    /// `None` unless authenticated with a user id still present in the store.
    pub fn sender_identity(&self) -> Option<Identity> {
        self.state
            .identity()
            .filter(|_| self.store.has_user_id())
            .cloned()
    }

    fn invalidate(&mut self) {
        if let Err(e) = self.store.clear() {
            tracing::warn!(error = %e, "failed to clear stored identity");
        }
        self.state = AuthState::Unauthenticated;
    }
}
