//! Session lifecycle.
//!
//! Owns the authenticated identity and the credential store. Every other
//! component reads identity from here; none of them touches the store.
//!
//! ```text
//! Anonymous ──login/signup──▶ Authenticating ──ok──▶ Authenticated
//!     │                            └──err──▶ Anonymous        │
//!     └──restore──▶ Restoring ──ok──────────────────────────▶ │
//!                     ├──rejected──▶ Anonymous                │
//!                     └──unreachable──▶ Failed         logout/expired
//!                                                             ▼
//!                                                         Anonymous
//! ```

use parley_proto::{ApiRequest, ApiResponse, Credentials, ProfileUpdate, RequestId, SignupForm, User, UserId};

use crate::{
    credentials::{CredentialStore, StoredCredential},
    error::{ApiError, ClientError},
    validation,
};

/// Session state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// No identity.
    Anonymous,
    /// Stored credential being validated against the server.
    Restoring,
    /// Login or signup in flight.
    Authenticating,
    /// Identity established.
    Authenticated {
        /// Current account
        user: User,
        /// Bearer token for persistence calls
        token: String,
    },
    /// Restore could not reach the server. The stored credential is kept so a
    /// later restore can try again.
    Failed {
        /// What went wrong
        reason: String,
    },
}

/// Payload-free view of [`SessionState`] for change notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// See [`SessionState::Anonymous`].
    Anonymous,
    /// See [`SessionState::Restoring`].
    Restoring,
    /// See [`SessionState::Authenticating`].
    Authenticating,
    /// See [`SessionState::Authenticated`].
    Authenticated,
    /// See [`SessionState::Failed`].
    Failed,
}

impl SessionState {
    /// Payload-free status.
    pub fn status(&self) -> SessionStatus {
        match self {
            Self::Anonymous => SessionStatus::Anonymous,
            Self::Restoring => SessionStatus::Restoring,
            Self::Authenticating => SessionStatus::Authenticating,
            Self::Authenticated { .. } => SessionStatus::Authenticated,
            Self::Failed { .. } => SessionStatus::Failed,
        }
    }

    fn describe(&self) -> &'static str {
        match self {
            Self::Anonymous => "logged out",
            Self::Restoring => "restoring the session",
            Self::Authenticating => "logging in",
            Self::Authenticated { .. } => "logged in",
            Self::Failed { .. } => "the session failed",
        }
    }
}

/// Effects requested by the session manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    /// Issue a persistence call.
    Request {
        /// Correlation id for the completion
        id: RequestId,
        /// The call
        request: ApiRequest,
        /// Bearer token, for calls that need one
        token: Option<String>,
    },
    /// Bind the push connection to this identity.
    Connect(UserId),
    /// Tear down the push connection.
    Disconnect,
    /// Session status changed.
    Changed(SessionStatus),
    /// The server rejected the token of an established session.
    Expired,
    /// User-visible failure.
    Failed(ClientError),
    /// User-visible success message.
    Info(String),
}

/// Session state machine.
#[derive(Debug)]
pub struct SessionManager<S> {
    state: SessionState,
    store: S,
    restoring: Option<StoredCredential>,
    pending: Option<RequestId>,
    profile_update: Option<RequestId>,
}

impl<S: CredentialStore> SessionManager<S> {
    /// Create an anonymous session backed by `store`.
    pub fn new(store: S) -> Self {
        Self { state: SessionState::Anonymous, store, restoring: None, pending: None, profile_update: None }
    }

    /// Current state.
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Current status.
    pub fn status(&self) -> SessionStatus {
        self.state.status()
    }

    /// Authenticated account.
    pub fn user(&self) -> Option<&User> {
        match &self.state {
            SessionState::Authenticated { user, .. } => Some(user),
            _ => None,
        }
    }

    /// Authenticated identity.
    pub fn identity(&self) -> Option<&UserId> {
        self.user().map(|u| &u.id)
    }

    /// Bearer token of the established session.
    pub fn token(&self) -> Option<&str> {
        match &self.state {
            SessionState::Authenticated { token, .. } => Some(token),
            _ => None,
        }
    }

    /// Credential store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Whether `id` is a call this manager is waiting on.
    pub fn owns(&self, id: RequestId) -> bool {
        self.pending == Some(id) || self.profile_update == Some(id)
    }

    /// Validate the stored credential, if there is one.
    ///
    /// # Errors
    ///
    /// `InvalidState` unless anonymous or failed.
    pub fn restore(&mut self, id: RequestId) -> Result<Vec<SessionAction>, ClientError> {
        self.expect_idle("restore the session")?;

        let stored = match self.store.load() {
            Ok(stored) => stored,
            Err(err) => {
                tracing::warn!(%err, "ignoring unreadable credential store");
                None
            },
        };

        let Some(credential) = stored else {
            tracing::debug!("no stored credential");
            return Ok(self.transition(SessionState::Anonymous));
        };

        tracing::info!(user = %credential.user.id, "restoring session");
        let token = credential.token.clone();
        self.restoring = Some(credential);
        self.pending = Some(id);
        let mut actions = self.transition(SessionState::Restoring);
        actions.push(SessionAction::Request { id, request: ApiRequest::FetchProfile, token: Some(token) });
        Ok(actions)
    }

    /// Log in with email and password.
    ///
    /// # Errors
    ///
    /// `Validation` if a field check fails, `InvalidState` unless anonymous
    /// or failed. Nothing is sent in either case.
    pub fn login(&mut self, id: RequestId, credentials: Credentials) -> Result<Vec<SessionAction>, ClientError> {
        validation::check_credentials(&credentials)?;
        self.expect_idle("log in")?;
        Ok(self.authenticate(id, ApiRequest::Login(credentials)))
    }

    /// Create an account and log in.
    ///
    /// # Errors
    ///
    /// Same as [`Self::login`].
    pub fn signup(&mut self, id: RequestId, form: SignupForm) -> Result<Vec<SessionAction>, ClientError> {
        validation::check_signup(&form)?;
        self.expect_idle("sign up")?;
        Ok(self.authenticate(id, ApiRequest::Signup(form)))
    }

    /// End the session.
    ///
    /// The remote logout is best effort; local state is cleared regardless.
    pub fn logout(&mut self, id: RequestId) -> Vec<SessionAction> {
        let remote = self.token().map(|token| SessionAction::Request {
            id,
            request: ApiRequest::Logout,
            token: Some(token.to_string()),
        });

        self.clear_store();
        self.restoring = None;
        self.pending = None;
        self.profile_update = None;

        let mut actions: Vec<_> = remote.into_iter().collect();
        actions.push(SessionAction::Disconnect);
        actions.extend(self.transition(SessionState::Anonymous));
        actions
    }

    /// Change display name or status.
    ///
    /// # Errors
    ///
    /// `InvalidState` unless authenticated.
    pub fn update_profile(&mut self, id: RequestId, update: ProfileUpdate) -> Result<Vec<SessionAction>, ClientError> {
        let Some(token) = self.token().map(str::to_string) else {
            return Err(ClientError::InvalidState { operation: "update the profile", state: self.state.describe() });
        };
        self.profile_update = Some(id);
        Ok(vec![SessionAction::Request { id, request: ApiRequest::UpdateProfile(update), token: Some(token) }])
    }

    /// Completion of a call issued by this manager. Unknown ids are ignored.
    pub fn handle_response(&mut self, id: RequestId, result: Result<ApiResponse, ApiError>) -> Vec<SessionAction> {
        if self.profile_update == Some(id) {
            self.profile_update = None;
            return self.profile_updated(result);
        }
        if self.pending != Some(id) {
            tracing::debug!(%id, "ignoring stale session response");
            return Vec::new();
        }
        self.pending = None;

        match (self.state.status(), result) {
            (SessionStatus::Restoring, Ok(ApiResponse::Profile(user))) => {
                let token = self.restoring.take().map(|c| c.token).unwrap_or_default();
                self.establish(user, token)
            },
            (SessionStatus::Restoring, Err(err)) if is_rejection(&err) => {
                tracing::info!(%err, "stored credential rejected");
                self.restoring = None;
                self.clear_store();
                self.transition(SessionState::Anonymous)
            },
            (SessionStatus::Restoring, result) => {
                let reason = failure_reason(result);
                tracing::warn!(%reason, "session restore failed");
                self.restoring = None;
                let mut actions = self.transition(SessionState::Failed { reason: reason.clone() });
                actions.push(SessionAction::Failed(ClientError::Network(reason)));
                actions
            },
            (SessionStatus::Authenticating, Ok(ApiResponse::Authenticated(auth))) => {
                let mut actions = self.establish(auth.user, auth.token);
                if let Some(user) = self.user() {
                    actions.push(SessionAction::Info(format!("Welcome, {}!", user.username)));
                }
                actions
            },
            (SessionStatus::Authenticating, Err(err)) => {
                tracing::info!(%err, "authentication failed");
                let mut actions = self.transition(SessionState::Anonymous);
                actions.push(SessionAction::Failed(ClientError::from_api(err, true)));
                actions
            },
            (SessionStatus::Authenticating, Ok(other)) => {
                let reason = failure_reason(Ok(other));
                let mut actions = self.transition(SessionState::Anonymous);
                actions.push(SessionAction::Failed(ClientError::Network(reason)));
                actions
            },
            (status, _) => {
                tracing::debug!(%id, ?status, "session response no longer applies");
                Vec::new()
            },
        }
    }

    /// The server rejected the token of an established session.
    pub fn expire(&mut self) -> Vec<SessionAction> {
        if !matches!(self.state, SessionState::Authenticated { .. }) {
            return Vec::new();
        }
        tracing::info!("session expired");
        self.clear_store();
        self.profile_update = None;

        let mut actions = vec![SessionAction::Disconnect];
        actions.extend(self.transition(SessionState::Anonymous));
        actions.push(SessionAction::Expired);
        actions.push(SessionAction::Failed(ClientError::Auth("session expired, please log in again".into())));
        actions
    }

    fn authenticate(&mut self, id: RequestId, request: ApiRequest) -> Vec<SessionAction> {
        tracing::debug!(%id, call = request.name(), "authenticating");
        self.pending = Some(id);
        let mut actions = self.transition(SessionState::Authenticating);
        actions.push(SessionAction::Request { id, request, token: None });
        actions
    }

    fn establish(&mut self, user: User, token: String) -> Vec<SessionAction> {
        let credential = StoredCredential { token: token.clone(), user: user.clone() };
        if let Err(err) = self.store.save(&credential) {
            tracing::warn!(%err, "could not persist credential");
        }

        tracing::info!(user = %user.id, "session established");
        let identity = user.id.clone();
        let mut actions = self.transition(SessionState::Authenticated { user, token });
        actions.push(SessionAction::Connect(identity));
        actions
    }

    fn profile_updated(&mut self, result: Result<ApiResponse, ApiError>) -> Vec<SessionAction> {
        match result {
            Ok(ApiResponse::Profile(updated)) => {
                let SessionState::Authenticated { user, token } = &mut self.state else {
                    return Vec::new();
                };
                *user = updated;
                let credential = StoredCredential { token: token.clone(), user: user.clone() };
                if let Err(err) = self.store.save(&credential) {
                    tracing::warn!(%err, "could not persist credential");
                }
                vec![SessionAction::Info("Profile updated".into())]
            },
            Err(err) if err.is_unauthorized() => self.expire(),
            Err(err) => vec![SessionAction::Failed(ClientError::from_api(err, false))],
            Ok(other) => vec![SessionAction::Failed(ClientError::Network(failure_reason(Ok(other))))],
        }
    }

    fn transition(&mut self, next: SessionState) -> Vec<SessionAction> {
        let changed = self.state.status() != next.status();
        self.state = next;
        if changed { vec![SessionAction::Changed(self.state.status())] } else { Vec::new() }
    }

    fn expect_idle(&self, operation: &'static str) -> Result<(), ClientError> {
        match self.state {
            SessionState::Anonymous | SessionState::Failed { .. } => Ok(()),
            _ => Err(ClientError::InvalidState { operation, state: self.state.describe() }),
        }
    }

    fn clear_store(&mut self) {
        if let Err(err) = self.store.clear() {
            tracing::warn!(%err, "could not clear credential store");
        }
    }
}

fn is_rejection(err: &ApiError) -> bool {
    matches!(err, ApiError::Unauthorized(_) | ApiError::Rejected { status: 400..=499, .. })
}

fn failure_reason<T>(result: Result<T, ApiError>) -> String {
    match result {
        Err(err) => err.to_string(),
        Ok(_) => "unexpected response".to_string(),
    }
}
