//! Session Manager: the single source of truth for who is signed in
//!
//! State machine: `Anonymous -> Authenticating -> Authenticated -> Anonymous`,
//! with `Authenticating -> Anonymous` on a failed login. Every transition bumps
//! an epoch; requests remember the epoch their credential was attached under so
//! a burst of 401s for one session ends it only once.
//!
//! Storage is never written while the state lock is held: writes notify other
//! handles synchronously, and their reactions may write back.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::consts::{LOGIN_PATH, ROLE_KEY, TOKEN_KEY, USERNAME_KEY};
use crate::core::{Clock, Listeners, Subscription, lock};
use crate::error::{AuthError, HttpError, TokenError};
use crate::http::ApiClient;

use super::storage::StorageHandle;
use super::token::{Claims, TokenValidator, strip_line_breaks};

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Session {
    pub(crate) token: String,
    pub(crate) claims: Claims,
    pub(crate) username: Option<String>,
    pub(crate) role: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SessionState {
    Anonymous,
    Authenticating,
    Authenticated(Session),
}

impl SessionState {
    pub(crate) fn session(&self) -> Option<&Session> {
        match self {
            SessionState::Authenticated(session) => Some(session),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LogoutReason {
    UserRequested,
    /// The server answered 401 to a request made with the session's token
    Unauthorized,
    /// Another handle removed or replaced the token with an unusable one
    ExternalChange,
    /// The stored token failed validation on restore
    Invalid,
    LoginFailed,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SessionEvent {
    LoggedIn(Session),
    /// Adopted from storage: on restore, or after another handle changed it
    Restored(Session),
    LoggedOut(LogoutReason),
}

struct Machine {
    state: SessionState,
    epoch: u64,
}

struct Inner {
    store: StorageHandle,
    validator: TokenValidator,
    clock: Arc<dyn Clock>,
    machine: Mutex<Machine>,
    listeners: Arc<Listeners<SessionEvent>>,
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct LoginReply {
    #[serde(default, alias = "Token")]
    token: Option<String>,
    #[serde(default, alias = "Username")]
    username: Option<String>,
    #[serde(default, alias = "Role")]
    role: Option<String>,
}

#[derive(Clone)]
pub(crate) struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    pub(crate) fn new(store: StorageHandle, validator: TokenValidator, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                validator,
                clock,
                machine: Mutex::new(Machine {
                    state: SessionState::Anonymous,
                    epoch: 0,
                }),
                listeners: Arc::new(Listeners::default()),
            }),
        }
    }

    pub(crate) fn state(&self) -> SessionState {
        lock(&self.inner.machine).state.clone()
    }

    #[cfg(test)]
    pub(crate) fn current(&self) -> Option<Session> {
        lock(&self.inner.machine).state.session().cloned()
    }

    /// Token and epoch of the active session, for attaching to a request.
    pub(crate) fn credential(&self) -> Option<(String, u64)> {
        let machine = lock(&self.inner.machine);
        machine
            .state
            .session()
            .map(|session| (session.token.clone(), machine.epoch))
    }

    /// Rebuild the session from storage. Never fails: anything unusable is
    /// cleared and reported as "no session".
    pub(crate) fn restore(&self) -> Option<Session> {
        let Some(token) = self.inner.store.get(TOKEN_KEY) else {
            tracing::debug!("no stored session");
            self.end_session(LogoutReason::Invalid);
            return None;
        };

        match self.session_from_store(&token) {
            Ok(session) => {
                tracing::debug!(user = ?session.username, "restored stored session");
                self.adopt(session.clone());
                Some(session)
            }
            Err(err) => {
                log_rejected_token(&err, "discarding stored session");
                self.end_session(LogoutReason::Invalid);
                None
            }
        }
    }

    pub(crate) fn login(
        &self,
        api: &ApiClient,
        username: &str,
        password: &str,
    ) -> Result<Session, AuthError> {
        {
            let mut machine = lock(&self.inner.machine);
            machine.state = SessionState::Authenticating;
            machine.epoch += 1;
        }

        match self.try_login(api, username, password) {
            Ok(session) => {
                {
                    let mut machine = lock(&self.inner.machine);
                    machine.state = SessionState::Authenticated(session.clone());
                    machine.epoch += 1;
                }
                tracing::info!(user = ?session.username, role = ?session.role, "logged in");
                self.inner
                    .listeners
                    .emit(&SessionEvent::LoggedIn(session.clone()));
                Ok(session)
            }
            Err(err) => {
                tracing::warn!(error = %err, "login failed");
                self.end_session(LogoutReason::LoginFailed);
                Err(err)
            }
        }
    }

    /// Clear persisted and in-memory identity. Safe without a session.
    pub(crate) fn logout(&self) {
        self.end_session(LogoutReason::UserRequested);
    }

    /// Called when a request sent under `epoch` got a 401. Ends the session
    /// only if that epoch is still the live authenticated one; returns whether
    /// it did.
    pub(crate) fn handle_unauthorized(&self, epoch: u64) -> bool {
        let expired_token = {
            let mut machine = lock(&self.inner.machine);
            if machine.epoch != epoch {
                return false;
            }
            let SessionState::Authenticated(session) = &machine.state else {
                return false;
            };
            let token = session.token.clone();
            machine.state = SessionState::Anonymous;
            machine.epoch += 1;
            token
        };

        tracing::warn!("token expired or revoked by the server; signing out");
        // Leave storage alone if someone already stored a newer token
        if self.inner.store.get(TOKEN_KEY).as_deref() == Some(expired_token.as_str()) {
            self.clear_storage();
        }
        self.inner
            .listeners
            .emit(&SessionEvent::LoggedOut(LogoutReason::Unauthorized));
        true
    }

    pub(crate) fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        self.inner.listeners.subscribe(callback)
    }

    /// Re-validate whenever another handle changes the store, then report the
    /// resulting state to `callback`.
    pub(crate) fn on_external_change<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&SessionState) + Send + Sync + 'static,
    {
        let inner = Arc::downgrade(&self.inner);
        self.inner.store.subscribe(move |event| {
            let Some(inner) = inner.upgrade() else {
                return;
            };
            tracing::debug!(
                key = %event.key,
                had_value = event.old_value.is_some(),
                removed = event.new_value.is_none(),
                "session storage changed elsewhere"
            );
            let manager = SessionManager { inner };
            let state = manager.resync();
            callback(&state);
        })
    }

    fn resync(&self) -> SessionState {
        match self.inner.store.get(TOKEN_KEY) {
            Some(token) => match self.session_from_store(&token) {
                Ok(session) => self.adopt(session),
                Err(err) => {
                    log_rejected_token(&err, "token changed elsewhere is unusable");
                    self.end_session(LogoutReason::ExternalChange);
                }
            },
            None => {
                self.end_session(LogoutReason::ExternalChange);
            }
        }
        self.state()
    }

    fn try_login(&self, api: &ApiClient, username: &str, password: &str) -> Result<Session, AuthError> {
        let reply: LoginReply = api
            .post_json(LOGIN_PATH, &LoginRequest { username, password })
            .map_err(login_http_error)?;

        let raw = reply
            .token
            .filter(|t| !t.trim().is_empty())
            .ok_or(AuthError::MissingToken)?;
        let token = strip_line_breaks(raw.trim());
        let claims = self.inner.validator.validate(&token, self.inner.clock.now_ms())?;

        let username = reply
            .username
            .or_else(|| claims.username().map(str::to_string));
        let role = reply.role.or_else(|| claims.role().map(str::to_string));

        if let Err(err) = self.persist(&token, username.as_deref(), role.as_deref()) {
            self.clear_storage();
            return Err(err.into());
        }

        Ok(Session {
            token,
            claims,
            username,
            role,
        })
    }

    fn persist(
        &self,
        token: &str,
        username: Option<&str>,
        role: Option<&str>,
    ) -> Result<(), crate::error::StorageError> {
        let store = &self.inner.store;
        store.set(TOKEN_KEY, token)?;
        match username {
            Some(username) => store.set(USERNAME_KEY, username)?,
            None => store.remove(USERNAME_KEY)?,
        }
        match role {
            Some(role) => store.set(ROLE_KEY, role)?,
            None => store.remove(ROLE_KEY)?,
        }
        Ok(())
    }

    fn session_from_store(&self, token: &str) -> Result<Session, TokenError> {
        let claims = self.inner.validator.validate(token, self.inner.clock.now_ms())?;
        let username = self
            .inner
            .store
            .get(USERNAME_KEY)
            .or_else(|| claims.username().map(str::to_string));
        let role = self
            .inner
            .store
            .get(ROLE_KEY)
            .or_else(|| claims.role().map(str::to_string));
        Ok(Session {
            token: token.to_string(),
            claims,
            username,
            role,
        })
    }

    /// Make `session` current unless it already is.
    fn adopt(&self, session: Session) {
        {
            let mut machine = lock(&self.inner.machine);
            if machine.state.session() == Some(&session) {
                return;
            }
            machine.state = SessionState::Authenticated(session.clone());
            machine.epoch += 1;
        }
        self.inner.listeners.emit(&SessionEvent::Restored(session));
    }

    fn end_session(&self, reason: LogoutReason) {
        let was_active = {
            let mut machine = lock(&self.inner.machine);
            let was_active = !matches!(machine.state, SessionState::Anonymous);
            if was_active {
                machine.state = SessionState::Anonymous;
                machine.epoch += 1;
            }
            was_active
        };

        self.clear_storage();
        if was_active {
            tracing::info!(?reason, "session ended");
            self.inner.listeners.emit(&SessionEvent::LoggedOut(reason));
        }
    }

    fn clear_storage(&self) {
        for key in [TOKEN_KEY, USERNAME_KEY, ROLE_KEY] {
            if let Err(err) = self.inner.store.remove(key) {
                tracing::warn!(key, error = %err, "failed to clear session storage");
            }
        }
    }
}

fn log_rejected_token(err: &TokenError, context: &str) {
    match err {
        TokenError::Malformed { .. } => tracing::info!(error = %err, "{context}: malformed token"),
        TokenError::Expired { .. } | TokenError::MissingExpiry => {
            tracing::info!(error = %err, "{context}: token expired")
        }
        TokenError::IssuerMismatch { .. } | TokenError::AudienceMismatch { .. } => {
            tracing::info!(error = %err, "{context}: claims mismatch")
        }
    }
}

fn login_http_error(err: HttpError) -> AuthError {
    match err {
        HttpError::Unauthorized { body } => AuthError::Rejected {
            message: rejection_message(&body),
        },
        HttpError::Status { status, body } if (400..500).contains(&status) => AuthError::Rejected {
            message: rejection_message(&body),
        },
        other => AuthError::Http(other),
    }
}

/// Pull a human-readable reason out of an error body.
fn rejection_message(body: &str) -> String {
    match serde_json::from_str::<Value>(body) {
        Ok(Value::String(text)) if !text.trim().is_empty() => return text,
        Ok(value) => {
            for key in ["message", "error", "title", "detail"] {
                if let Some(text) = value.get(key).and_then(Value::as_str) {
                    return text.to_string();
                }
            }
        }
        Err(_) if !body.trim().is_empty() => return body.trim().to_string(),
        Err(_) => {}
    }
    "Invalid username or password".to_string()
}
