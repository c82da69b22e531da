//! Login and session persistence.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::remote::{MessageApi, RemoteError, RemoteUser};

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSession {
    pub token: String,
    pub user: RemoteUser,
}

impl fmt::Debug for AuthSession {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AuthSession")
            .field("token", &"[REDACTED]")
            .field("user", &self.user)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid email or password")]
    InvalidCredentials,
    #[error("Not signed in")]
    NotSignedIn,
    #[error("Session expired; sign in again")]
    SessionExpired,
    #[error("Invalid input: {0}")]
    InvalidInput(&'static str),
    #[error("Auth request failed: {0}")]
    Remote(#[from] RemoteError),
    #[error("Secure storage error: {0}")]
    SecureStorage(String),
}

pub type AuthResult<T> = Result<T, AuthError>;

pub trait SessionPersistence: Send + Sync {
    fn load_session(&self) -> AuthResult<Option<AuthSession>>;
    fn save_session(&self, session: &AuthSession) -> AuthResult<()>;
    fn clear_session(&self) -> AuthResult<()>;
}

/// Logs in against the message API and keeps its bearer token current
pub struct AuthClient<S: SessionPersistence> {
    api: Arc<dyn MessageApi>,
    store: S,
}

impl<S: SessionPersistence> AuthClient<S> {
    pub fn new(api: Arc<dyn MessageApi>, store: S) -> Self {
        Self { api, store }
    }

    /// Load a persisted session and hand its token to the API client
    pub fn restore_session(&self) -> AuthResult<Option<AuthSession>> {
        let session = self.store.load_session()?;
        self.api
            .set_token(session.as_ref().map(|session| session.token.clone()));
        Ok(session)
    }

    pub async fn login(&self, email: &str, password: &str) -> AuthResult<AuthSession> {
        validate_credentials(email, password)?;

        let response = match self.api.login(email.trim(), password).await {
            Ok(response) => response,
            Err(RemoteError::Unauthorized) => return Err(AuthError::InvalidCredentials),
            Err(error) => return Err(error.into()),
        };

        let session = AuthSession {
            token: response.token,
            user: response.user,
        };
        self.store.save_session(&session)?;
        self.api.set_token(Some(session.token.clone()));
        tracing::info!(user = %session.user.email, "Signed in");
        Ok(session)
    }

    pub fn logout(&self) -> AuthResult<()> {
        self.api.set_token(None);
        self.store.clear_session()
    }

    /// Change the account email, keeping the stored session in step
    pub async fn update_email(&self, email: &str) -> AuthResult<AuthSession> {
        let email = email.trim();
        if email.is_empty() || !email.contains('@') {
            return Err(AuthError::InvalidInput("A valid email is required"));
        }

        let mut session = self.signed_in()?;
        self.api.update_email(email).await.map_err(session_error)?;
        session.user.email = email.to_string();
        self.store.save_session(&session)?;
        tracing::info!(user = %session.user.email, "Account email updated");
        Ok(session)
    }

    /// Change the account display name, keeping the stored session in step
    pub async fn update_username(&self, username: &str) -> AuthResult<AuthSession> {
        let username = username.trim();
        if username.is_empty() {
            return Err(AuthError::InvalidInput("Username must not be empty"));
        }

        let mut session = self.signed_in()?;
        self.api.update_username(username).await.map_err(session_error)?;
        session.user.username = Some(username.to_string());
        self.store.save_session(&session)?;
        tracing::info!(user = %session.user.email, "Account username updated");
        Ok(session)
    }

    fn signed_in(&self) -> AuthResult<AuthSession> {
        self.restore_session()?.ok_or(AuthError::NotSignedIn)
    }
}

fn session_error(error: RemoteError) -> AuthError {
    match error {
        RemoteError::Unauthorized => AuthError::SessionExpired,
        other => AuthError::Remote(other),
    }
}

fn validate_credentials(email: &str, password: &str) -> AuthResult<()> {
    let email = email.trim();
    if email.is_empty() || !email.contains('@') {
        return Err(AuthError::InvalidInput("A valid email is required"));
    }
    if password.is_empty() {
        return Err(AuthError::InvalidInput("Password must not be empty"));
    }
    Ok(())
}
