//! Remote message API client.
//!
//! Thin adapter over the REST API. Each call yields success, an auth failure,
//! or another failure the reconciler classifies; retry policy lives in the
//! reconciler, never here.

mod http;
#[cfg(test)]
pub(crate) mod testing;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{Message, MessageId};

pub use http::HttpMessageApi;

/// How the reconciler should react to a failed call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Network trouble, timeouts, 408/429 and 5xx: retry with backoff
    Transient,
    /// Any other 4xx: abandon the operation
    Permanent,
    /// 401: stop and re-authenticate
    Auth,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    #[error("Not authenticated")]
    Unauthorized,
    #[error("Network error: {0}")]
    Transport(String),
    #[error("API error: {message}")]
    Status { status: u16, message: String },
    #[error("Invalid response payload: {0}")]
    InvalidResponse(String),
    #[error("Invalid API configuration: {0}")]
    InvalidConfiguration(String),
}

pub type RemoteResult<T> = Result<T, RemoteError>;

impl RemoteError {
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::Unauthorized => ErrorClass::Auth,
            Self::Transport(_) | Self::InvalidResponse(_) => ErrorClass::Transient,
            Self::Status { status, .. } => match *status {
                401 => ErrorClass::Auth,
                408 | 429 | 500..=599 => ErrorClass::Transient,
                _ => ErrorClass::Permanent,
            },
            Self::InvalidConfiguration(_) => ErrorClass::Permanent,
        }
    }

    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Unauthorized => Some(401),
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether the request never got a response
    pub const fn is_connectivity(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

/// Public profile returned by login
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteUser {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: RemoteUser,
}

/// One listing response
///
/// `deleted` and `server_time` are optional extensions; servers that omit
/// them simply send `{"messages": [...]}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePage {
    pub messages: Vec<Message>,
    #[serde(default)]
    pub deleted: Vec<MessageId>,
    #[serde(default)]
    pub server_time: Option<DateTime<Utc>>,
}

/// Operations the sync engine needs from the server
#[async_trait]
pub trait MessageApi: Send + Sync {
    async fn login(&self, email: &str, password: &str) -> RemoteResult<LoginResponse>;

    /// Replace (or clear) the bearer token used for subsequent calls
    fn set_token(&self, token: Option<String>);

    fn has_token(&self) -> bool;

    /// Messages changed after `since`, or all messages when `since` is `None`
    async fn list_messages(&self, since: Option<DateTime<Utc>>) -> RemoteResult<MessagePage>;

    /// Create with a client-generated id; replays of the same id must not duplicate
    async fn create_message(&self, id: MessageId, content: &str) -> RemoteResult<Message>;

    async fn update_message(&self, id: MessageId, content: &str) -> RemoteResult<Message>;

    async fn delete_message(&self, id: MessageId) -> RemoteResult<()>;

    /// Change the signed-in account's email address
    async fn update_email(&self, email: &str) -> RemoteResult<()>;

    /// Change the signed-in account's display name
    async fn update_username(&self, username: &str) -> RemoteResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(status: u16) -> RemoteError {
        RemoteError::Status {
            status,
            message: String::new(),
        }
    }

    #[test]
    fn classifies_errors() {
        assert_eq!(RemoteError::Unauthorized.class(), ErrorClass::Auth);
        assert_eq!(
            RemoteError::Transport("timeout".into()).class(),
            ErrorClass::Transient
        );
        assert_eq!(status(500).class(), ErrorClass::Transient);
        assert_eq!(status(503).class(), ErrorClass::Transient);
        assert_eq!(status(429).class(), ErrorClass::Transient);
        assert_eq!(status(408).class(), ErrorClass::Transient);
        assert_eq!(status(400).class(), ErrorClass::Permanent);
        assert_eq!(status(403).class(), ErrorClass::Permanent);
        assert_eq!(status(404).class(), ErrorClass::Permanent);
        assert_eq!(status(401).class(), ErrorClass::Auth);
    }

    #[test]
    fn page_tolerates_missing_extensions() {
        let page: MessagePage = serde_json::from_str(r#"{"messages": []}"#).unwrap();
        assert_eq!(page, MessagePage::default());
    }
}
