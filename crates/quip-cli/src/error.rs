use std::io;

use quip_core::auth::AuthError;
use quip_core::sync::SyncError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] quip_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("No message content provided")]
    EmptyContent,
    #[error("Edited message content cannot be empty")]
    EmptyEditedContent,
    #[error("ID cannot be empty")]
    EmptyId,
    #[error("Message not found for id/prefix: {0}")]
    MessageNotFound(String),
    #[error("Failed operation not found for id/prefix: {0}")]
    FailureNotFound(String),
    #[error("{0}")]
    AmbiguousId(String),
    #[error("Editor command failed: {0}")]
    EditorFailed(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),
    #[error("Sync failed: {0}")]
    Sync(#[from] SyncError),
    #[error(
        "No server configured. Run `quip config init --api-url <URL>` or set QUIP_API_URL."
    )]
    ServerNotConfigured,
    #[error("Profile '{0}' is not signed in. Run `quip login --email <EMAIL> --password <PASSWORD>`.")]
    NotSignedIn(String),
}
