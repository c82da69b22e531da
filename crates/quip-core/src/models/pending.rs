//! Pending operation model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::MessageId;

/// Identifier of a queued operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationId(Uuid);

impl OperationId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for OperationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Kind of local mutation awaiting confirmation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        };
        f.write_str(label)
    }
}

/// A durable record of a local mutation not yet confirmed by the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingOperation {
    pub id: OperationId,
    pub kind: OperationKind,
    pub target_message_id: MessageId,
    /// New content for create/update; absent for delete
    #[serde(default)]
    pub payload: Option<String>,
    pub enqueued_at: DateTime<Utc>,
    /// Failed attempts so far
    #[serde(default)]
    pub retry_count: u32,
    /// Earliest time the next attempt may run (backoff)
    #[serde(default)]
    pub next_attempt_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_error: Option<String>,
    /// Set and committed before the first request leaves the client
    #[serde(default)]
    pub attempted_at: Option<DateTime<Utc>>,
}

impl PendingOperation {
    fn new(
        kind: OperationKind,
        target_message_id: MessageId,
        payload: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: OperationId::new(),
            kind,
            target_message_id,
            payload,
            enqueued_at: now,
            retry_count: 0,
            next_attempt_at: None,
            last_error: None,
            attempted_at: None,
        }
    }

    #[must_use]
    pub fn create(target: MessageId, content: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self::new(OperationKind::Create, target, Some(content.into()), now)
    }

    #[must_use]
    pub fn update(target: MessageId, content: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self::new(OperationKind::Update, target, Some(content.into()), now)
    }

    #[must_use]
    pub fn delete(target: MessageId, now: DateTime<Utc>) -> Self {
        Self::new(OperationKind::Delete, target, None, now)
    }

    /// Whether the operation may be attempted at `now`
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_attempt_at.is_none_or(|at| at <= now)
    }

    /// Whether the server may already have seen this operation
    #[must_use]
    pub const fn has_been_attempted(&self) -> bool {
        self.retry_count > 0 || self.attempted_at.is_some()
    }

    /// Content carried by the operation, empty for deletes
    #[must_use]
    pub fn content(&self) -> &str {
        self.payload.as_deref().unwrap_or("")
    }
}
