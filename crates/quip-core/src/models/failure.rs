//! Terminal sync failures

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::{MessageId, OperationId, PendingOperation};

/// Why an operation was abandoned
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FailureReason {
    /// The server refused the operation with a non-retryable status
    Rejected { status: u16, message: String },
    /// Transient failures used up every attempt
    RetriesExhausted { attempts: u32, last_error: String },
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected { status, message } => {
                write!(f, "rejected by server ({status}): {message}")
            }
            Self::RetriesExhausted {
                attempts,
                last_error,
            } => write!(f, "gave up after {attempts} attempts: {last_error}"),
        }
    }
}

/// An operation that will not be retried automatically
///
/// The affected message stays flagged until the failure is retried or
/// discarded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncFailure {
    pub operation: PendingOperation,
    pub reason: FailureReason,
    pub failed_at: DateTime<Utc>,
}

impl SyncFailure {
    #[must_use]
    pub const fn operation_id(&self) -> OperationId {
        self.operation.id
    }

    #[must_use]
    pub const fn message_id(&self) -> MessageId {
        self.operation.target_message_id
    }
}
