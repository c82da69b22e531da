//! Sync conflict model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::MessageId;

/// Resolution strategy recorded for server overwrites
pub const LWW_STRATEGY: &str = "lww";

/// Recorded sync conflict resolved by strategy (e.g., LWW)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConflict {
    /// Message involved in the conflict
    pub message_id: MessageId,
    /// Cached copy's timestamp when the conflict occurred
    pub local_updated_at: DateTime<Utc>,
    /// Incoming server timestamp that replaced it
    pub incoming_updated_at: DateTime<Utc>,
    /// Resolution timestamp
    pub resolved_at: DateTime<Utc>,
    /// Resolution strategy name
    pub strategy: String,
}
