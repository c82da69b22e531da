//! Incremental fetch cursor

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// High-water mark of the last successful fetch
///
/// `None` means no fetch has completed yet, so the next one is a full fetch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCursor {
    #[serde(default)]
    pub last_sync: Option<DateTime<Utc>>,
}

impl SyncCursor {
    #[must_use]
    pub const fn at(last_sync: DateTime<Utc>) -> Self {
        Self {
            last_sync: Some(last_sync),
        }
    }

    /// Move the cursor forward, never backwards
    #[must_use]
    pub fn advanced_to(self, candidate: DateTime<Utc>) -> Self {
        match self.last_sync {
            Some(current) if current >= candidate => self,
            _ => Self::at(candidate),
        }
    }
}
