//! Typed access to the sync state kept in the key-value store

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;
use crate::models::{Message, SyncConflict, SyncCursor, SyncFailure};
use crate::sync::PendingQueue;

use super::{KeyValueStore, StoreWrite};

/// Most recent conflicts kept in the log
pub const MAX_CONFLICT_LOG: usize = 100;

/// Keys used in the local store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreKey {
    Messages,
    PendingOps,
    LastSync,
    LastFullSync,
    SyncFailures,
    SyncConflicts,
}

impl StoreKey {
    pub const ALL: [Self; 6] = [
        Self::Messages,
        Self::PendingOps,
        Self::LastSync,
        Self::LastFullSync,
        Self::SyncFailures,
        Self::SyncConflicts,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Messages => "messages",
            Self::PendingOps => "pending-ops",
            Self::LastSync => "last-sync",
            Self::LastFullSync => "last-full-sync",
            Self::SyncFailures => "sync-failures",
            Self::SyncConflicts => "sync-conflicts",
        }
    }
}

/// Everything the sync engine persists, loaded as one value
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreSnapshot {
    /// Cached messages, kept in display order
    pub messages: Vec<Message>,
    /// Pending operations in FIFO order
    pub pending: PendingQueue,
    pub cursor: SyncCursor,
    pub last_full_sync: Option<DateTime<Utc>>,
    pub failures: Vec<SyncFailure>,
    /// Newest first
    pub conflicts: Vec<SyncConflict>,
}

impl StoreSnapshot {
    /// Prepend a conflict record, trimming the log to its cap
    pub fn record_conflict(&mut self, conflict: SyncConflict) {
        self.conflicts.insert(0, conflict);
        self.conflicts.truncate(MAX_CONFLICT_LOG);
    }
}

/// Repository over the key-value store
#[derive(Clone)]
pub struct SyncRepository {
    store: Arc<dyn KeyValueStore>,
}

impl SyncRepository {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Load every key; absent keys take their empty defaults
    pub async fn load(&self) -> Result<StoreSnapshot> {
        let mut snapshot = StoreSnapshot {
            messages: self.read(StoreKey::Messages).await?.unwrap_or_default(),
            pending: self.read(StoreKey::PendingOps).await?.unwrap_or_default(),
            cursor: SyncCursor {
                last_sync: self.read(StoreKey::LastSync).await?,
            },
            last_full_sync: self.read(StoreKey::LastFullSync).await?,
            failures: self.read(StoreKey::SyncFailures).await?.unwrap_or_default(),
            conflicts: self.read(StoreKey::SyncConflicts).await?.unwrap_or_default(),
        };
        crate::models::sort_messages(&mut snapshot.messages);
        Ok(snapshot)
    }

    /// Atomically write the given keys from `snapshot`
    pub async fn persist(&self, snapshot: &StoreSnapshot, keys: &[StoreKey]) -> Result<()> {
        let mut writes = Vec::with_capacity(keys.len());
        for key in keys {
            writes.push(encode(snapshot, *key)?);
        }
        self.store.commit(writes).await
    }

    /// Atomically write every key
    pub async fn persist_all(&self, snapshot: &StoreSnapshot) -> Result<()> {
        self.persist(snapshot, &StoreKey::ALL).await
    }

    async fn read<T: DeserializeOwned>(&self, key: StoreKey) -> Result<Option<T>> {
        match self.store.get(key.as_str()).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }
}

fn encode(snapshot: &StoreSnapshot, key: StoreKey) -> Result<StoreWrite> {
    let write = match key {
        StoreKey::Messages => set_json(key, &snapshot.messages)?,
        StoreKey::PendingOps => set_json(key, &snapshot.pending)?,
        StoreKey::LastSync => match snapshot.cursor.last_sync {
            Some(at) => set_json(key, &at)?,
            None => StoreWrite::delete(key.as_str()),
        },
        StoreKey::LastFullSync => match snapshot.last_full_sync {
            Some(at) => set_json(key, &at)?,
            None => StoreWrite::delete(key.as_str()),
        },
        StoreKey::SyncFailures => set_json(key, &snapshot.failures)?,
        StoreKey::SyncConflicts => set_json(key, &snapshot.conflicts)?,
    };
    Ok(write)
}

fn set_json<T: Serialize + ?Sized>(key: StoreKey, value: &T) -> Result<StoreWrite> {
    Ok(StoreWrite::set(key.as_str(), serde_json::to_string(value)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryKeyValueStore;
    use crate::models::{MessageId, PendingOperation, LWW_STRATEGY};
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 4, hour, 0, 0).unwrap()
    }

    fn setup() -> (Arc<MemoryKeyValueStore>, SyncRepository) {
        let store = Arc::new(MemoryKeyValueStore::new());
        let repo = SyncRepository::new(store.clone());
        (store, repo)
    }

    #[tokio::test]
    async fn test_load_empty_store() {
        let (_, repo) = setup();
        let snapshot = repo.load().await.unwrap();
        assert_eq!(snapshot, StoreSnapshot::default());
    }

    #[tokio::test]
    async fn test_persist_and_load() {
        let (store, repo) = setup();
        let id = MessageId::new();
        let snapshot = StoreSnapshot {
            messages: vec![Message::draft(id, "hello", at(10))],
            pending: PendingQueue::from(vec![PendingOperation::create(id, "hello", at(10))]),
            cursor: SyncCursor::at(at(11)),
            ..StoreSnapshot::default()
        };

        repo.persist_all(&snapshot).await.unwrap();

        assert_eq!(repo.load().await.unwrap(), snapshot);
        assert_eq!(
            store.get("last-sync").await.unwrap().as_deref(),
            Some("\"2026-01-04T11:00:00Z\"")
        );
        assert_eq!(store.get("last-full-sync").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_persist_only_named_keys() {
        let (store, repo) = setup();
        let snapshot = StoreSnapshot {
            cursor: SyncCursor::at(at(11)),
            ..StoreSnapshot::default()
        };

        repo.persist(&snapshot, &[StoreKey::PendingOps]).await.unwrap();

        assert_eq!(store.get("pending-ops").await.unwrap().as_deref(), Some("[]"));
        assert_eq!(store.get("last-sync").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_corrupt_value_is_an_error() {
        let (store, repo) = setup();
        store.set("pending-ops", "{not json").await.unwrap();
        assert!(repo.load().await.is_err());
    }

    #[test]
    fn test_conflict_log_is_capped() {
        let mut snapshot = StoreSnapshot::default();
        for hour in 0..(MAX_CONFLICT_LOG + 5) {
            let resolved_at = at(0) + chrono::Duration::minutes(i64::try_from(hour).unwrap());
            snapshot.record_conflict(SyncConflict {
                message_id: MessageId::new(),
                local_updated_at: at(1),
                incoming_updated_at: at(2),
                resolved_at,
                strategy: LWW_STRATEGY.to_string(),
            });
        }
        assert_eq!(snapshot.conflicts.len(), MAX_CONFLICT_LOG);
        assert!(snapshot.conflicts[0].resolved_at > snapshot.conflicts[1].resolved_at);
    }
}
