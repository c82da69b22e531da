//! Durable key-value storage

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::{Error, Result};

use super::Database;

/// One write in an atomic batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreWrite {
    Set { key: String, value: String },
    Delete { key: String },
}

impl StoreWrite {
    pub fn set(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Set {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn delete(key: impl Into<String>) -> Self {
        Self::Delete { key: key.into() }
    }
}

/// Trait for the local persistent key-value store
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a value, `None` when the key is absent
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a single value
    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.commit(vec![StoreWrite::set(key, value)]).await
    }

    /// Remove a key (no-op when absent)
    async fn delete(&self, key: &str) -> Result<()> {
        self.commit(vec![StoreWrite::delete(key)]).await
    }

    /// Apply all writes or none of them
    async fn commit(&self, writes: Vec<StoreWrite>) -> Result<()>;
}

/// libSQL implementation of `KeyValueStore`
pub struct LibSqlKeyValueStore {
    db: Database,
    // Serializes transactions on the shared connection.
    write_lock: Mutex<()>,
}

impl LibSqlKeyValueStore {
    pub const fn new(db: Database) -> Self {
        Self {
            db,
            write_lock: Mutex::const_new(()),
        }
    }
}

#[async_trait]
impl KeyValueStore for LibSqlKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut rows = self
            .db
            .connection()
            .query("SELECT value FROM kv_entries WHERE key = ?", [key])
            .await?;

        if let Some(row) = rows.next().await? {
            let value: String = row.get(0)?;
            Ok(Some(value))
        } else {
            Ok(None)
        }
    }

    async fn commit(&self, writes: Vec<StoreWrite>) -> Result<()> {
        if writes.is_empty() {
            return Ok(());
        }

        let _guard = self.write_lock.lock().await;
        let conn = self.db.connection();
        let now = chrono::Utc::now().timestamp_millis();

        // Commits are serialized, so an open transaction here belongs to a
        // commit whose future was dropped before it finished.
        if !conn.is_autocommit() {
            tracing::warn!("Rolling back abandoned store transaction");
            conn.execute("ROLLBACK", ()).await?;
        }

        conn.execute("BEGIN IMMEDIATE", ()).await?;

        for write in &writes {
            let result = match write {
                StoreWrite::Set { key, value } => {
                    conn.execute(
                        "INSERT OR REPLACE INTO kv_entries (key, value, updated_at) VALUES (?, ?, ?)",
                        libsql::params![key.as_str(), value.as_str(), now],
                    )
                    .await
                }
                StoreWrite::Delete { key } => {
                    conn.execute("DELETE FROM kv_entries WHERE key = ?", [key.as_str()])
                        .await
                }
            };
            if let Err(e) = result {
                conn.execute("ROLLBACK", ()).await.ok();
                return Err(e.into());
            }
        }

        if let Err(e) = conn.execute("COMMIT", ()).await {
            conn.execute("ROLLBACK", ()).await.ok();
            return Err(e.into());
        }

        tracing::trace!(writes = writes.len(), "Committed store batch");
        Ok(())
    }
}

/// In-memory `KeyValueStore`, with switchable write failures for tests
#[derive(Default)]
pub struct MemoryKeyValueStore {
    entries: StdMutex<BTreeMap<String, String>>,
    fail_writes: AtomicBool,
    // Commits still allowed before failing; `None` means unlimited.
    write_budget: StdMutex<Option<usize>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following commit fail until switched off again
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
        if let Ok(mut budget) = self.write_budget.lock() {
            *budget = None;
        }
    }

    /// Let `count` more commits succeed, then fail until `set_fail_writes(false)`
    pub fn fail_writes_after(&self, count: usize) {
        if let Ok(mut budget) = self.write_budget.lock() {
            *budget = Some(count);
        }
    }

    fn take_write_budget(&self) -> Result<()> {
        let mut budget = self
            .write_budget
            .lock()
            .map_err(|_| Error::Store("memory store lock poisoned".to_string()))?;
        match budget.as_mut() {
            Some(0) => Err(Error::Store("write rejected".to_string())),
            Some(remaining) => {
                *remaining -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, String>>> {
        self.entries
            .lock()
            .map_err(|_| Error::Store("memory store lock poisoned".to_string()))
    }
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.lock()?.get(key).cloned())
    }

    async fn commit(&self, writes: Vec<StoreWrite>) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Store("write rejected".to_string()));
        }
        self.take_write_budget()?;

        let mut entries = self.lock()?;
        for write in writes {
            match write {
                StoreWrite::Set { key, value } => {
                    entries.insert(key, value);
                }
                StoreWrite::Delete { key } => {
                    entries.remove(&key);
                }
            }
        }
        Ok(())
    }
}
