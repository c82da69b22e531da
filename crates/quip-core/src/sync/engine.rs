//! The sync engine owns the local state.
//!
//! Every local mutation is applied to a copy of the state, committed to the
//! store in one batch, and only then published. The queue and the message
//! cache therefore never diverge on disk.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, Notify};

use crate::config::SyncSettings;
use crate::db::{KeyValueStore, StoreKey, StoreSnapshot, SyncRepository};
use crate::error::{Error, Result};
use crate::models::{
    sort_messages, Message, MessageId, OperationId, OperationKind, PendingOperation,
    SyncConflict, SyncCursor, SyncFailure,
};
use crate::remote::MessageApi;

use super::queue::EnqueueOutcome;

/// Sync status of one cached message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageStatus {
    /// Matches the last known server state
    Synced,
    /// Has queued operations not yet confirmed
    Pending,
    /// An operation for it failed terminally and awaits retry or discard
    Failed,
}

pub struct SyncEngine {
    pub(super) repo: SyncRepository,
    pub(super) api: Arc<dyn MessageApi>,
    pub(super) settings: SyncSettings,
    pub(super) state: Mutex<StoreSnapshot>,
    pub(super) running: AtomicBool,
    pub(super) rerun: AtomicBool,
    local_changes: Notify,
}

impl SyncEngine {
    /// Load persisted state and build the engine
    pub async fn open(
        store: Arc<dyn KeyValueStore>,
        api: Arc<dyn MessageApi>,
        settings: SyncSettings,
    ) -> Result<Self> {
        let repo = SyncRepository::new(store);
        let snapshot = repo.load().await?;
        tracing::debug!(
            messages = snapshot.messages.len(),
            pending = snapshot.pending.len(),
            failures = snapshot.failures.len(),
            "Loaded local sync state"
        );

        Ok(Self {
            repo,
            api,
            settings,
            state: Mutex::new(snapshot),
            running: AtomicBool::new(false),
            rerun: AtomicBool::new(false),
            local_changes: Notify::new(),
        })
    }

    pub const fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// Signalled after every committed local mutation
    pub const fn local_changes(&self) -> &Notify {
        &self.local_changes
    }

    /// Whether a sync cycle is currently running
    pub fn is_syncing(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Apply `f` to a copy of the state, persist `keys`, then publish the copy
    pub(super) async fn mutate<T>(
        &self,
        keys: &[StoreKey],
        f: impl FnOnce(&mut StoreSnapshot) -> Result<T>,
    ) -> Result<T> {
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        let value = f(&mut next)?;
        self.repo.persist(&next, keys).await?;
        *state = next;
        Ok(value)
    }

    // ------------------------------------------------------------------
    // Local mutations
    // ------------------------------------------------------------------

    /// Create a message locally and queue it for the server
    pub async fn create_message(&self, content: &str) -> Result<Message> {
        let content = validate_content(content)?;
        let now = Utc::now();
        let message = Message::draft(MessageId::new(), content, now);

        let created = message.clone();
        self.mutate(&[StoreKey::Messages, StoreKey::PendingOps], move |state| {
            state
                .pending
                .enqueue(PendingOperation::create(message.id, content, now));
            state.messages.push(message);
            sort_messages(&mut state.messages);
            Ok(())
        })
        .await?;

        tracing::debug!(id = %created.id, "Queued create");
        self.local_changes.notify_one();
        Ok(created)
    }

    /// Edit a cached message locally and queue the update
    pub async fn update_message(&self, id: MessageId, content: &str) -> Result<Message> {
        let content = validate_content(content)?;
        let now = Utc::now();

        let updated = self
            .mutate(&[StoreKey::Messages, StoreKey::PendingOps], move |state| {
                let message = state
                    .messages
                    .iter_mut()
                    .find(|message| message.id == id)
                    .ok_or_else(|| Error::NotFound(format!("message {id}")))?;
                message.content = content.to_string();
                message.updated_at = now;
                let updated = message.clone();

                let outcome = state
                    .pending
                    .enqueue(PendingOperation::update(id, content, now));
                if let EnqueueOutcome::Merged(into) = outcome {
                    tracing::debug!(%id, operation = %into, "Coalesced update into queued operation");
                }
                Ok(updated)
            })
            .await?;

        self.local_changes.notify_one();
        Ok(updated)
    }

    /// Remove a message locally and queue the delete
    pub async fn delete_message(&self, id: MessageId) -> Result<()> {
        let now = Utc::now();

        self.mutate(
            &[
                StoreKey::Messages,
                StoreKey::PendingOps,
                StoreKey::SyncFailures,
            ],
            move |state| {
                let before = state.messages.len();
                state.messages.retain(|message| message.id != id);
                if state.messages.len() == before {
                    return Err(Error::NotFound(format!("message {id}")));
                }
                state.failures.retain(|failure| failure.message_id() != id);

                if let EnqueueOutcome::Cancelled { removed } =
                    state.pending.enqueue(PendingOperation::delete(id, now))
                {
                    tracing::debug!(%id, removed, "Delete cancelled unsent create");
                }
                Ok(())
            },
        )
        .await?;

        self.local_changes.notify_one();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Cached messages, newest first
    pub async fn list_messages(&self) -> Vec<Message> {
        self.state.lock().await.messages.clone()
    }

    pub async fn get_message(&self, id: MessageId) -> Option<Message> {
        self.state
            .lock()
            .await
            .messages
            .iter()
            .find(|message| message.id == id)
            .cloned()
    }

    pub async fn message_status(&self, id: MessageId) -> MessageStatus {
        let state = self.state.lock().await;
        status_of(&state, id)
    }

    /// Messages paired with their sync status
    pub async fn list_with_status(&self) -> Vec<(Message, MessageStatus)> {
        let state = self.state.lock().await;
        state
            .messages
            .iter()
            .map(|message| (message.clone(), status_of(&state, message.id)))
            .collect()
    }

    /// Queued operations in FIFO order
    pub async fn pending_operations(&self) -> Vec<PendingOperation> {
        self.state.lock().await.pending.list_all().to_vec()
    }

    pub async fn sync_failures(&self) -> Vec<SyncFailure> {
        self.state.lock().await.failures.clone()
    }

    /// Most recent conflicts first
    pub async fn sync_conflicts(&self, limit: usize) -> Vec<SyncConflict> {
        let state = self.state.lock().await;
        state.conflicts.iter().take(limit).cloned().collect()
    }

    pub async fn cursor(&self) -> SyncCursor {
        self.state.lock().await.cursor
    }

    // ------------------------------------------------------------------
    // Failure handling
    // ------------------------------------------------------------------

    /// Put a failed operation back at the head of the queue with a fresh budget
    pub async fn retry_failure(&self, operation_id: OperationId) -> Result<PendingOperation> {
        let op = self
            .mutate(
                &[StoreKey::PendingOps, StoreKey::SyncFailures],
                move |state| {
                    let index = state
                        .failures
                        .iter()
                        .position(|failure| failure.operation_id() == operation_id)
                        .ok_or_else(|| Error::NotFound(format!("failed operation {operation_id}")))?;
                    let failure = state.failures.remove(index);
                    let mut op = failure.operation;
                    op.retry_count = 0;
                    op.next_attempt_at = None;
                    op.last_error = None;
                    state.pending.push_front(op.clone());
                    Ok(op)
                },
            )
            .await?;

        tracing::info!(operation = %op.id, kind = %op.kind, "Re-queued failed operation");
        self.local_changes.notify_one();
        Ok(op)
    }

    /// Drop a failed operation for good
    ///
    /// A failed create never reached the server, so its placeholder is removed.
    /// Any other discarded operation leaves the cache ahead of the server, so
    /// the next cycle performs a full fetch to restore the server's state.
    pub async fn discard_failure(&self, operation_id: OperationId) -> Result<SyncFailure> {
        let failure = self
            .mutate(&StoreKey::ALL, move |state| {
                let index = state
                    .failures
                    .iter()
                    .position(|failure| failure.operation_id() == operation_id)
                    .ok_or_else(|| Error::NotFound(format!("failed operation {operation_id}")))?;
                let failure = state.failures.remove(index);
                let message_id = failure.message_id();

                if failure.operation.kind == OperationKind::Create {
                    state.messages.retain(|message| message.id != message_id);
                    state.pending.remove_for_message(message_id);
                } else {
                    state.cursor = SyncCursor::default();
                    state.last_full_sync = None;
                }
                Ok(failure)
            })
            .await?;

        tracing::info!(operation = %failure.operation_id(), "Discarded failed operation");
        Ok(failure)
    }

    /// Make the next cycle fetch everything instead of the incremental delta
    pub async fn request_full_resync(&self) -> Result<()> {
        self.mutate(&[StoreKey::LastSync, StoreKey::LastFullSync], |state| {
            state.cursor = SyncCursor::default();
            state.last_full_sync = None;
            Ok(())
        })
        .await
    }
}

fn status_of(state: &StoreSnapshot, id: MessageId) -> MessageStatus {
    if state.failures.iter().any(|failure| failure.message_id() == id) {
        MessageStatus::Failed
    } else if state.pending.has_pending_for(id) {
        MessageStatus::Pending
    } else {
        MessageStatus::Synced
    }
}

fn validate_content(content: &str) -> Result<&str> {
    if content.trim().is_empty() {
        return Err(Error::InvalidInput(
            "Message content must not be empty".to_string(),
        ));
    }
    Ok(content)
}
