//! Reconciler: drains the pending queue and merges server state.
//!
//! One cycle is: drain the queue head first, fetch changes since the cursor,
//! merge them with last-write-wins, persist, and advance the cursor. Queued
//! operations are always re-applied on top of whatever the server returned,
//! so a stale server copy never hides a newer local edit or brings back a
//! locally deleted message.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::db::{StoreKey, StoreSnapshot};
use crate::models::{
    sort_messages, FailureReason, Message, MessageId, OperationId, OperationKind,
    PendingOperation, SyncConflict, SyncFailure, LWW_STRATEGY,
};
use crate::remote::{ErrorClass, MessagePage, RemoteError};

use super::SyncEngine;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("A sync cycle is already running")]
    AlreadyRunning,
    #[error("Authentication required")]
    AuthRequired,
    #[error("Local store error: {0}")]
    Store(#[from] crate::Error),
}

/// Summary of one or more coalesced cycles
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Operations the server confirmed
    pub confirmed: usize,
    /// Operations that failed terminally during this cycle
    pub failures: Vec<SyncFailure>,
    /// Operation at the head still waiting on backoff or retry
    pub blocked_by: Option<OperationId>,
    /// Messages received from the server
    pub fetched: usize,
    /// Cached messages removed because the server no longer has them
    pub removed: usize,
    pub conflicts: usize,
    pub full_fetch: bool,
    /// Why the fetch did not happen or failed
    pub fetch_error: Option<String>,
    /// Cursor after the cycle
    pub cursor: Option<DateTime<Utc>>,
}

impl SyncReport {
    fn absorb(&mut self, next: Self) {
        self.confirmed += next.confirmed;
        self.failures.extend(next.failures);
        self.blocked_by = next.blocked_by;
        self.fetched += next.fetched;
        self.removed += next.removed;
        self.conflicts += next.conflicts;
        self.full_fetch |= next.full_fetch;
        self.fetch_error = next.fetch_error;
        self.cursor = next.cursor;
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.blocked_by.is_none() && self.fetch_error.is_none()
    }
}

/// Clears the running flag when a cycle ends, including on cancellation
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// How the drain step ended
enum DrainStop {
    Empty,
    Blocked { connectivity: bool },
}

impl SyncEngine {
    /// Run a sync cycle now
    ///
    /// Returns `AlreadyRunning` when another cycle is in progress; that cycle
    /// then runs once more before finishing.
    pub async fn sync_now(&self) -> Result<SyncReport, SyncError> {
        if self.running.swap(true, Ordering::SeqCst) {
            self.rerun.store(true, Ordering::SeqCst);
            return Err(SyncError::AlreadyRunning);
        }
        let _guard = RunGuard(&self.running);

        let mut report = self.run_cycle().await?;
        while self.rerun.swap(false, Ordering::SeqCst) {
            tracing::debug!("Running coalesced follow-up cycle");
            let next = self.run_cycle().await?;
            report.absorb(next);
        }
        Ok(report)
    }

    async fn run_cycle(&self) -> Result<SyncReport, SyncError> {
        let started_at = Utc::now();
        let mut report = SyncReport::default();

        let stop = self.drain_queue(&mut report).await?;
        match stop {
            DrainStop::Blocked { connectivity: true } => {
                report.fetch_error = Some("server unreachable".to_string());
                let state = self.state.lock().await;
                report.cursor = state.cursor.last_sync;
            }
            DrainStop::Blocked { connectivity: false } => {
                self.fetch_and_merge(started_at, false, &mut report).await?;
            }
            DrainStop::Empty => {
                self.fetch_and_merge(started_at, true, &mut report).await?;
            }
        }

        tracing::info!(
            confirmed = report.confirmed,
            failed = report.failures.len(),
            fetched = report.fetched,
            removed = report.removed,
            blocked = report.blocked_by.is_some(),
            full = report.full_fetch,
            "Sync cycle finished"
        );
        Ok(report)
    }

    /// Attempt queued operations in FIFO order until the queue is empty or blocked
    async fn drain_queue(&self, report: &mut SyncReport) -> Result<DrainStop, SyncError> {
        loop {
            let op = {
                let mut state = self.state.lock().await;
                let Some(mut head) = state.pending.peek_next().cloned() else {
                    return Ok(DrainStop::Empty);
                };
                if !head.is_due(Utc::now()) {
                    report.blocked_by = Some(head.id);
                    return Ok(DrainStop::Blocked {
                        connectivity: false,
                    });
                }

                // Committed before sending: later edits must queue behind it.
                if head.attempted_at.is_none() {
                    let at = Utc::now();
                    let mut next = state.clone();
                    next.pending.mark_attempted(head.id, at);
                    self.repo.persist(&next, &[StoreKey::PendingOps]).await?;
                    *state = next;
                    head.attempted_at = Some(at);
                }
                state.pending.mark_in_flight(head.id);
                head
            };

            tracing::debug!(operation = %op.id, kind = %op.kind, message = %op.target_message_id, "Sending operation");
            let result = self.send(&op).await;

            let mut state = self.state.lock().await;
            if state.pending.get(op.id).is_none() {
                // Removed locally while on the wire.
                state.pending.clear_in_flight();
                continue;
            }

            let mut next = state.clone();
            next.pending.clear_in_flight();
            let mut keys = vec![StoreKey::Messages, StoreKey::PendingOps];
            let mut stop = None;

            match result {
                Ok(server) => {
                    confirm(&mut next, &op, server);
                    report.confirmed += 1;
                }
                Err(error) => match classify(&op, &error) {
                    Verdict::AlreadyApplied => {
                        tracing::debug!(operation = %op.id, %error, "Server already applied operation");
                        confirm(&mut next, &op, None);
                        report.confirmed += 1;
                    }
                    Verdict::Auth => {
                        state.pending.clear_in_flight();
                        tracing::warn!(operation = %op.id, "Server requires re-authentication");
                        return Err(SyncError::AuthRequired);
                    }
                    Verdict::Permanent => {
                        let failure = SyncFailure {
                            operation: op.clone(),
                            reason: FailureReason::Rejected {
                                status: error.status().unwrap_or_default(),
                                message: error.to_string(),
                            },
                            failed_at: Utc::now(),
                        };
                        fail(&mut next, failure, report);
                        keys.push(StoreKey::SyncFailures);
                    }
                    Verdict::Transient => {
                        let attempts = next.pending.increment_retry(op.id).unwrap_or(u32::MAX);
                        if attempts >= self.settings.max_attempts {
                            let failure = SyncFailure {
                                operation: PendingOperation {
                                    retry_count: attempts,
                                    last_error: Some(error.to_string()),
                                    ..op.clone()
                                },
                                reason: FailureReason::RetriesExhausted {
                                    attempts,
                                    last_error: error.to_string(),
                                },
                                failed_at: Utc::now(),
                            };
                            fail(&mut next, failure, report);
                            keys.push(StoreKey::SyncFailures);
                        } else {
                            let delay = chrono::Duration::from_std(
                                self.settings.backoff_for(attempts),
                            )
                            .unwrap_or(chrono::Duration::MAX);
                            let retry_at = Utc::now()
                                .checked_add_signed(delay)
                                .unwrap_or(DateTime::<Utc>::MAX_UTC);
                            next.pending.defer(op.id, error.to_string(), retry_at);
                            tracing::warn!(
                                operation = %op.id,
                                attempts,
                                %retry_at,
                                %error,
                                "Operation failed, will retry"
                            );
                            report.blocked_by = Some(op.id);
                            stop = Some(DrainStop::Blocked {
                                connectivity: error.is_connectivity(),
                            });
                        }
                    }
                },
            }

            if let Err(error) = self.repo.persist(&next, &keys).await {
                state.pending.clear_in_flight();
                tracing::warn!(%error, "Failed to persist sync progress");
                return Err(error.into());
            }
            *state = next;

            if let Some(stop) = stop {
                return Ok(stop);
            }
        }
    }

    async fn send(&self, op: &PendingOperation) -> Result<Option<Message>, RemoteError> {
        match op.kind {
            OperationKind::Create => self
                .api
                .create_message(op.target_message_id, op.content())
                .await
                .map(Some),
            OperationKind::Update => self
                .api
                .update_message(op.target_message_id, op.content())
                .await
                .map(Some),
            OperationKind::Delete => self
                .api
                .delete_message(op.target_message_id)
                .await
                .map(|()| None),
        }
    }

    async fn fetch_and_merge(
        &self,
        started_at: DateTime<Utc>,
        advance_cursor: bool,
        report: &mut SyncReport,
    ) -> Result<(), SyncError> {
        let (since, full) = {
            let state = self.state.lock().await;
            let full_interval = chrono::Duration::from_std(self.settings.full_resync_interval)
                .unwrap_or(chrono::Duration::MAX);
            let full_due = state
                .last_full_sync
                .is_none_or(|at| started_at.signed_duration_since(at) >= full_interval);
            match state.cursor.last_sync {
                Some(cursor) if !full_due => (Some(cursor), false),
                _ => (None, true),
            }
        };

        let page = match self.api.list_messages(since).await {
            Ok(page) => page,
            Err(RemoteError::Unauthorized) => return Err(SyncError::AuthRequired),
            Err(error) => {
                tracing::warn!(%error, "Fetching messages failed");
                report.fetch_error = Some(error.to_string());
                report.cursor = since;
                return Ok(());
            }
        };

        let mut state = self.state.lock().await;
        let mut next = state.clone();
        let stats = merge_page(&mut next, &page, full, Utc::now());

        if advance_cursor {
            let candidate = page
                .server_time
                .or_else(|| page.messages.iter().map(|message| message.updated_at).max())
                .unwrap_or(started_at);
            next.cursor = next.cursor.advanced_to(candidate);
        }
        if full {
            next.last_full_sync = Some(started_at);
        }

        self.repo
            .persist(
                &next,
                &[
                    StoreKey::Messages,
                    StoreKey::LastSync,
                    StoreKey::LastFullSync,
                    StoreKey::SyncConflicts,
                ],
            )
            .await?;
        *state = next;

        report.fetched += page.messages.len();
        report.removed += stats.removed;
        report.conflicts += stats.conflicts;
        report.full_fetch |= full;
        report.cursor = state.cursor.last_sync;
        Ok(())
    }
}

enum Verdict {
    AlreadyApplied,
    Transient,
    Permanent,
    Auth,
}

fn classify(op: &PendingOperation, error: &RemoteError) -> Verdict {
    match (op.kind, error.status()) {
        // The message is already gone; the delete achieved its goal.
        (OperationKind::Delete, Some(404)) => Verdict::AlreadyApplied,
        // A replayed create whose first response was lost.
        (OperationKind::Create, Some(409)) => Verdict::AlreadyApplied,
        _ => match error.class() {
            ErrorClass::Transient => Verdict::Transient,
            ErrorClass::Permanent => Verdict::Permanent,
            ErrorClass::Auth => Verdict::Auth,
        },
    }
}

fn fail(next: &mut StoreSnapshot, failure: SyncFailure, report: &mut SyncReport) {
    next.pending.dequeue_confirmed(failure.operation_id());
    tracing::warn!(
        operation = %failure.operation_id(),
        message = %failure.message_id(),
        reason = %failure.reason,
        "Operation failed permanently"
    );
    next.failures.push(failure.clone());
    report.failures.push(failure);
}

/// Apply a confirmed operation and re-apply what is still queued for the message
fn confirm(next: &mut StoreSnapshot, op: &PendingOperation, server: Option<Message>) {
    next.pending.dequeue_confirmed(op.id);
    let id = op.target_message_id;

    match (op.kind, server) {
        (OperationKind::Delete, _) => {
            next.messages.retain(|message| message.id != id);
        }
        (_, Some(server)) => upsert(&mut next.messages, server),
        (_, None) => {}
    }

    rebase(next, id);
    sort_messages(&mut next.messages);
}

/// Re-apply queued operations for `id` on top of the cached copy
pub(crate) fn rebase(state: &mut StoreSnapshot, id: MessageId) {
    let ops: Vec<PendingOperation> = state.pending.ops_for(id).cloned().collect();
    for op in ops {
        match op.kind {
            OperationKind::Create | OperationKind::Update => {
                if let Some(message) = state.messages.iter_mut().find(|m| m.id == id) {
                    if let Some(content) = &op.payload {
                        message.content.clone_from(content);
                    }
                    message.updated_at = message.updated_at.max(op.enqueued_at);
                } else if op.kind == OperationKind::Create {
                    state
                        .messages
                        .push(Message::draft(id, op.content(), op.enqueued_at));
                }
            }
            OperationKind::Delete => {
                state.messages.retain(|message| message.id != id);
            }
        }
    }
}

fn upsert(messages: &mut Vec<Message>, incoming: Message) {
    match messages.iter_mut().find(|message| message.id == incoming.id) {
        Some(existing) => *existing = incoming,
        None => messages.push(incoming),
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct MergeStats {
    pub removed: usize,
    pub conflicts: usize,
}

/// Merge a fetched page into the state (server wins, queued ops rebased on top)
///
/// Incremental pages never delete by absence; full pages are authoritative for
/// every message without queued operations or a recorded failure.
pub(crate) fn merge_page(
    state: &mut StoreSnapshot,
    page: &MessagePage,
    full: bool,
    now: DateTime<Utc>,
) -> MergeStats {
    let mut stats = MergeStats::default();
    let protected: HashSet<MessageId> = state
        .pending
        .list_all()
        .iter()
        .map(|op| op.target_message_id)
        .chain(state.failures.iter().map(SyncFailure::message_id))
        .collect();

    let flagged: HashSet<MessageId> = state.failures.iter().map(SyncFailure::message_id).collect();

    for incoming in &page.messages {
        // A failed local change stays visible until it is retried or discarded.
        if flagged.contains(&incoming.id) {
            tracing::debug!(message = %incoming.id, "Keeping flagged local copy");
            continue;
        }

        let has_pending = state.pending.has_pending_for(incoming.id);
        let cached = state
            .messages
            .iter()
            .find(|message| message.id == incoming.id);

        if let Some(cached) = cached {
            if !has_pending && cached.content != incoming.content {
                let conflict = SyncConflict {
                    message_id: incoming.id,
                    local_updated_at: cached.updated_at,
                    incoming_updated_at: incoming.updated_at,
                    resolved_at: now,
                    strategy: LWW_STRATEGY.to_string(),
                };
                tracing::info!(message = %incoming.id, "Server copy replaced cached message");
                state.record_conflict(conflict);
                stats.conflicts += 1;
            }
        }

        upsert(&mut state.messages, incoming.clone());
        if has_pending {
            rebase(state, incoming.id);
        }
    }

    let before = state.messages.len();
    if !page.deleted.is_empty() {
        let tombstones: HashSet<MessageId> = page.deleted.iter().copied().collect();
        state
            .messages
            .retain(|message| !tombstones.contains(&message.id) || protected.contains(&message.id));
    }
    if full {
        let present: HashSet<MessageId> = page.messages.iter().map(|message| message.id).collect();
        state
            .messages
            .retain(|message| present.contains(&message.id) || protected.contains(&message.id));
    }
    stats.removed = before - state.messages.len();

    sort_messages(&mut state.messages);
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::PendingQueue;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 4, hour, 0, 0).unwrap()
    }

    fn server_copy(id: MessageId, content: &str, hour: u32) -> Message {
        Message::draft(id, content, at(hour))
    }

    #[test]
    fn merge_upserts_and_keeps_order() {
        let a = MessageId::new();
        let b = MessageId::new();
        let mut state = StoreSnapshot {
            messages: vec![server_copy(a, "old", 9)],
            ..StoreSnapshot::default()
        };
        let page = MessagePage {
            messages: vec![server_copy(a, "new", 9), server_copy(b, "fresh", 11)],
            ..MessagePage::default()
        };

        let stats = merge_page(&mut state, &page, false, at(12));

        assert_eq!(stats, MergeStats::default());
        let contents: Vec<&str> = state.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["fresh", "new"]);
    }

    #[test]
    fn merge_rebases_pending_update_without_conflict() {
        let a = MessageId::new();
        let mut state = StoreSnapshot {
            messages: vec![server_copy(a, "mine", 9)],
            pending: PendingQueue::from(vec![PendingOperation::update(a, "mine", at(10))]),
            ..StoreSnapshot::default()
        };
        let page = MessagePage {
            messages: vec![server_copy(a, "theirs", 11)],
            ..MessagePage::default()
        };

        let stats = merge_page(&mut state, &page, false, at(12));

        assert_eq!(stats.conflicts, 0);
        assert_eq!(state.messages[0].content, "mine");
        assert!(state.conflicts.is_empty());
    }

    #[test]
    fn merge_logs_conflict_when_server_overwrites_cached_copy() {
        let a = MessageId::new();
        let mut state = StoreSnapshot {
            messages: vec![server_copy(a, "mine", 9)],
            ..StoreSnapshot::default()
        };
        let page = MessagePage {
            messages: vec![server_copy(a, "theirs", 11)],
            ..MessagePage::default()
        };

        let stats = merge_page(&mut state, &page, false, at(12));

        assert_eq!(stats.conflicts, 1);
        assert_eq!(state.messages[0].content, "theirs");
        assert_eq!(state.conflicts[0].message_id, a);
        assert_eq!(state.conflicts[0].strategy, "lww");
        assert_eq!(state.conflicts[0].local_updated_at, at(9));
        assert_eq!(state.conflicts[0].incoming_updated_at, at(11));

        // Receiving the same copy again is not a conflict.
        let stats = merge_page(&mut state, &page, false, at(13));
        assert_eq!(stats.conflicts, 0);
    }

    #[test]
    fn merge_keeps_flagged_local_copy() {
        let a = MessageId::new();
        let rejected = PendingOperation::update(a, "local only", at(10));
        let mut state = StoreSnapshot {
            messages: vec![server_copy(a, "local only", 10)],
            failures: vec![SyncFailure {
                operation: rejected,
                reason: FailureReason::Rejected {
                    status: 403,
                    message: "Forbidden".to_string(),
                },
                failed_at: at(10),
            }],
            ..StoreSnapshot::default()
        };
        let page = MessagePage {
            messages: vec![server_copy(a, "original", 9)],
            ..MessagePage::default()
        };

        let stats = merge_page(&mut state, &page, true, at(12));

        assert_eq!(stats, MergeStats::default());
        assert_eq!(state.messages[0].content, "local only");
        assert!(state.conflicts.is_empty());
    }

    #[test]
    fn merge_does_not_resurrect_pending_delete() {
        let a = MessageId::new();
        let mut state = StoreSnapshot {
            pending: PendingQueue::from(vec![PendingOperation::delete(a, at(10))]),
            ..StoreSnapshot::default()
        };
        let page = MessagePage {
            messages: vec![server_copy(a, "still here", 9)],
            ..MessagePage::default()
        };

        merge_page(&mut state, &page, true, at(12));

        assert!(state.messages.is_empty());
    }

    #[test]
    fn incremental_merge_never_deletes_by_absence() {
        let a = MessageId::new();
        let mut state = StoreSnapshot {
            messages: vec![server_copy(a, "cached", 9)],
            ..StoreSnapshot::default()
        };

        let stats = merge_page(&mut state, &MessagePage::default(), false, at(12));

        assert_eq!(stats.removed, 0);
        assert_eq!(state.messages.len(), 1);
    }

    #[test]
    fn full_merge_drops_missing_unless_protected() {
        let gone = MessageId::new();
        let unsent = MessageId::new();
        let mut state = StoreSnapshot {
            messages: vec![server_copy(gone, "gone", 9), server_copy(unsent, "draft", 10)],
            pending: PendingQueue::from(vec![PendingOperation::create(unsent, "draft", at(10))]),
            ..StoreSnapshot::default()
        };

        let stats = merge_page(&mut state, &MessagePage::default(), true, at(12));

        assert_eq!(stats.removed, 1);
        assert_eq!(state.messages.len(), 1);
        assert_eq!(state.messages[0].id, unsent);
    }

    #[test]
    fn tombstones_remove_cached_messages() {
        let a = MessageId::new();
        let b = MessageId::new();
        let mut state = StoreSnapshot {
            messages: vec![server_copy(a, "a", 9), server_copy(b, "b", 9)],
            ..StoreSnapshot::default()
        };
        let page = MessagePage {
            deleted: vec![a],
            ..MessagePage::default()
        };

        let stats = merge_page(&mut state, &page, false, at(12));

        assert_eq!(stats.removed, 1);
        assert_eq!(state.messages[0].id, b);
    }

    #[test]
    fn classify_treats_idempotent_outcomes_as_applied() {
        let id = MessageId::new();
        let not_found = RemoteError::Status {
            status: 404,
            message: String::new(),
        };
        let conflict = RemoteError::Status {
            status: 409,
            message: String::new(),
        };

        assert!(matches!(
            classify(&PendingOperation::delete(id, at(9)), &not_found),
            Verdict::AlreadyApplied
        ));
        assert!(matches!(
            classify(&PendingOperation::create(id, "x", at(9)), &conflict),
            Verdict::AlreadyApplied
        ));
        assert!(matches!(
            classify(&PendingOperation::update(id, "x", at(9)), &not_found),
            Verdict::Permanent
        ));
        assert!(matches!(
            classify(&PendingOperation::update(id, "x", at(9)), &RemoteError::Unauthorized),
            Verdict::Auth
        ));
    }
}
