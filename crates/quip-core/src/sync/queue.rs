//! Pending operation queue
//!
//! Strict FIFO over every local mutation, with coalescing of operations that
//! have not reached the server yet. The queue itself never touches the network
//! or the store; the engine commits it alongside the message cache.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{MessageId, OperationId, OperationKind, PendingOperation};

/// What `enqueue` did with an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Appended at the tail
    Appended(OperationId),
    /// Folded into an earlier operation for the same message
    Merged(OperationId),
    /// A delete cancelled a create that never reached the server; nothing is queued
    Cancelled { removed: usize },
}

/// FIFO of pending operations, persisted as a plain JSON array
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PendingQueue {
    ops: Vec<PendingOperation>,
    // The operation currently on the wire; never persisted.
    #[serde(skip)]
    in_flight: Option<OperationId>,
}

impl From<Vec<PendingOperation>> for PendingQueue {
    fn from(ops: Vec<PendingOperation>) -> Self {
        Self {
            ops,
            in_flight: None,
        }
    }
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Add an operation, coalescing with unsent operations for the same message
    pub fn enqueue(&mut self, op: PendingOperation) -> EnqueueOutcome {
        match op.kind {
            OperationKind::Create => self.append(op),
            OperationKind::Update => self.enqueue_update(op),
            OperationKind::Delete => self.enqueue_delete(op),
        }
    }

    fn append(&mut self, op: PendingOperation) -> EnqueueOutcome {
        let id = op.id;
        self.ops.push(op);
        EnqueueOutcome::Appended(id)
    }

    fn enqueue_update(&mut self, op: PendingOperation) -> EnqueueOutcome {
        let in_flight = self.in_flight;
        let last = self
            .ops
            .iter_mut()
            .rev()
            .find(|queued| queued.target_message_id == op.target_message_id);

        if let Some(last) = last {
            let unsent = !last.has_been_attempted() && Some(last.id) != in_flight;
            if unsent && matches!(last.kind, OperationKind::Create | OperationKind::Update) {
                last.payload = op.payload;
                return EnqueueOutcome::Merged(last.id);
            }
        }
        self.append(op)
    }

    fn enqueue_delete(&mut self, op: PendingOperation) -> EnqueueOutcome {
        let target = op.target_message_id;
        let in_flight = self.in_flight;
        let is_unsent =
            |queued: &PendingOperation| !queued.has_been_attempted() && Some(queued.id) != in_flight;

        let unsent_create = self.ops.iter().any(|queued| {
            queued.target_message_id == target
                && queued.kind == OperationKind::Create
                && is_unsent(queued)
        });

        if unsent_create {
            let before = self.ops.len();
            self.ops.retain(|queued| queued.target_message_id != target);
            return EnqueueOutcome::Cancelled {
                removed: before - self.ops.len(),
            };
        }

        // Updates the server has never seen are superseded by the delete.
        self.ops.retain(|queued| {
            !(queued.target_message_id == target
                && queued.kind == OperationKind::Update
                && is_unsent(queued))
        });
        self.append(op)
    }

    /// Head of the queue
    pub fn peek_next(&self) -> Option<&PendingOperation> {
        self.ops.first()
    }

    /// Remove an operation the server confirmed
    pub fn dequeue_confirmed(&mut self, id: OperationId) -> Option<PendingOperation> {
        let index = self.ops.iter().position(|op| op.id == id)?;
        if self.in_flight == Some(id) {
            self.in_flight = None;
        }
        Some(self.ops.remove(index))
    }

    /// Count one more failed attempt, returning the new count
    pub fn increment_retry(&mut self, id: OperationId) -> Option<u32> {
        let op = self.ops.iter_mut().find(|op| op.id == id)?;
        op.retry_count = op.retry_count.saturating_add(1);
        Some(op.retry_count)
    }

    /// Note that the operation is about to be sent; returns false when already noted
    pub fn mark_attempted(&mut self, id: OperationId, at: DateTime<Utc>) -> bool {
        match self.ops.iter_mut().find(|op| op.id == id) {
            Some(op) if op.attempted_at.is_none() => {
                op.attempted_at = Some(at);
                true
            }
            _ => false,
        }
    }

    /// Record the latest error and when the operation may run again
    pub fn defer(&mut self, id: OperationId, error: String, next_attempt_at: DateTime<Utc>) {
        if let Some(op) = self.ops.iter_mut().find(|op| op.id == id) {
            op.last_error = Some(error);
            op.next_attempt_at = Some(next_attempt_at);
        }
    }

    /// Every queued operation in FIFO order
    pub fn list_all(&self) -> &[PendingOperation] {
        &self.ops
    }

    pub fn get(&self, id: OperationId) -> Option<&PendingOperation> {
        self.ops.iter().find(|op| op.id == id)
    }

    /// Operations for one message, in enqueue order
    pub fn ops_for(&self, message_id: MessageId) -> impl Iterator<Item = &PendingOperation> {
        self.ops
            .iter()
            .filter(move |op| op.target_message_id == message_id)
    }

    pub fn has_pending_for(&self, message_id: MessageId) -> bool {
        self.ops_for(message_id).next().is_some()
    }

    /// Drop every operation for a message, returning what was removed
    pub fn remove_for_message(&mut self, message_id: MessageId) -> Vec<PendingOperation> {
        let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.ops)
            .into_iter()
            .partition(|op| op.target_message_id == message_id);
        self.ops = kept;
        if self
            .in_flight
            .is_some_and(|id| removed.iter().any(|op| op.id == id))
        {
            self.in_flight = None;
        }
        removed
    }

    /// Put an operation back at the head (manual retry of a failed operation)
    pub fn push_front(&mut self, op: PendingOperation) {
        self.ops.insert(0, op);
    }

    pub fn mark_in_flight(&mut self, id: OperationId) {
        self.in_flight = Some(id);
    }

    pub fn clear_in_flight(&mut self) {
        self.in_flight = None;
    }

    pub const fn in_flight(&self) -> Option<OperationId> {
        self.in_flight
    }
}
