//! Data models for Quip

mod cursor;
mod failure;
mod message;
mod pending;
mod sync_conflict;

pub use cursor::SyncCursor;
pub use failure::{FailureReason, SyncFailure};
pub use message::{newest_first, sort_messages, Message, MessageId};
pub use pending::{OperationId, OperationKind, PendingOperation};
pub use sync_conflict::{SyncConflict, LWW_STRATEGY};
