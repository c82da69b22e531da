//! Offline-first synchronization.
//!
//! Local mutations land in the store and the pending queue immediately; the
//! reconciler later drains the queue against the server and merges what the
//! server reports back. The scheduler decides when cycles run.

mod engine;
mod queue;
mod reconciler;
mod scheduler;


pub use engine::{MessageStatus, SyncEngine};
pub use queue::{EnqueueOutcome, PendingQueue};
pub use reconciler::{SyncError, SyncReport};
pub use scheduler::{SchedulerHandle, SchedulerOptions, SyncEvent, SyncScheduler};
