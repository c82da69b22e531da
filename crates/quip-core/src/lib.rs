//! quip-core - Offline-first sync engine for Quip
//!
//! Messages are written to a local store first and queued for the server.
//! The sync engine drains that queue, merges what the server reports back,
//! and the scheduler decides when to do so.

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod remote;
pub mod state;
pub mod sync;
pub mod util;

pub use config::SyncSettings;
pub use error::{Error, Result};
pub use models::{Message, MessageId, PendingOperation, SyncFailure};
pub use state::SyncState;
pub use sync::{SyncEngine, SyncError, SyncEvent, SyncReport, SyncScheduler};
