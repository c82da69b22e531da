//! Local store for Quip

mod connection;
mod kv;
mod migrations;
mod repository;

pub use connection::Database;
pub use kv::{KeyValueStore, LibSqlKeyValueStore, MemoryKeyValueStore, StoreWrite};
pub use repository::{StoreKey, StoreSnapshot, SyncRepository, MAX_CONFLICT_LOG};
