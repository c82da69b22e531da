pub mod account;
pub mod add;
pub mod auth_cmd;
pub mod common;
pub mod config;
pub mod delete;
pub mod edit;
pub mod list;
pub mod sync;
pub mod watch;
