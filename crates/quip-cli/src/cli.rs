use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "quip")]
#[command(about = "Post short messages from the command line, online or not")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// CLI profile name (server URL and stored session)
    #[arg(long, global = true, value_name = "NAME")]
    pub profile: Option<String>,

    /// Quick capture: quip "my message here"
    #[arg(trailing_var_arg = true)]
    pub message: Vec<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Post a new message
    #[command(alias = "new")]
    Add {
        /// Message content
        content: Vec<String>,
    },
    /// List cached messages, newest first
    List {
        /// Number of messages to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Edit an existing message
    Edit {
        /// Message ID or unique ID prefix
        id: String,
        /// New content (opens $EDITOR when omitted)
        content: Vec<String>,
    },
    /// Delete an existing message
    Delete {
        /// Message ID or unique ID prefix
        id: String,
    },
    /// Push queued changes and pull remote ones
    Sync {
        #[command(subcommand)]
        command: Option<SyncCommands>,
    },
    /// Keep syncing in the foreground until interrupted
    Watch,
    /// Sign in to the configured server
    Login {
        /// Account email
        #[arg(long, value_name = "EMAIL")]
        email: String,
        /// Account password
        #[arg(long, value_name = "PASSWORD")]
        password: String,
    },
    /// Sign out and forget the stored session
    Logout,
    /// Show profile, session and queue status
    Status,
    /// Change account details on the server
    Account {
        #[command(subcommand)]
        command: AccountCommands,
    },
    /// Configure CLI profiles
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum SyncCommands {
    /// List operations waiting to be sent
    Pending {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List operations the server rejected or that ran out of retries
    Failures {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Send a failed operation again
    Retry {
        /// Operation ID or unique ID prefix
        id: String,
    },
    /// Drop a failed operation
    Discard {
        /// Operation ID or unique ID prefix
        id: String,
    },
    /// List recently resolved sync conflicts
    Conflicts {
        /// Number of conflicts to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Refetch every message on the next sync
    Full,
}

#[derive(Subcommand)]
pub enum AccountCommands {
    /// Change the account email address
    Email {
        /// New email address
        email: String,
    },
    /// Change the account display name
    Username {
        /// New username
        username: String,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Initialize or update profile config
    Init {
        /// Profile name to initialize
        #[arg(long, value_name = "NAME")]
        profile: Option<String>,
        /// Server API base URL (e.g. <https://quip.example.com/api>)
        #[arg(long, value_name = "URL")]
        api_url: Option<String>,
        /// Keep current active profile instead of activating this one
        #[arg(long)]
        no_activate: bool,
    },
    /// Print the resolved profile
    Show,
}
