//! Quip CLI - post short messages from the terminal, online or not
//!
//! Every write lands in the local store first; `quip sync` and `quip watch`
//! push queued changes to the server and pull remote ones.

mod auth;
mod cli;
mod commands;
mod config_profiles;
mod error;


use clap::{CommandFactory, Parser};
use tracing_subscriber::filter::LevelFilter;

use crate::cli::{Cli, Commands};
use crate::commands::account::run_account;
use crate::commands::add::run_add;
use crate::commands::auth_cmd::{run_login, run_logout, run_status};
use crate::commands::common::{resolve_db_path, Context};
use crate::commands::config::run_config;
use crate::commands::delete::run_delete;
use crate::commands::edit::run_edit;
use crate::commands::list::run_list;
use crate::commands::sync::run_sync;
use crate::commands::watch::run_watch;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(LevelFilter::WARN.into())
                .from_env_lossy()
                .add_directive("quip=info".parse().map_err(|error| {
                    CliError::Config(format!("invalid log directive: {error}"))
                })?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let ctx = Context {
        db_path: resolve_db_path(cli.db_path)?,
        profile: cli.profile,
    };

    match cli.command {
        Some(Commands::Add { content }) => run_add(&content, &ctx).await?,
        Some(Commands::List { limit, json }) => run_list(limit, json, &ctx).await?,
        Some(Commands::Edit { id, content }) => run_edit(&id, &content, &ctx).await?,
        Some(Commands::Delete { id }) => run_delete(&id, &ctx).await?,
        Some(Commands::Sync { command }) => run_sync(command, &ctx).await?,
        Some(Commands::Watch) => run_watch(&ctx).await?,
        Some(Commands::Login { email, password }) => run_login(&email, &password, &ctx).await?,
        Some(Commands::Logout) => run_logout(&ctx)?,
        Some(Commands::Status) => run_status(&ctx).await?,
        Some(Commands::Account { command }) => run_account(command, &ctx).await?,
        Some(Commands::Config { command }) => run_config(command, &ctx)?,
        None => {
            // Quick capture mode: quip "my message"
            if cli.message.is_empty() {
                Cli::command().print_help().map_err(CliError::Io)?;
                println!();
            } else {
                run_add(&cli.message, &ctx).await?;
            }
        }
    }

    Ok(())
}
