use quip_core::auth::SessionPersistence;

use crate::auth::{load_stored_session, SessionStore};
use crate::commands::common::{
    connect, load_settings, open_engine, require_remote, resolve_profile, Context,
};
use crate::error::CliError;

pub async fn run_login(email: &str, password: &str, ctx: &Context) -> Result<(), CliError> {
    let settings = load_settings()?;
    let remote = require_remote(ctx, &settings)?;
    let session = remote.auth_client().login(email, password).await?;

    let name = session.user.username.as_deref().unwrap_or(&session.user.email);
    println!(
        "Signed in profile '{}' as {name} at {}",
        remote.profile_name,
        remote.api.base_url()
    );
    Ok(())
}

pub fn run_logout(ctx: &Context) -> Result<(), CliError> {
    let settings = load_settings()?;
    match connect(ctx, &settings)? {
        Some(remote) => {
            remote.auth_client().logout()?;
            println!("Signed out profile '{}'", remote.profile_name);
        }
        None => {
            let (_, profile_name) = resolve_profile(ctx)?;
            SessionStore::new(&profile_name).clear_session()?;
            println!("Signed out profile '{profile_name}'");
        }
    }
    Ok(())
}

pub async fn run_status(ctx: &Context) -> Result<(), CliError> {
    let (config, profile_name) = resolve_profile(ctx)?;

    match config.resolve_api_url(&profile_name) {
        Some(url) => println!("Profile '{profile_name}' uses {url}"),
        None => println!("Profile '{profile_name}' has no server configured (local only)"),
    }
    match load_stored_session(&profile_name)? {
        Some(session) => println!("Signed in as {}", session.user.email),
        None => println!("Not signed in"),
    }

    let engine = open_engine(ctx).await?;
    let pending = engine.pending_operations().await.len();
    let failures = engine.sync_failures().await.len();
    println!(
        "{} cached message(s), {pending} queued change(s), {failures} failed",
        engine.list_messages().await.len()
    );
    match engine.cursor().await.last_sync {
        Some(at) => println!("Last synced through {}", at.to_rfc3339()),
        None => println!("Never synced"),
    }
    Ok(())
}
