use quip_core::auth::{AuthClient, AuthError, SessionPersistence};

use crate::cli::AccountCommands;
use crate::commands::common::{load_settings, require_remote, Context};
use crate::error::CliError;

pub async fn run_account(command: AccountCommands, ctx: &Context) -> Result<(), CliError> {
    let settings = load_settings()?;
    let remote = require_remote(ctx, &settings)?;
    let line = apply_account_command(&remote.auth_client(), command, &remote.profile_name).await?;
    println!("{line}");
    Ok(())
}

/// Send an account change and describe the result
pub async fn apply_account_command<S: SessionPersistence>(
    auth: &AuthClient<S>,
    command: AccountCommands,
    profile_name: &str,
) -> Result<String, CliError> {
    let result = match command {
        AccountCommands::Email { email } => auth
            .update_email(&email)
            .await
            .map(|session| format!("Email changed to {}", session.user.email)),
        AccountCommands::Username { username } => {
            auth.update_username(&username).await.map(|session| {
                format!(
                    "Username changed to {}",
                    session.user.username.unwrap_or_default()
                )
            })
        }
    };

    result.map_err(|error| match error {
        AuthError::NotSignedIn => CliError::NotSignedIn(profile_name.to_string()),
        other => CliError::Auth(other),
    })
}
