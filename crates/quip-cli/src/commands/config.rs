use std::env;

use quip_core::util::normalize_text_option;

use crate::cli::ConfigCommands;
use crate::commands::common::{resolve_profile, Context};
use crate::config_profiles::{normalize_api_url, CliProfilesConfig};
use crate::error::CliError;

pub fn run_config(command: ConfigCommands, ctx: &Context) -> Result<(), CliError> {
    match command {
        ConfigCommands::Init {
            profile,
            api_url,
            no_activate,
        } => run_config_init(
            profile.as_deref().or(ctx.profile.as_deref()),
            api_url,
            no_activate,
        ),
        ConfigCommands::Show => run_config_show(ctx),
    }
}

pub fn run_config_init(
    profile_name: Option<&str>,
    api_url: Option<String>,
    no_activate: bool,
) -> Result<(), CliError> {
    let mut config = CliProfilesConfig::load().map_err(CliError::Config)?;
    let profile_name = config.resolve_profile_name(profile_name);
    let api_url = api_url.or_else(|| env::var("QUIP_API_URL").ok());

    apply_config_init(&mut config, &profile_name, api_url, no_activate)?;

    let path = config.save().map_err(CliError::Config)?;
    println!("Profile '{profile_name}' initialized at {}", path.display());

    if config
        .profile(&profile_name)
        .and_then(|profile| profile.api_base_url())
        .is_some()
    {
        println!("Run `quip login --email <EMAIL> --password <PASSWORD>` to start syncing.");
    } else {
        println!("Profile '{profile_name}' is missing: api_url (messages stay local)");
    }
    Ok(())
}

/// Merge an init request into the loaded config
pub fn apply_config_init(
    config: &mut CliProfilesConfig,
    profile_name: &str,
    api_url: Option<String>,
    no_activate: bool,
) -> Result<(), CliError> {
    let api_url = normalize_text_option(api_url)
        .map(|url| normalize_api_url(&url))
        .transpose()
        .map_err(CliError::Config)?;

    let profile = config.profile_mut_or_default(profile_name);
    if let Some(url) = api_url {
        profile.api_base_url = Some(url);
    }

    if !no_activate {
        config.active_profile = Some(profile_name.to_string());
    }
    Ok(())
}

fn run_config_show(ctx: &Context) -> Result<(), CliError> {
    let (config, profile_name) = resolve_profile(ctx)?;
    let active = config.active_profile.as_deref() == Some(profile_name.as_str());
    println!(
        "profile: {profile_name}{}",
        if active { " (active)" } else { "" }
    );
    println!(
        "api_url: {}",
        config
            .resolve_api_url(&profile_name)
            .unwrap_or_else(|| "(none)".to_string())
    );
    println!("database: {}", ctx.db_path.display());
    Ok(())
}
