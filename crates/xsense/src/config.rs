//! CLI configuration: thin wrapper around `xsense_config`.
//!
//! Adds flag overrides (--profile, --email, --timeout) and an interactive
//! password prompt when nothing else supplies one.

use std::io::IsTerminal;

use xsense_config::{Config, ConfigError, Profile};
use xsense_core::ClientConfig;

use crate::cli::GlobalOpts;
use crate::error::CliError;

/// Build a `ClientConfig` from the config file, profile, and CLI overrides.
pub fn build_client_config(global: &GlobalOpts) -> Result<ClientConfig, CliError> {
    let cfg = xsense_config::load_config()?;
    build_from(&cfg, global)
}

fn build_from(cfg: &Config, global: &GlobalOpts) -> Result<ClientConfig, CliError> {
    let (name, mut profile) = cfg.profile(global.profile.as_deref()).map_err(|e| match e {
        ConfigError::UnknownProfile { profile } => CliError::ProfileNotFound {
            name: profile,
            available: available_profiles(cfg),
            path: xsense_config::config_path().display().to_string(),
        },
        other => other.into(),
    })?;

    if let Some(ref email) = global.email {
        profile.email = Some(email.clone());
    }
    if let Some(timeout) = global.timeout {
        profile.timeout = Some(timeout.as_secs().max(1));
    }
    xsense_config::resolve_email(&profile, &name)?;
    if profile.password.is_none() {
        if let Some(password) = prompt_password(&profile, &name)? {
            profile.password = Some(password);
        }
    }

    let config = xsense_config::profile_to_client_config(&profile, &name, &cfg.defaults)?;
    tracing::debug!(profile = %name, email = %config.email, "resolved client config");
    Ok(config)
}

/// Ask for the password on a terminal when env and keyring have none.
fn prompt_password(profile: &Profile, name: &str) -> Result<Option<String>, CliError> {
    match xsense_config::resolve_password(profile, name) {
        Ok(_) => Ok(None),
        Err(ConfigError::NoCredentials { .. }) if std::io::stdin().is_terminal() => {
            let password = rpassword::prompt_password("X-Sense password: ")?;
            Ok(Some(password))
        }
        Err(ConfigError::NoCredentials { .. }) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn available_profiles(cfg: &Config) -> String {
    let mut names: Vec<&str> = cfg.profiles.keys().map(String::as_str).collect();
    if names.is_empty() {
        return "(none)".into();
    }
    names.sort_unstable();
    names.join(", ")
}
