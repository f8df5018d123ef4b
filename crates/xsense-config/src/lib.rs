//! Shared configuration for X-Sense tools.
//!
//! TOML profiles, credential resolution (plaintext, env, keyring) and
//! translation to `xsense_core::ClientConfig`. The CLI layers its flag
//! overrides on top.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use xsense_core::ClientConfig;

/// Environment variable consulted for the password.
pub const PASSWORD_ENV: &str = "XSENSE_PASSWORD";
/// Environment variable consulted for the account email.
pub const EMAIL_ENV: &str = "XSENSE_EMAIL";

const KEYRING_SERVICE: &str = "xsense";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no credentials configured for profile '{profile}'")]
    NoCredentials { profile: String },

    #[error("unknown profile '{profile}'")]
    UnknownProfile { profile: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("keyring error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Default profile name.
    pub default_profile: Option<String>,

    /// Global defaults.
    #[serde(default)]
    pub defaults: Defaults,

    /// Named account profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default = "default_color")]
    pub color: String,

    /// HTTP timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Background refresh interval in seconds; 0 disables.
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            color: default_color(),
            timeout: default_timeout(),
            poll_interval: default_poll_interval(),
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_color() -> String {
    "auto".into()
}
fn default_timeout() -> u64 {
    30
}
fn default_poll_interval() -> u64 {
    60
}

/// A named account profile.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Profile {
    /// Account email.
    pub email: Option<String>,

    /// Password (plaintext; prefer env or keyring).
    pub password: Option<String>,

    /// Vendor API base URL override.
    pub base_url: Option<String>,

    /// Cognito endpoint override.
    pub cognito_endpoint: Option<String>,

    /// IoT shadow host template override, with a `{region}` placeholder.
    pub iot_host: Option<String>,

    /// Override timeout.
    pub timeout: Option<u64>,

    /// Override poll interval.
    pub poll_interval: Option<u64>,

    /// Allow realtime MQTT connections.
    pub realtime: Option<bool>,

    /// Try the legacy token login for per-station broker settings.
    pub legacy_login: Option<bool>,
}

impl Config {
    /// Pick a profile: the explicit name, then `default_profile`, then
    /// `"default"`.
    ///
    /// An undefined default profile resolves to an empty one so that
    /// env-only setups (`XSENSE_EMAIL`/`XSENSE_PASSWORD`) work without a
    /// config file. An explicitly named profile must exist.
    pub fn profile(&self, name: Option<&str>) -> Result<(String, Profile), ConfigError> {
        let chosen = name
            .map(str::to_owned)
            .or_else(|| self.default_profile.clone())
            .unwrap_or_else(|| "default".into());

        match self.profiles.get(&chosen) {
            Some(profile) => Ok((chosen, profile.clone())),
            None if name.is_none() => Ok((chosen, Profile::default())),
            None => Err(ConfigError::UnknownProfile { profile: chosen }),
        }
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("com", "xsense", "xsense").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("xsense");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load defaults, then `path`, then `XSENSE_*` variables.
///
/// Nested keys use a double underscore: `XSENSE_DEFAULTS__OUTPUT=json`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("XSENSE_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML at `path`, creating parent directories.
pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Credential resolution ───────────────────────────────────────────

/// Account email: profile, then `XSENSE_EMAIL`.
pub fn resolve_email(profile: &Profile, profile_name: &str) -> Result<String, ConfigError> {
    profile
        .email
        .clone()
        .filter(|e| !e.trim().is_empty())
        .or_else(|| std::env::var(EMAIL_ENV).ok())
        .ok_or_else(|| ConfigError::NoCredentials {
            profile: profile_name.into(),
        })
}

/// Password: profile plaintext, then `XSENSE_PASSWORD`, then the OS
/// keyring entry `xsense/<profile>`.
pub fn resolve_password(profile: &Profile, profile_name: &str) -> Result<SecretString, ConfigError> {
    // 1. Plaintext in config
    if let Some(ref pw) = profile.password {
        if !pw.is_empty() {
            return Ok(SecretString::from(pw.clone()));
        }
    }

    // 2. Env var
    if let Ok(pw) = std::env::var(PASSWORD_ENV) {
        return Ok(SecretString::from(pw));
    }

    // 3. Keyring
    let entry = keyring::Entry::new(KEYRING_SERVICE, &keyring_user(profile_name))?;
    if let Ok(pw) = entry.get_password() {
        return Ok(SecretString::from(pw));
    }

    Err(ConfigError::NoCredentials {
        profile: profile_name.into(),
    })
}

fn keyring_user(profile_name: &str) -> String {
    format!("{profile_name}/password")
}

/// Build a `ClientConfig` from a profile and the global defaults.
pub fn profile_to_client_config(
    profile: &Profile,
    profile_name: &str,
    defaults: &Defaults,
) -> Result<ClientConfig, ConfigError> {
    let email = resolve_email(profile, profile_name)?;
    let password = resolve_password(profile, profile_name)?;

    let mut config = ClientConfig::new(email, password).map_err(|e| ConfigError::Validation {
        field: "client".into(),
        reason: e.to_string(),
    })?;

    if let Some(ref base) = profile.base_url {
        config.base_url = parse_url("base_url", base)?;
    }
    if let Some(ref endpoint) = profile.cognito_endpoint {
        config.cognito_endpoint = Some(parse_url("cognito_endpoint", endpoint)?);
    }
    if let Some(ref host) = profile.iot_host {
        config.iot_host_template.clone_from(host);
    }
    config.timeout = Duration::from_secs(profile.timeout.unwrap_or(defaults.timeout));
    config.poll_interval =
        Duration::from_secs(profile.poll_interval.unwrap_or(defaults.poll_interval));
    if let Some(realtime) = profile.realtime {
        config.realtime_enabled = realtime;
    }
    if let Some(legacy) = profile.legacy_login {
        config.legacy_login_enabled = legacy;
    }

    config.validate().map_err(|e| ConfigError::Validation {
        field: "profile".into(),
        reason: e.to_string(),
    })?;
    Ok(config)
}

fn parse_url(field: &str, value: &str) -> Result<url::Url, ConfigError> {
    value.parse().map_err(|_| ConfigError::Validation {
        field: field.into(),
        reason: format!("invalid URL: {value}"),
    })
}
