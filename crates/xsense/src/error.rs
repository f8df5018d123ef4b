//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text and stable exit codes.

use std::time::Duration;

use miette::Diagnostic;
use thiserror::Error;

use xsense_config::ConfigError;
use xsense_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const UNAVAILABLE: i32 = 5;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Cannot reach the X-Sense cloud: {reason}")]
    #[diagnostic(
        code(xsense::connection_failed),
        help("Check your network connection and try again.")
    )]
    ConnectionFailed { reason: String },

    #[error("{message}")]
    #[diagnostic(
        code(xsense::server_unavailable),
        help("The X-Sense servers are failing. Next retry possible in {retry}.")
    )]
    ServerUnavailable { message: String, retry: String },

    #[error("Realtime connection for house {house_id} is not available")]
    #[diagnostic(
        code(xsense::realtime),
        help(
            "Commands travel over MQTT. Check that the house has a broker\n\
             (xsense houses -o json) and retry with a longer --connect-timeout."
        )
    )]
    RealtimeUnavailable { house_id: String },

    // ── Authentication ───────────────────────────────────────────────
    #[error("Authentication failed: {message}")]
    #[diagnostic(
        code(xsense::auth_failed),
        help("Verify the email and password of profile '{profile}'.")
    )]
    AuthFailed { profile: String, message: String },

    #[error("Session expired: {message}")]
    #[diagnostic(
        code(xsense::session_expired),
        help("The account was probably logged in elsewhere. Run the command again.")
    )]
    SessionExpired { message: String },

    #[error("No credentials configured for profile '{profile}'")]
    #[diagnostic(
        code(xsense::no_credentials),
        help(
            "Add email and password to the profile in {path},\n\
             or set XSENSE_EMAIL and XSENSE_PASSWORD."
        )
    )]
    NoCredentials { profile: String, path: String },

    // ── Resources ────────────────────────────────────────────────────
    #[error("{resource_type} '{identifier}' not found")]
    #[diagnostic(
        code(xsense::not_found),
        help("Run: xsense {list_command} to see available {resource_type}s")
    )]
    NotFound {
        resource_type: String,
        identifier: String,
        list_command: String,
    },

    // ── API ──────────────────────────────────────────────────────────
    #[error("API error ({code}): {message}")]
    #[diagnostic(code(xsense::api_error))]
    ApiError { code: String, message: String },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(xsense::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(xsense::profile_not_found),
        help("Available profiles: {available}\nConfig file: {path}")
    )]
    ProfileNotFound {
        name: String,
        available: String,
        path: String,
    },

    #[error("Configuration error: {message}")]
    #[diagnostic(code(xsense::config))]
    Config { message: String },

    // ── Timeout ──────────────────────────────────────────────────────
    #[error("Timed out after {seconds}s waiting for {what}")]
    #[diagnostic(code(xsense::timeout))]
    Timeout { what: String, seconds: u64 },

    // ── IO / Serialization ────────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Output serialization failed: {0}")]
    #[diagnostic(code(xsense::serialize))]
    Serialize(String),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } | Self::RealtimeUnavailable { .. } => {
                exit_code::CONNECTION
            }
            Self::ServerUnavailable { .. } => exit_code::UNAVAILABLE,
            Self::AuthFailed { .. } | Self::SessionExpired { .. } | Self::NoCredentials { .. } => {
                exit_code::AUTH
            }
            Self::NotFound { .. } => exit_code::NOT_FOUND,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::Validation { .. } | Self::ProfileNotFound { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }

    pub fn not_found(resource_type: &str, identifier: &str, list_command: &str) -> Self {
        Self::NotFound {
            resource_type: resource_type.into(),
            identifier: identifier.into(),
            list_command: list_command.into(),
        }
    }
}

fn format_retry(retry: Duration) -> String {
    let rounded = Duration::from_secs(retry.as_secs().max(1));
    humantime::format_duration(rounded).to_string()
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ConnectionFailed { reason } => Self::ConnectionFailed { reason },

            CoreError::ServerUnavailable {
                message,
                retry_after,
            } => Self::ServerUnavailable {
                message,
                retry: format_retry(retry_after),
            },

            CoreError::RealtimeNotConnected { house_id } => Self::RealtimeUnavailable { house_id },

            CoreError::AuthenticationFailed { message }
            | CoreError::Signing { message } => Self::AuthFailed {
                profile: "current".into(),
                message,
            },

            CoreError::UnexpectedChallenge { challenge } => Self::AuthFailed {
                profile: "current".into(),
                message: format!("unsupported challenge {challenge}"),
            },

            CoreError::SessionExpired { message } => Self::SessionExpired { message },

            CoreError::HouseNotFound { house_id } => Self::not_found("house", &house_id, "houses"),
            CoreError::StationNotFound { station_id } => {
                Self::not_found("station", &station_id, "stations")
            }
            CoreError::DeviceNotFound { device_id } => {
                Self::not_found("device", &device_id, "devices")
            }
            CoreError::ShadowNotFound { thing, shadow } => {
                Self::not_found("shadow", &format!("{thing}/{shadow}"), "devices")
            }
            CoreError::OwnerUnknown { house_id } => Self::ApiError {
                code: "owner_unknown".into(),
                message: format!("owner of house {house_id} is unknown"),
            },

            CoreError::Api { code, message } => Self::ApiError { code, message },

            CoreError::Config { message } => Self::Config { message },

            CoreError::NotInitialized => Self::ApiError {
                code: "lifecycle".into(),
                message: "client is not initialized".into(),
            },
            CoreError::Destroyed => Self::ApiError {
                code: "lifecycle".into(),
                message: "client has been destroyed".into(),
            },

            CoreError::Internal(message) => Self::ApiError {
                code: "internal".into(),
                message,
            },
        }
    }
}

// ── ConfigError → CliError mapping ───────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        let path = xsense_config::config_path().display().to_string();
        match err {
            ConfigError::NoCredentials { profile } => Self::NoCredentials { profile, path },
            ConfigError::UnknownProfile { profile } => Self::ProfileNotFound {
                name: profile,
                available: String::new(),
                path,
            },
            ConfigError::Validation { field, reason } => Self::Validation { field, reason },
            other => Self::Config {
                message: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_errors_are_not_found() {
        let err = CliError::from(CoreError::DeviceNotFound {
            device_id: "D9".into(),
        });
        assert_eq!(err.exit_code(), exit_code::NOT_FOUND);
        assert!(err.to_string().contains("D9"));
    }

    #[test]
    fn server_unavailable_shows_retry_eta() {
        let err = CliError::from(CoreError::ServerUnavailable {
            message: "server error 502".into(),
            retry_after: Duration::from_secs(120),
        });
        assert_eq!(err.exit_code(), exit_code::UNAVAILABLE);
        match err {
            CliError::ServerUnavailable { retry, .. } => assert_eq!(retry, "2m"),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
