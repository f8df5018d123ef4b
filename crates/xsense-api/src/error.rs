use std::time::Duration;

use thiserror::Error;

/// Top-level error type for the `xsense-api` crate.
///
/// Covers every failure mode across the wire surfaces: SigV4 signing,
/// Cognito SRP, the vendor REST endpoint, IoT shadows, and the MQTT
/// channel. `xsense-core` folds these into its consumer-facing taxonomy.
#[derive(Debug, Error)]
pub enum Error {
    // ── Signing ─────────────────────────────────────────────────────
    /// AWS IoT credentials missing or unusable. Raised before any network call.
    #[error("Signing failed: {message}")]
    Signing { message: String },

    // ── Authentication ──────────────────────────────────────────────
    /// Cognito answered with a challenge other than `PASSWORD_VERIFIER`.
    #[error("Unexpected authentication challenge: {challenge}")]
    UnexpectedChallenge { challenge: String },

    /// Login failed (wrong credentials, malformed SRP challenge, failed re-login).
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    /// Session invalidated and the single re-authentication attempt did not help.
    #[error("Session expired: {message}")]
    SessionExpired { message: String },

    /// SRP arithmetic failed (degenerate server value, bad hex).
    #[error("SRP error: {0}")]
    Srp(String),

    // ── Server ──────────────────────────────────────────────────────
    /// The vendor endpoint is in a 5xx cool-down window.
    #[error("Server temporarily unavailable{}. Retrying in {}s", status_suffix(*status), retry_after.as_secs())]
    ServerUnavailable {
        status: Option<u16>,
        retry_after: Duration,
    },

    /// Vendor result code other than success, carried inside an HTTP 200.
    #[error("API error {code}: {message}")]
    Api { code: String, message: String },

    /// Non-success HTTP status outside the 5xx and 401 handling paths.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    // ── Shadows ─────────────────────────────────────────────────────
    /// A (thing, shadow) pair does not exist or is tripped in the breaker.
    #[error("Shadow not found: {thing}/{shadow}")]
    ShadowNotFound { thing: String, shadow: String },

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, timeout).
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    // ── MQTT ────────────────────────────────────────────────────────
    /// MQTT client or connection error.
    #[error("MQTT error: {0}")]
    Mqtt(String),

    /// Publish attempted while the realtime channel is down.
    #[error("Realtime channel is not connected")]
    NotConnected,

    /// The realtime channel task has shut down.
    #[error("Realtime channel closed")]
    ChannelClosed,

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

fn status_suffix(status: Option<u16>) -> String {
    status.map(|s| format!(" ({s})")).unwrap_or_default()
}

impl Error {
    /// Returns `true` if this error indicates auth has expired
    /// and a fresh login might resolve it.
    pub fn is_auth_expired(&self) -> bool {
        matches!(
            self,
            Self::Authentication { .. } | Self::SessionExpired { .. }
        )
    }

    /// Returns `true` if this is a transient error worth retrying later.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::ServerUnavailable { .. } | Self::Mqtt(_) | Self::NotConnected => true,
            _ => false,
        }
    }

    /// Returns `true` if this is a "not found" error.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::ShadowNotFound { .. } | Self::Http { status: 404, .. } => true,
            Self::Transport(e) => e.status() == Some(reqwest::StatusCode::NOT_FOUND),
            _ => false,
        }
    }

    /// Time until the caller may retry, when the failure carries one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::ServerUnavailable { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_unavailable_message_includes_wait() {
        let err = Error::ServerUnavailable {
            status: Some(502),
            retry_after: Duration::from_secs(120),
        };
        assert_eq!(
            err.to_string(),
            "Server temporarily unavailable (502). Retrying in 120s"
        );
        assert_eq!(err.retry_after(), Some(Duration::from_secs(120)));
        assert!(err.is_transient());
    }

    #[test]
    fn auth_classification() {
        assert!(
            Error::SessionExpired {
                message: "x".into()
            }
            .is_auth_expired()
        );
        assert!(!Error::NotConnected.is_auth_expired());
    }
}
