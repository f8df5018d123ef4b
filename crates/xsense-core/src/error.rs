// ── Core error types ──
//
// Consumer-facing errors from xsense-core. Callers never see HTTP
// statuses or JSON parse failures directly; the `From<xsense_api::Error>`
// impl folds wire-layer failures into this taxonomy. Every error carries
// a kind, a human message (`Display`) and, when known, a retry ETA.

use std::time::Duration;

use thiserror::Error;

/// Coarse classification for hub and UI layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::AsRefStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Signing,
    UnexpectedChallenge,
    AuthFailed,
    SessionExpired,
    ServerUnavailable,
    ShadowNotFound,
    NotFound,
    RealtimeNotConnected,
    NotInitialized,
    Destroyed,
    Connection,
    Api,
    Config,
    Internal,
}

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Authentication ───────────────────────────────────────────────
    #[error("Signing failed: {message}")]
    Signing { message: String },

    #[error("Unexpected authentication challenge: {challenge}")]
    UnexpectedChallenge { challenge: String },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Session expired: {message}")]
    SessionExpired { message: String },

    // ── Server ───────────────────────────────────────────────────────
    #[error("{message}")]
    ServerUnavailable {
        message: String,
        retry_after: Duration,
    },

    #[error("API error {code}: {message}")]
    Api { code: String, message: String },

    #[error("Cannot reach the X-Sense cloud: {reason}")]
    ConnectionFailed { reason: String },

    // ── Lookup ───────────────────────────────────────────────────────
    #[error("House not found: {house_id}")]
    HouseNotFound { house_id: String },

    #[error("Station not found: {station_id}")]
    StationNotFound { station_id: String },

    #[error("Device not found: {device_id}")]
    DeviceNotFound { device_id: String },

    #[error("Shadow not found: {thing}/{shadow}")]
    ShadowNotFound { thing: String, shadow: String },

    // ── Realtime ─────────────────────────────────────────────────────
    #[error("Realtime channel for house {house_id} is not connected")]
    RealtimeNotConnected { house_id: String },

    #[error("Owner of house {house_id} is unknown; refresh the device list first")]
    OwnerUnknown { house_id: String },

    // ── Lifecycle ────────────────────────────────────────────────────
    #[error("Client is not initialized; call init() first")]
    NotInitialized,

    #[error("Client has been destroyed")]
    Destroyed,

    // ── Configuration ────────────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Signing { .. } => ErrorKind::Signing,
            Self::UnexpectedChallenge { .. } => ErrorKind::UnexpectedChallenge,
            Self::AuthenticationFailed { .. } => ErrorKind::AuthFailed,
            Self::SessionExpired { .. } => ErrorKind::SessionExpired,
            Self::ServerUnavailable { .. } => ErrorKind::ServerUnavailable,
            Self::Api { .. } => ErrorKind::Api,
            Self::ConnectionFailed { .. } => ErrorKind::Connection,
            Self::HouseNotFound { .. }
            | Self::StationNotFound { .. }
            | Self::DeviceNotFound { .. }
            | Self::OwnerUnknown { .. } => ErrorKind::NotFound,
            Self::ShadowNotFound { .. } => ErrorKind::ShadowNotFound,
            Self::RealtimeNotConnected { .. } => ErrorKind::RealtimeNotConnected,
            Self::NotInitialized => ErrorKind::NotInitialized,
            Self::Destroyed => ErrorKind::Destroyed,
            Self::Config { .. } => ErrorKind::Config,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Time until an automatic retry makes sense, if the failure has one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::ServerUnavailable { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }

    /// Whether the user has to log in again before anything will work.
    pub fn needs_login(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::AuthFailed | ErrorKind::SessionExpired | ErrorKind::UnexpectedChallenge
        )
    }

    pub(crate) fn realtime(house_id: &str) -> Self {
        Self::RealtimeNotConnected {
            house_id: house_id.to_owned(),
        }
    }
}

// ── Conversion from wire-layer errors ────────────────────────────────

impl From<xsense_api::Error> for CoreError {
    fn from(err: xsense_api::Error) -> Self {
        use xsense_api::Error as Api;

        match err {
            Api::Signing { message } => Self::Signing { message },
            Api::UnexpectedChallenge { challenge } => Self::UnexpectedChallenge { challenge },
            Api::Authentication { message } => Self::AuthenticationFailed { message },
            Api::Srp(message) => Self::AuthenticationFailed {
                message: format!("malformed SRP exchange: {message}"),
            },
            Api::SessionExpired { message } => Self::SessionExpired { message },
            e @ Api::ServerUnavailable { .. } => {
                let retry_after = e.retry_after().unwrap_or_default();
                Self::ServerUnavailable {
                    message: e.to_string(),
                    retry_after,
                }
            }
            Api::Api { code, message } => Self::Api { code, message },
            Api::Http { status, body } => Self::Api {
                code: status.to_string(),
                message: body,
            },
            Api::ShadowNotFound { thing, shadow } => Self::ShadowNotFound { thing, shadow },
            Api::Transport(e) => Self::ConnectionFailed {
                reason: e.to_string(),
            },
            Api::InvalidUrl(e) => Self::Config {
                message: format!("Invalid URL: {e}"),
            },
            Api::Mqtt(reason) => Self::ConnectionFailed { reason },
            Api::NotConnected | Api::ChannelClosed => Self::RealtimeNotConnected {
                house_id: String::new(),
            },
            Api::Deserialization { message, body: _ } => {
                Self::Internal(format!("Deserialization error: {message}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_unavailable_keeps_retry_eta() {
        let err = CoreError::from(xsense_api::Error::ServerUnavailable {
            status: Some(502),
            retry_after: Duration::from_secs(120),
        });
        assert_eq!(err.kind(), ErrorKind::ServerUnavailable);
        assert_eq!(err.retry_after(), Some(Duration::from_secs(120)));
        assert!(err.to_string().contains("502"));
    }

    #[test]
    fn session_errors_need_login() {
        let err = CoreError::from(xsense_api::Error::SessionExpired {
            message: "another device is logged in".into(),
        });
        assert!(err.needs_login());
        assert_eq!(err.kind().to_string(), "SESSION_EXPIRED");
        assert!(!CoreError::NotInitialized.needs_login());
    }

    #[test]
    fn shadow_absence_has_its_own_kind() {
        let err = CoreError::from(xsense_api::Error::ShadowNotFound {
            thing: "SBS5012345678".into(),
            shadow: "default".into(),
        });
        assert_eq!(err.kind(), ErrorKind::ShadowNotFound);
        assert_eq!(err.retry_after(), None);
    }
}
