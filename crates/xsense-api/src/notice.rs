// User-facing notices raised by the wire layer.
//
// These are not errors returned to a caller; they are side-channel
// signals (persistent 5xx, failed re-authentication) that a hub or UI
// layer should surface to the account owner.

use std::time::Duration;

use serde::Serialize;

/// Category of a notice.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, strum::Display, strum::AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum NoticeKind {
    /// Three or more consecutive 5xx responses.
    ServerError,
    /// Re-login after a 401 failed.
    AuthFailed,
    /// The vendor invalidated the session and re-login failed.
    SessionExpired,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApiNotice {
    pub kind: NoticeKind,
    pub message: String,
    /// HTTP status for server errors, vendor result code otherwise.
    pub code: Option<String>,
    /// Time until the next automatic retry, when known.
    pub retry_after: Option<Duration>,
}

impl ApiNotice {
    pub(crate) fn server_error(status: u16, window: Duration) -> Self {
        let minutes = window.as_secs() / 60;
        Self {
            kind: NoticeKind::ServerError,
            message: format!(
                "X-Sense server temporarily unavailable ({status}). Automatic retry in {minutes} minutes."
            ),
            code: Some(status.to_string()),
            retry_after: Some(window),
        }
    }

    pub(crate) fn auth_failed() -> Self {
        Self {
            kind: NoticeKind::AuthFailed,
            message: "Session expired and re-login failed. Please check your credentials.".into(),
            code: None,
            retry_after: None,
        }
    }

    pub(crate) fn session_expired(code: &str, vendor_message: &str) -> Self {
        let message = if vendor_message.contains(ANOTHER_DEVICE) {
            "Another device logged in with this account. Log in again to resume updates."
        } else {
            "Session expired and automatic re-login failed."
        };
        Self {
            kind: NoticeKind::SessionExpired,
            message: message.into(),
            code: Some(code.to_owned()),
            retry_after: None,
        }
    }
}

pub(crate) const ANOTHER_DEVICE: &str = "another device is logged in";
