// Vendor REST HTTP client
//
// Wraps `reqwest::Client` with the vendor's envelope: parameters at the
// body root plus business code, app identity and MAC; results carry a
// vendor code next to the HTTP status. This module also owns the 5xx
// cool-down gate and the single re-authentication replay.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use dashmap::DashMap;
use reqwest::StatusCode;
use reqwest::header::AUTHORIZATION;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Map, Value};
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::backoff::ServerErrorBackoff;
use crate::cognito::{AuthState, CognitoConfig, CognitoTokens};
use crate::error::Error;
use crate::mac::{UNAUTHENTICATED_MAC, compute_mac};
use crate::notice::{ANOTHER_DEVICE, ApiNotice};
use crate::rest::auth::IotCredentials;
use crate::rest::legacy::LegacyState;
use crate::transport::TransportConfig;

/// Production REST base URL.
pub const DEFAULT_BASE_URL: &str = "https://api.x-sense-iot.com";

/// Default IoT data-plane host; `{region}` is substituted per call.
pub const DEFAULT_IOT_HOST_TEMPLATE: &str = "https://{region}.x-sense-iot.com";

/// Replays allowed after a session failure.
const MAX_REAUTH_ATTEMPTS: u32 = 1;

const NOTICE_CHANNEL_SIZE: usize = 64;

const SESSION_INVALID_CODES: [&str; 3] = ["10000008", "10000020", "10000004"];
const SESSION_INVALID_MESSAGES: [&str; 3] = [
    ANOTHER_DEVICE,
    "Authorization cannot be empty",
    "bizCode cannot be empty",
];

// ── Business codes ───────────────────────────────────────────────────

/// Operations multiplexed over `POST /app`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum BizCode {
    /// Cognito app-client settings. Unauthenticated.
    ClientInfo,
    /// Temporary AWS IoT credentials.
    IotCredentials,
    /// Houses visible to the account.
    Houses,
    /// Stations (and their devices) of one house.
    Stations,
}

impl BizCode {
    pub fn code(self) -> &'static str {
        match self {
            Self::ClientInfo => "101001",
            Self::IotCredentials => "101003",
            Self::Houses => "102007",
            Self::Stations => "103007",
        }
    }
}

// ── Settings ─────────────────────────────────────────────────────────

/// App identity the vendor expects on every call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppIdentity {
    pub app_code: String,
    pub client_type: String,
    pub version: String,
}

impl Default for AppIdentity {
    fn default() -> Self {
        Self {
            app_code: "1220".into(),
            client_type: "1".into(),
            version: "v1.22.0_20240914.1".into(),
        }
    }
}

/// Endpoint and transport settings for [`XSenseClient`].
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub base_url: Url,
    /// Override for the Cognito endpoint; the regional host is used otherwise.
    pub cognito_endpoint: Option<Url>,
    /// IoT data-plane host with a `{region}` placeholder.
    pub iot_host_template: String,
    pub app: AppIdentity,
    pub transport: TransportConfig,
}

impl ClientSettings {
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            cognito_endpoint: None,
            iot_host_template: DEFAULT_IOT_HOST_TEMPLATE.into(),
            app: AppIdentity::default(),
            transport: TransportConfig::default(),
        }
    }

    /// Settings for the production endpoints.
    pub fn production() -> Result<Self, Error> {
        Ok(Self::new(Url::parse(DEFAULT_BASE_URL)?))
    }

    pub(crate) fn iot_base(&self, region: &str) -> Result<Url, Error> {
        Ok(Url::parse(&self.iot_host_template.replace("{region}", region))?)
    }
}

// ── Client ───────────────────────────────────────────────────────────

/// Why a call asked for re-authentication.
#[derive(Debug)]
enum ReauthReason {
    Unauthorized,
    SessionInvalid { code: String, message: String },
}

#[derive(Debug)]
enum Outcome {
    Data(Value),
    Reauth(ReauthReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallAuth {
    Anonymous,
    Session,
}

/// Client for the vendor REST endpoint, Cognito login and the IoT
/// shadow data plane, bound to one account.
///
/// Session material (Cognito config, tokens, IoT credentials) is held
/// in lock-free slots and swapped wholesale on refresh.
pub struct XSenseClient {
    http: reqwest::Client,
    settings: ClientSettings,
    email: String,
    password: SecretString,
    pub(crate) cognito: ArcSwapOption<CognitoConfig>,
    pub(crate) tokens: ArcSwapOption<CognitoTokens>,
    pub(crate) iot: ArcSwapOption<IotCredentials>,
    pub(crate) auth_state: watch::Sender<AuthState>,
    pub(crate) login_lock: tokio::sync::Mutex<()>,
    pub(crate) iot_lock: tokio::sync::Mutex<()>,
    pub(crate) legacy: tokio::sync::Mutex<LegacyState>,
    pub(crate) shadow_failures: DashMap<String, u32>,
    backoff: Mutex<ServerErrorBackoff>,
    notices: broadcast::Sender<ApiNotice>,
}

impl std::fmt::Debug for XSenseClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XSenseClient")
            .field("base_url", &self.settings.base_url.as_str())
            .field("email", &self.email)
            .field("auth_state", &*self.auth_state.borrow())
            .finish_non_exhaustive()
    }
}

impl XSenseClient {
    pub fn new(
        settings: ClientSettings,
        email: impl Into<String>,
        password: SecretString,
    ) -> Result<Self, Error> {
        let http = settings.transport.build_client()?;
        Ok(Self::with_http(http, settings, email, password))
    }

    /// Create a client with a pre-built `reqwest::Client`.
    pub fn with_http(
        http: reqwest::Client,
        settings: ClientSettings,
        email: impl Into<String>,
        password: SecretString,
    ) -> Self {
        let (auth_state, _) = watch::channel(AuthState::Unauthenticated);
        let (notices, _) = broadcast::channel(NOTICE_CHANNEL_SIZE);
        Self {
            http,
            settings,
            email: email.into(),
            password,
            cognito: ArcSwapOption::empty(),
            tokens: ArcSwapOption::empty(),
            iot: ArcSwapOption::empty(),
            auth_state,
            login_lock: tokio::sync::Mutex::new(()),
            iot_lock: tokio::sync::Mutex::new(()),
            legacy: tokio::sync::Mutex::new(LegacyState::default()),
            shadow_failures: DashMap::new(),
            backoff: Mutex::new(ServerErrorBackoff::new()),
            notices,
        }
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub(crate) fn password(&self) -> &SecretString {
        &self.password
    }

    /// Subscribe to user-facing notices.
    pub fn notices(&self) -> broadcast::Receiver<ApiNotice> {
        self.notices.subscribe()
    }

    /// Current login state.
    pub fn auth_state(&self) -> watch::Receiver<AuthState> {
        self.auth_state.subscribe()
    }

    /// Consecutive 5xx responses seen so far.
    pub fn server_error_count(&self) -> u32 {
        self.backoff().consecutive_errors()
    }

    /// Length of the active cool-down tier, if any errors are recorded.
    pub fn server_backoff_window(&self) -> Option<Duration> {
        self.backoff().current_window()
    }

    pub(crate) fn emit(&self, notice: ApiNotice) {
        // No subscribers is fine; notices are advisory.
        let _ = self.notices.send(notice);
    }

    fn backoff(&self) -> MutexGuard<'_, ServerErrorBackoff> {
        self.backoff.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Calls ────────────────────────────────────────────────────────

    /// Authenticated call. Returns the full response document.
    ///
    /// A 401 or a session-invalid vendor code triggers one re-login and
    /// one replay. A second failure clears the session and surfaces
    /// `SessionExpired` (or `Authentication` when re-login itself failed
    /// after a 401).
    pub async fn call(&self, biz: BizCode, params: Map<String, Value>) -> Result<Value, Error> {
        let mut attempt: u32 = 0;
        loop {
            match self.dispatch(biz, &params, CallAuth::Session, attempt).await? {
                Outcome::Data(data) => return Ok(data),
                Outcome::Reauth(reason) if attempt >= MAX_REAUTH_ATTEMPTS => {
                    error!(biz_code = biz.code(), ?reason, "re-authentication did not help, giving up");
                    self.clear_session();
                    self.emit(match &reason {
                        ReauthReason::Unauthorized => ApiNotice::auth_failed(),
                        ReauthReason::SessionInvalid { code, message } => {
                            ApiNotice::session_expired(code, message)
                        }
                    });
                    return Err(Error::SessionExpired {
                        message: reason_message(&reason),
                    });
                }
                Outcome::Reauth(reason) => {
                    warn!(biz_code = biz.code(), ?reason, "session rejected, re-authenticating");
                    if let Err(e) = self.login().await {
                        error!(error = %e, "re-login failed");
                        self.clear_session();
                        return Err(match reason {
                            ReauthReason::Unauthorized => {
                                self.emit(ApiNotice::auth_failed());
                                Error::Authentication {
                                    message: format!("session expired and re-login failed: {e}"),
                                }
                            }
                            ReauthReason::SessionInvalid { code, message } => {
                                self.emit(ApiNotice::session_expired(&code, &message));
                                Error::SessionExpired { message }
                            }
                        });
                    }
                    attempt += 1;
                }
            }
        }
    }

    /// Unauthenticated call (client-info). No replay.
    pub async fn call_anonymous(
        &self,
        biz: BizCode,
        params: Map<String, Value>,
    ) -> Result<Value, Error> {
        match self.dispatch(biz, &params, CallAuth::Anonymous, 0).await? {
            Outcome::Data(data) => Ok(data),
            Outcome::Reauth(reason) => Err(Error::Authentication {
                message: reason_message(&reason),
            }),
        }
    }

    async fn dispatch(
        &self,
        biz: BizCode,
        params: &Map<String, Value>,
        auth: CallAuth,
        attempt: u32,
    ) -> Result<Outcome, Error> {
        if let Err(remaining) = self.backoff().check(Instant::now()) {
            let retry_after = ceil_to_secs(remaining);
            debug!(biz_code = biz.code(), retry_in = retry_after.as_secs(), "in server backoff, skipping call");
            return Err(Error::ServerUnavailable {
                status: None,
                retry_after,
            });
        }

        let (mac, token) = match auth {
            CallAuth::Anonymous => (UNAUTHENTICATED_MAC.to_owned(), None),
            CallAuth::Session => {
                let tokens = self.tokens.load_full().ok_or_else(|| Error::SessionExpired {
                    message: "no access token available, log in again".into(),
                })?;
                let cognito = self.cognito.load_full().ok_or_else(|| Error::SessionExpired {
                    message: "client configuration missing, log in again".into(),
                })?;
                (compute_mac(params, &cognito.client_secret), Some(tokens))
            }
        };

        let mut body = params.clone();
        body.insert("bizCode".into(), biz.code().into());
        body.insert("appCode".into(), self.settings.app.app_code.clone().into());
        body.insert("clientType".into(), self.settings.app.client_type.clone().into());
        body.insert("version".into(), self.settings.app.version.clone().into());
        body.insert("mac".into(), mac.into());

        let url = self.settings.base_url.join("app")?;
        debug!(biz_code = biz.code(), attempt, "POST {}", url);

        let mut request = self.http.post(url).json(&Value::Object(body));
        if let Some(ref tokens) = token {
            request = request.header(AUTHORIZATION, tokens.access_token.expose_secret());
        }
        let resp = request.send().await?;
        let status = resp.status();

        if status.is_server_error() {
            let verdict = self.backoff().record_failure(Instant::now());
            let text = resp.text().await.unwrap_or_default();
            error!(
                status = status.as_u16(),
                consecutive = verdict.consecutive,
                backoff_minutes = verdict.window.as_secs() / 60,
                body = %text,
                "vendor server error"
            );
            if verdict.notify {
                self.emit(ApiNotice::server_error(status.as_u16(), verdict.window));
            }
            return Err(Error::ServerUnavailable {
                status: Some(status.as_u16()),
                retry_after: verdict.window,
            });
        }

        if status.is_success() {
            let cleared = self.backoff().record_success();
            if cleared > 0 {
                info!(errors = cleared, "vendor server recovered");
            }
        }

        if status == StatusCode::UNAUTHORIZED && token.is_some() {
            return Ok(Outcome::Reauth(ReauthReason::Unauthorized));
        }

        let text = resp.text().await?;
        if !status.is_success() {
            return Err(Error::Http {
                status: status.as_u16(),
                body: text,
            });
        }

        let data: Value = serde_json::from_str(&text).map_err(|e| Error::Deserialization {
            message: format!("bizCode {}: {e}", biz.code()),
            body: text.clone(),
        })?;

        if let Some(code) = result_code(&data) {
            if !is_success_code(&code) {
                let message = result_message(&data);
                if token.is_some() && is_session_invalid(&code, &message) {
                    return Ok(Outcome::Reauth(ReauthReason::SessionInvalid { code, message }));
                }
                return Err(Error::Api { code, message });
            }
        }

        Ok(Outcome::Data(data))
    }

    /// Drop tokens so the next call forces a fresh login.
    pub fn clear_session(&self) {
        self.tokens.store(None);
        self.auth_state.send_replace(AuthState::Expired);
    }
}

// ── Envelope helpers ─────────────────────────────────────────────────

/// Payload of a vendor response (`reData`, falling back to `data`).
pub fn re_data(response: &Value) -> Option<&Value> {
    response
        .get("reData")
        .filter(|v| !v.is_null())
        .or_else(|| response.get("data").filter(|v| !v.is_null()))
}

fn result_code(data: &Value) -> Option<String> {
    ["reCode", "code"].iter().find_map(|key| match data.get(*key) {
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        _ => None,
    })
}

fn is_success_code(code: &str) -> bool {
    matches!(code, "200" | "0")
}

fn result_message(data: &Value) -> String {
    ["reMsg", "msg", "message"]
        .iter()
        .find_map(|key| data.get(*key).and_then(Value::as_str))
        .unwrap_or("Unknown error")
        .to_owned()
}

fn is_session_invalid(code: &str, message: &str) -> bool {
    SESSION_INVALID_CODES.contains(&code)
        || SESSION_INVALID_MESSAGES.iter().any(|m| message.contains(m))
}

fn reason_message(reason: &ReauthReason) -> String {
    match reason {
        ReauthReason::Unauthorized => "HTTP 401 Unauthorized".into(),
        ReauthReason::SessionInvalid { code, message } => format!("{message} (code {code})"),
    }
}

fn ceil_to_secs(d: Duration) -> Duration {
    Duration::from_secs(d.as_secs() + u64::from(d.subsec_nanos() > 0))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn result_code_reads_either_field() {
        assert_eq!(result_code(&json!({"reCode": 200})).as_deref(), Some("200"));
        assert_eq!(result_code(&json!({"code": "10000008"})).as_deref(), Some("10000008"));
        assert_eq!(result_code(&json!({"reData": []})), None);
    }

    #[test]
    fn session_invalid_detection() {
        assert!(is_session_invalid("10000020", ""));
        assert!(is_session_invalid("500", "another device is logged in"));
        assert!(is_session_invalid("1", "bizCode cannot be empty"));
        assert!(!is_session_invalid("10000001", "bad parameter"));
    }

    #[test]
    fn re_data_falls_back_to_data() {
        let v = json!({"data": {"a": 1}});
        assert_eq!(re_data(&v), Some(&json!({"a": 1})));
        assert_eq!(re_data(&json!({"reData": null})), None);
    }

    #[test]
    fn wait_time_rounds_up() {
        assert_eq!(ceil_to_secs(Duration::from_millis(1500)), Duration::from_secs(2));
        assert_eq!(ceil_to_secs(Duration::from_secs(3)), Duration::from_secs(3));
    }
}
