// Legacy token login
//
// Older accounts can still log in with email/password against
// `/api/v1/user/login` and fetch per-station broker settings. Accounts
// created after the SRP migration get a 403, which just means "use SRP".

use std::fmt;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::error::Error;
use crate::rest::client::XSenseClient;

/// Outcome of the (one-shot) legacy login attempt.
#[derive(Default)]
pub(crate) enum LegacyState {
    #[default]
    NotAttempted,
    /// 403 on login: the account only supports SRP.
    SrpOnly,
    Failed,
    Active(LegacySession),
}

pub(crate) struct LegacySession {
    access_token: SecretString,
    refresh_token: Option<SecretString>,
    user_id: Option<String>,
}

/// Broker settings for a station on a legacy account.
#[derive(Clone, Deserialize)]
pub struct LegacyMqttConfig {
    #[serde(alias = "url", alias = "host")]
    pub broker: String,
    #[serde(default, alias = "user")]
    pub username: Option<String>,
    #[serde(default, alias = "pass")]
    pub password: Option<SecretString>,
    #[serde(default, rename = "clientId")]
    pub client_id: Option<String>,
}

impl fmt::Debug for LegacyMqttConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LegacyMqttConfig")
            .field("broker", &self.broker)
            .field("username", &self.username)
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct LegacyEnvelope {
    data: Option<LegacyTokens>,
}

#[derive(Debug, Deserialize)]
struct LegacyTokens {
    access_token: Option<String>,
    refresh_token: Option<String>,
    user_id: Option<Value>,
}

impl XSenseClient {
    /// Attempt the legacy login once per client.
    ///
    /// Returns `true` when a legacy session is available. A 403 marks the
    /// account SRP-only and is not an error.
    pub async fn legacy_login(&self) -> Result<bool, Error> {
        let mut state = self.legacy.lock().await;
        match *state {
            LegacyState::Active(_) => return Ok(true),
            LegacyState::SrpOnly | LegacyState::Failed => return Ok(false),
            LegacyState::NotAttempted => {}
        }

        let url = self.settings().base_url.join("api/v1/user/login")?;
        let resp = self
            .http()
            .post(url)
            .json(&json!({
                "email": self.email(),
                "password": self.password().expose_secret(),
            }))
            .send()
            .await?;

        let status = resp.status();
        if status == reqwest::StatusCode::FORBIDDEN {
            debug!("legacy login refused, account is SRP-only");
            *state = LegacyState::SrpOnly;
            return Ok(false);
        }
        let text = resp.text().await?;
        if !status.is_success() {
            warn!(status = status.as_u16(), "legacy login failed");
            *state = LegacyState::Failed;
            return Ok(false);
        }

        let tokens = serde_json::from_str::<LegacyEnvelope>(&text)
            .ok()
            .and_then(|e| e.data);
        match tokens {
            Some(LegacyTokens {
                access_token: Some(access),
                refresh_token,
                user_id,
            }) => {
                *state = LegacyState::Active(LegacySession {
                    access_token: SecretString::from(access),
                    refresh_token: refresh_token.map(SecretString::from),
                    user_id: user_id.map(|v| match v {
                        Value::String(s) => s,
                        other => other.to_string(),
                    }),
                });
                info!("legacy login successful");
                Ok(true)
            }
            _ => {
                *state = LegacyState::Failed;
                Ok(false)
            }
        }
    }

    /// User id reported by the legacy login, if any.
    pub async fn legacy_user_id(&self) -> Option<String> {
        match &*self.legacy.lock().await {
            LegacyState::Active(session) => session.user_id.clone(),
            _ => None,
        }
    }

    async fn legacy_refresh(&self) -> Result<(), Error> {
        let mut state = self.legacy.lock().await;
        let LegacyState::Active(ref mut session) = *state else {
            return Err(Error::Authentication {
                message: "no legacy session".into(),
            });
        };
        let refresh = session
            .refresh_token
            .as_ref()
            .map(|t| t.expose_secret().to_owned())
            .ok_or_else(|| Error::Authentication {
                message: "legacy refresh token missing".into(),
            })?;

        let url = self.settings().base_url.join("api/v1/user/refresh")?;
        let resp = self
            .http()
            .post(url)
            .json(&json!({ "refresh_token": refresh }))
            .send()
            .await?;
        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(Error::Authentication {
                message: format!("legacy refresh failed: {status} {text}"),
            });
        }

        let access = serde_json::from_str::<LegacyEnvelope>(&text)
            .ok()
            .and_then(|e| e.data)
            .and_then(|d| d.access_token)
            .ok_or_else(|| Error::Authentication {
                message: "legacy refresh returned no access token".into(),
            })?;
        session.access_token = SecretString::from(access);
        debug!("legacy access token refreshed");
        Ok(())
    }

    async fn legacy_get(&self, path: &str) -> Result<Value, Error> {
        let url = self.settings().base_url.join(path)?;
        let mut refreshed = false;
        loop {
            let token = match &*self.legacy.lock().await {
                LegacyState::Active(session) => session.access_token.expose_secret().to_owned(),
                _ => {
                    return Err(Error::Authentication {
                        message: "no legacy session".into(),
                    });
                }
            };

            let resp = self
                .http()
                .get(url.clone())
                .bearer_auth(token)
                .send()
                .await?;
            let status = resp.status();

            if status == reqwest::StatusCode::UNAUTHORIZED && !refreshed {
                self.legacy_refresh().await?;
                refreshed = true;
                continue;
            }

            let text = resp.text().await?;
            if !status.is_success() {
                return Err(Error::Http {
                    status: status.as_u16(),
                    body: text,
                });
            }
            return serde_json::from_str(&text).map_err(|e| Error::Deserialization {
                message: e.to_string(),
                body: text,
            });
        }
    }

    /// Broker settings for `station_id`, when the account supports legacy login.
    ///
    /// Failures are logged and reported as `None`; the AWS broker path
    /// remains available.
    pub async fn legacy_mqtt_config(&self, station_id: &str) -> Option<LegacyMqttConfig> {
        if station_id.is_empty() {
            return None;
        }
        match self.legacy_login().await {
            Ok(true) => {}
            Ok(false) => return None,
            Err(e) => {
                warn!(error = %e, "legacy login error");
                return None;
            }
        }

        let response = match self
            .legacy_get(&format!("api/v1/stations/{station_id}/mqtt"))
            .await
        {
            Ok(v) => v,
            Err(e) => {
                warn!(station_id, error = %e, "legacy MQTT config failed");
                return None;
            }
        };

        let payload = response.get("data").cloned().unwrap_or(response);
        serde_json::from_value(payload).ok()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn mqtt_config_accepts_aliases() {
        let config: LegacyMqttConfig = serde_json::from_value(json!({
            "url": "mqtts://broker.example.com:8883",
            "user": "u1",
            "pass": "p1",
            "clientId": "c1"
        }))
        .unwrap();
        assert_eq!(config.broker, "mqtts://broker.example.com:8883");
        assert_eq!(config.username.as_deref(), Some("u1"));
        assert_eq!(config.password.unwrap().expose_secret(), "p1");
    }
}
