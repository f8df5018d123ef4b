// ── Runtime client configuration ──
//
// Describes *how* to talk to the X-Sense cloud for one account. Carries
// credentials and tuning but never touches disk; the CLI (or a hub
// layer) builds a `ClientConfig` and hands it in.

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use url::Url;
use xsense_api::ReconnectConfig;
use xsense_api::rest::{AppIdentity, ClientSettings, DEFAULT_BASE_URL, DEFAULT_IOT_HOST_TEMPLATE};
use xsense_api::transport::TransportConfig;

use crate::error::CoreError;

/// Configuration for one account.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub email: String,
    pub password: SecretString,
    /// Vendor REST endpoint.
    pub base_url: Url,
    /// Cognito endpoint override. The regional AWS host is used otherwise.
    pub cognito_endpoint: Option<Url>,
    /// IoT shadow host with a `{region}` placeholder.
    pub iot_host_template: String,
    pub app: AppIdentity,
    /// Per-call HTTP timeout.
    pub timeout: Duration,
    /// Background refresh interval. Zero disables the poll task.
    pub poll_interval: Duration,
    /// Allow `connect_realtime`.
    pub realtime_enabled: bool,
    /// Try the legacy token login for per-station broker settings.
    pub legacy_login_enabled: bool,
    /// Minimum spacing of temperature-log re-fetches, per station.
    pub temp_data_debounce: Duration,
    /// Re-presign the broker URL this often while connected.
    pub signature_refresh: Duration,
    pub reconnect: ReconnectConfig,
    /// MQTT client ids are `{prefix}_{house}_{unix_ms}`.
    pub client_id_prefix: String,
}

impl ClientConfig {
    /// Production defaults for the given account.
    pub fn new(email: impl Into<String>, password: SecretString) -> Result<Self, CoreError> {
        let base_url = Url::parse(DEFAULT_BASE_URL).map_err(|e| CoreError::Config {
            message: format!("invalid default base URL: {e}"),
        })?;
        Ok(Self {
            email: email.into(),
            password,
            base_url,
            cognito_endpoint: None,
            iot_host_template: DEFAULT_IOT_HOST_TEMPLATE.into(),
            app: AppIdentity::default(),
            timeout: Duration::from_secs(30),
            poll_interval: Duration::from_secs(60),
            realtime_enabled: true,
            legacy_login_enabled: true,
            temp_data_debounce: Duration::from_secs(180),
            signature_refresh: Duration::from_secs(600),
            reconnect: ReconnectConfig::default(),
            client_id_prefix: "homey".into(),
        })
    }

    /// Wire-layer settings derived from this config.
    pub fn client_settings(&self) -> ClientSettings {
        let mut settings = ClientSettings::new(self.base_url.clone());
        settings.cognito_endpoint.clone_from(&self.cognito_endpoint);
        settings.iot_host_template.clone_from(&self.iot_host_template);
        settings.app = self.app.clone();
        settings.transport = TransportConfig::default().with_timeout(self.timeout);
        settings
    }

    /// Registry key: hex SHA-256 of `email:password`.
    pub fn credential_key(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.email.as_bytes());
        hasher.update(b":");
        hasher.update(self.password.expose_secret().as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.email.trim().is_empty() {
            return Err(CoreError::Config {
                message: "email is required".into(),
            });
        }
        if self.password.expose_secret().is_empty() {
            return Err(CoreError::Config {
                message: "password is required".into(),
            });
        }
        if !self.iot_host_template.starts_with("http") {
            return Err(CoreError::Config {
                message: format!("IoT host template must be an http(s) URL: {}", self.iot_host_template),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn config(email: &str, password: &str) -> ClientConfig {
        ClientConfig::new(email, SecretString::from(password.to_owned())).unwrap()
    }

    #[test]
    fn defaults_match_vendor_app() {
        let cfg = config("user@example.com", "pw");
        assert_eq!(cfg.base_url.as_str(), "https://api.x-sense-iot.com/");
        assert_eq!(cfg.app.app_code, "1220");
        assert_eq!(cfg.temp_data_debounce, Duration::from_secs(180));
        assert_eq!(cfg.signature_refresh, Duration::from_secs(600));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn credential_key_is_sha256_of_pair() {
        let key = config("a@b.c", "pw").credential_key();
        assert_eq!(key.len(), 64);
        assert_eq!(key, config("a@b.c", "pw").credential_key());
        assert_ne!(key, config("a@b.c", "pw2").credential_key());
        assert_ne!(key, config("a@b.cp", "w").credential_key());
    }

    #[test]
    fn empty_credentials_are_rejected() {
        assert!(config("", "pw").validate().is_err());
        assert!(config("a@b.c", "").validate().is_err());
    }

    #[test]
    fn settings_carry_overrides() {
        let mut cfg = config("a@b.c", "pw");
        cfg.iot_host_template = "http://127.0.0.1:9000".into();
        cfg.timeout = Duration::from_secs(5);
        let settings = cfg.client_settings();
        assert_eq!(settings.iot_host_template, "http://127.0.0.1:9000");
        assert_eq!(settings.transport.timeout, Duration::from_secs(5));
    }
}
