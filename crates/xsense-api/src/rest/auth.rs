// Session bootstrap: Cognito client info, SRP login, AWS IoT credentials.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value, json};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::cognito::{AuthState, CognitoClient, CognitoConfig};
use crate::error::Error;
use crate::mac::decode_client_secret;
use crate::rest::client::{BizCode, XSenseClient, re_data};
use crate::signer::AwsCredentials;

/// IoT credentials are treated as expired this long before their real
/// one-hour lifetime ends.
pub const IOT_CREDENTIALS_TTL: Duration = Duration::from_secs(60 * 60);
pub const IOT_CREDENTIALS_EARLY_EXPIRY: Duration = Duration::from_secs(10 * 60);

/// Temporary AWS credentials for the IoT data plane.
#[derive(Debug, Clone)]
pub struct IotCredentials {
    pub credentials: AwsCredentials,
    /// When these are considered stale (early expiry already applied).
    pub refresh_at: Instant,
}

impl IotCredentials {
    pub fn is_fresh(&self, now: Instant) -> bool {
        now < self.refresh_at
    }
}

impl XSenseClient {
    /// Fetch the Cognito app-client settings (`101001`).
    pub async fn fetch_client_info(&self) -> Result<Arc<CognitoConfig>, Error> {
        debug!("fetching Cognito client info");
        let response = self.call_anonymous(BizCode::ClientInfo, Map::new()).await?;
        let data = re_data(&response).ok_or_else(|| Error::Authentication {
            message: "failed to get client info".into(),
        })?;

        let field = |name: &str| {
            data.get(name)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
                .ok_or_else(|| Error::Authentication {
                    message: format!("client info missing {name}"),
                })
        };

        let config = Arc::new(CognitoConfig {
            client_id: field("clientId")?,
            client_secret: decode_client_secret(&field("clientSecret")?)?,
            region: field("cgtRegion")?,
            user_pool_id: field("userPoolId")?,
        });
        info!(region = %config.region, pool = %config.user_pool_id, "Cognito configured");
        self.cognito.store(Some(Arc::clone(&config)));
        Ok(config)
    }

    /// Cached client info, fetching it on first use.
    pub async fn cognito_config(&self) -> Result<Arc<CognitoConfig>, Error> {
        match self.cognito.load_full() {
            Some(config) => Ok(config),
            None => self.fetch_client_info().await,
        }
    }

    /// Region of the Cognito pool, once known.
    pub fn cognito_region(&self) -> Option<String> {
        self.cognito.load().as_ref().map(|c| c.region.clone())
    }

    /// Run the SRP login and store the resulting tokens.
    ///
    /// Concurrent callers are serialized; each performs its own exchange.
    pub async fn login(&self) -> Result<(), Error> {
        let _guard = self.login_lock.lock().await;
        let config = self.cognito_config().await?;

        let cognito = match self.settings().cognito_endpoint.clone() {
            Some(endpoint) => CognitoClient::with_endpoint(self.http().clone(), endpoint),
            None => CognitoClient::for_region(self.http().clone(), &config.region)?,
        };

        info!(email = %self.email(), "authenticating with SRP");
        let result = cognito
            .login(&config, self.email(), self.password(), &self.auth_state)
            .await;

        match result {
            Ok(tokens) => {
                self.tokens.store(Some(Arc::new(tokens)));
                info!("SRP authentication successful");
                Ok(())
            }
            Err(e) => {
                self.auth_state.send_replace(AuthState::Unauthenticated);
                warn!(error = %e, "SRP authentication failed");
                Err(e)
            }
        }
    }

    /// Whether an access token is currently held.
    pub fn is_authenticated(&self) -> bool {
        self.tokens.load().is_some()
    }

    /// Fetch fresh IoT credentials (`101003`).
    pub async fn fetch_iot_credentials(&self) -> Result<Arc<IotCredentials>, Error> {
        debug!("fetching AWS IoT credentials");
        let mut params = Map::new();
        params.insert("userName".into(), json!(self.email()));
        let response = self.call(BizCode::IotCredentials, params).await?;

        let data = re_data(&response).ok_or_else(|| Error::Signing {
            message: "AWS credentials not available in response".into(),
        })?;
        let field = |name: &str| data.get(name).and_then(Value::as_str).unwrap_or_default();

        let credentials = AwsCredentials::new(
            field("accessKeyId"),
            field("secretAccessKey"),
            Some(field("sessionToken").to_owned()).filter(|t| !t.is_empty()),
        );
        if credentials.access_key_id.is_empty() {
            return Err(Error::Signing {
                message: "AWS credentials not available in response".into(),
            });
        }

        let iot = Arc::new(IotCredentials {
            credentials,
            refresh_at: Instant::now() + (IOT_CREDENTIALS_TTL - IOT_CREDENTIALS_EARLY_EXPIRY),
        });
        self.iot.store(Some(Arc::clone(&iot)));
        info!("AWS IoT credentials obtained");
        Ok(iot)
    }

    /// Current IoT credentials, refreshed when stale or missing.
    pub async fn ensure_iot_credentials(&self) -> Result<Arc<IotCredentials>, Error> {
        if let Some(current) = self.iot.load_full().filter(|c| c.is_fresh(Instant::now())) {
            return Ok(current);
        }

        let _guard = self.iot_lock.lock().await;
        // Another task may have refreshed while we waited.
        if let Some(current) = self.iot.load_full().filter(|c| c.is_fresh(Instant::now())) {
            return Ok(current);
        }
        debug!("AWS IoT credentials expired or missing, refreshing");
        self.fetch_iot_credentials().await
    }

    /// Full bootstrap: client info, login, IoT credentials.
    pub async fn authenticate(&self) -> Result<(), Error> {
        self.fetch_client_info().await?;
        self.login().await?;
        self.ensure_iot_credentials().await?;
        Ok(())
    }
}
