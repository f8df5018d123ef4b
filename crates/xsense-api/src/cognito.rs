// Cognito Identity Provider over plain HTTPS
//
// Two JSON-1.1 calls make up a USER_SRP_AUTH login: InitiateAuth with
// SRP_A, then RespondToAuthChallenge with the password claim. No AWS
// SDK is involved; the target header selects the operation.

use std::fmt;

use secrecy::SecretString;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::watch;
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::srp::{PasswordVerifierChallenge, SrpSession, secret_hash};

const TARGET_PREFIX: &str = "AWSCognitoIdentityProviderService";
const CONTENT_TYPE: &str = "application/x-amz-json-1.1";
const PASSWORD_VERIFIER: &str = "PASSWORD_VERIFIER";

/// Progress of a login through the SRP exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum AuthState {
    Unauthenticated,
    SrpASent,
    ChallengeReceived,
    Authenticated,
    Expired,
}

/// App-client settings delivered by the vendor's client-info call.
#[derive(Clone)]
pub struct CognitoConfig {
    pub client_id: String,
    pub client_secret: Vec<u8>,
    pub region: String,
    pub user_pool_id: String,
}

impl fmt::Debug for CognitoConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CognitoConfig")
            .field("client_id", &self.client_id)
            .field("region", &self.region)
            .field("user_pool_id", &self.user_pool_id)
            .finish_non_exhaustive()
    }
}

/// Tokens from a successful authentication.
#[derive(Clone)]
pub struct CognitoTokens {
    pub access_token: SecretString,
    pub id_token: Option<SecretString>,
    pub refresh_token: Option<SecretString>,
    pub expires_in: Option<u64>,
}

impl fmt::Debug for CognitoTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CognitoTokens")
            .field("expires_in", &self.expires_in)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InitiateAuthResponse {
    challenge_name: Option<String>,
    #[serde(default)]
    challenge_parameters: serde_json::Map<String, Value>,
    session: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ChallengeResponse {
    authentication_result: Option<AuthenticationResult>,
    challenge_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AuthenticationResult {
    access_token: String,
    id_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<u64>,
}

/// Raw client for the Cognito user-pool endpoint.
#[derive(Debug, Clone)]
pub struct CognitoClient {
    http: reqwest::Client,
    endpoint: Url,
}

impl CognitoClient {
    /// Client for the regional public endpoint.
    pub fn for_region(http: reqwest::Client, region: &str) -> Result<Self, Error> {
        let endpoint = Url::parse(&format!("https://cognito-idp.{region}.amazonaws.com/"))?;
        Ok(Self { http, endpoint })
    }

    /// Client for an explicit endpoint (tests, proxies).
    pub fn with_endpoint(http: reqwest::Client, endpoint: Url) -> Self {
        Self { http, endpoint }
    }

    /// Run a full SRP login for `username`, publishing each step on `state`.
    pub async fn login(
        &self,
        config: &CognitoConfig,
        username: &str,
        password: &SecretString,
        state: &watch::Sender<AuthState>,
    ) -> Result<CognitoTokens, Error> {
        let srp = SrpSession::new(&config.user_pool_id, password.clone())?;
        let secret_hash = secret_hash(username, &config.client_id, &config.client_secret)?;

        debug!(region = %config.region, "cognito: InitiateAuth");
        let initiate: InitiateAuthResponse = self
            .call(
                "InitiateAuth",
                &json!({
                    "AuthFlow": "USER_SRP_AUTH",
                    "ClientId": config.client_id,
                    "AuthParameters": {
                        "USERNAME": username,
                        "SRP_A": srp.srp_a(),
                        "SECRET_HASH": secret_hash,
                    },
                }),
            )
            .await?;
        state.send_replace(AuthState::SrpASent);

        let challenge_name = initiate.challenge_name.unwrap_or_default();
        if challenge_name != PASSWORD_VERIFIER {
            return Err(Error::UnexpectedChallenge {
                challenge: if challenge_name.is_empty() {
                    "<none>".into()
                } else {
                    challenge_name
                },
            });
        }

        let challenge = parse_challenge(&initiate.challenge_parameters)?;
        state.send_replace(AuthState::ChallengeReceived);
        let claim = srp.process_challenge(&challenge)?;

        debug!("cognito: RespondToAuthChallenge");
        let mut body = json!({
            "ChallengeName": PASSWORD_VERIFIER,
            "ClientId": config.client_id,
            "ChallengeResponses": {
                "USERNAME": username,
                "PASSWORD_CLAIM_SECRET_BLOCK": claim.secret_block,
                "PASSWORD_CLAIM_SIGNATURE": claim.signature,
                "TIMESTAMP": claim.timestamp,
                "SECRET_HASH": secret_hash,
            },
        });
        if let (Some(session), Some(obj)) = (initiate.session, body.as_object_mut()) {
            obj.insert("Session".into(), Value::String(session));
        }

        let response: ChallengeResponse = self.call("RespondToAuthChallenge", &body).await?;
        match response.authentication_result {
            Some(result) => {
                state.send_replace(AuthState::Authenticated);
                Ok(CognitoTokens {
                    access_token: SecretString::from(result.access_token),
                    id_token: result.id_token.map(SecretString::from),
                    refresh_token: result.refresh_token.map(SecretString::from),
                    expires_in: result.expires_in,
                })
            }
            None => match response.challenge_name {
                Some(challenge) => Err(Error::UnexpectedChallenge { challenge }),
                None => Err(Error::Authentication {
                    message: "no authentication result received".into(),
                }),
            },
        }
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        operation: &str,
        body: &Value,
    ) -> Result<T, Error> {
        let resp = self
            .http
            .post(self.endpoint.clone())
            .header("X-Amz-Target", format!("{TARGET_PREFIX}.{operation}"))
            .header(reqwest::header::CONTENT_TYPE, CONTENT_TYPE)
            .body(body.to_string())
            .send()
            .await?;

        let status = resp.status();
        let text = resp.text().await?;

        if !status.is_success() {
            return Err(Error::Authentication {
                message: describe_cognito_error(status.as_u16(), &text),
            });
        }

        serde_json::from_str(&text).map_err(|e| Error::Deserialization {
            message: format!("{operation}: {e}"),
            body: text,
        })
    }
}

fn parse_challenge(params: &serde_json::Map<String, Value>) -> Result<PasswordVerifierChallenge, Error> {
    let field = |name: &str| {
        params
            .get(name)
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| Error::Authentication {
                message: format!("malformed SRP challenge: missing {name}"),
            })
    };
    Ok(PasswordVerifierChallenge {
        srp_b: field("SRP_B")?,
        salt: field("SALT")?,
        secret_block: field("SECRET_BLOCK")?,
        user_id_for_srp: field("USER_ID_FOR_SRP")?,
    })
}

fn describe_cognito_error(status: u16, body: &str) -> String {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let kind = parsed
        .as_ref()
        .and_then(|v| v.get("__type"))
        .and_then(Value::as_str)
        .map(|t| t.rsplit('#').next().unwrap_or(t).to_owned());
    let message = parsed
        .as_ref()
        .and_then(|v| v.get("message").or_else(|| v.get("Message")))
        .and_then(Value::as_str)
        .map(str::to_owned);

    match (kind, message) {
        (Some(kind), Some(message)) => format!("{kind}: {message}"),
        (Some(kind), None) => kind,
        (None, Some(message)) => message,
        (None, None) => format!("Cognito HTTP {status}: {body}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cognito_error_bodies_are_summarised() {
        assert_eq!(
            describe_cognito_error(
                400,
                r#"{"__type":"NotAuthorizedException","message":"Incorrect username or password."}"#
            ),
            "NotAuthorizedException: Incorrect username or password."
        );
        assert_eq!(describe_cognito_error(500, "oops"), "Cognito HTTP 500: oops");
    }

    #[test]
    fn missing_challenge_field_is_an_auth_error() {
        let params = serde_json::Map::new();
        assert!(matches!(
            parse_challenge(&params),
            Err(Error::Authentication { .. })
        ));
    }
}
