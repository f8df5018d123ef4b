#![allow(clippy::unwrap_used, dead_code)]
// Shared wiremock fixtures: vendor client info, Cognito SRP exchange and
// IoT credentials.

use secrecy::SecretString;
use serde_json::json;
use url::Url;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use xsense_api::{ClientSettings, XSenseClient};

pub const EMAIL: &str = "user@example.com";
pub const REGION: &str = "eu-central-1";
pub const ACCESS_TOKEN: &str = "access-token-1";

/// base64 of `XXXXclientsecretY`; the usable secret is `clientsecret`.
pub const CLIENT_SECRET_B64: &str = "WFhYWGNsaWVudHNlY3JldFk=";

/// MD5 over `"0"` (the `utctimestamp` value) followed by `clientsecret`.
pub const HOUSES_MAC: &str = "7f3505f51911cd58dd0532cc13b45427";

const COGNITO_PATH: &str = "/cognito/";

pub fn settings(server: &MockServer) -> ClientSettings {
    let mut settings = ClientSettings::new(Url::parse(&server.uri()).unwrap());
    settings.cognito_endpoint = Some(Url::parse(&format!("{}{COGNITO_PATH}", server.uri())).unwrap());
    settings.iot_host_template = server.uri();
    settings
}

pub fn client(server: &MockServer) -> XSenseClient {
    XSenseClient::with_http(
        reqwest::Client::new(),
        settings(server),
        EMAIL,
        SecretString::from("hunter2"),
    )
}

pub fn biz(code: &str) -> impl wiremock::Match + 'static {
    body_partial_json(json!({ "bizCode": code }))
}

/// Mount client info and both Cognito legs.
pub async fn mount_login(server: &MockServer) {
    mount_client_info(server).await;
    mount_cognito_initiate(server, None).await;
    mount_cognito_respond(server).await;
}

pub async fn mount_client_info(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/app"))
        .and(body_partial_json(json!({ "bizCode": "101001", "mac": "abcdefg" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "reCode": 200,
            "reData": {
                "clientId": "client-id",
                "clientSecret": CLIENT_SECRET_B64,
                "cgtRegion": REGION,
                "userPoolId": "eu-central-1_TestPool",
            }
        })))
        .mount(server)
        .await;
}

pub async fn mount_cognito_initiate(server: &MockServer, expected: Option<u64>) {
    let mock = Mock::given(method("POST"))
        .and(path(COGNITO_PATH))
        .and(header(
            "X-Amz-Target",
            "AWSCognitoIdentityProviderService.InitiateAuth",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ChallengeName": "PASSWORD_VERIFIER",
            "ChallengeParameters": {
                "SRP_B": "abcdef0123456789abcdef0123456789",
                "SALT": "8a1b2c3d4e5f",
                "SECRET_BLOCK": "c2VjcmV0LWJsb2NrLWJ5dGVz",
                "USER_ID_FOR_SRP": "user-id-for-srp",
            },
            "Session": "cognito-session",
        })));
    let mock = match expected {
        Some(n) => mock.expect(n),
        None => mock,
    };
    mock.mount(server).await;
}

pub async fn mount_cognito_respond(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path(COGNITO_PATH))
        .and(header(
            "X-Amz-Target",
            "AWSCognitoIdentityProviderService.RespondToAuthChallenge",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "AuthenticationResult": {
                "AccessToken": ACCESS_TOKEN,
                "IdToken": "id-token",
                "RefreshToken": "refresh-token",
                "ExpiresIn": 3600,
            }
        })))
        .mount(server)
        .await;
}

pub async fn mount_iot_credentials(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/app"))
        .and(biz("101003"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "reCode": 200,
            "reData": {
                "accessKeyId": "AKIDEXAMPLE",
                "secretAccessKey": "wJalrXUtnFEMI/K7MDENG/bPxRfiCYEXAMPLEKEY",
                "sessionToken": "session-token",
            }
        })))
        .mount(server)
        .await;
}
