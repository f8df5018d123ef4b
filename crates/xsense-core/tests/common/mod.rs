#![allow(clippy::unwrap_used, dead_code)]
// Shared wiremock fixtures: a logged-in account with one house, one
// XH02-M station and one child smoke detector.

use std::time::Duration;

use secrecy::SecretString;
use serde_json::json;
use url::Url;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use xsense_core::ClientConfig;

pub const EMAIL: &str = "user@example.com";
pub const REGION: &str = "eu-central-1";
pub const STATION_THING: &str = "XH02-M12345678";

const COGNITO_PATH: &str = "/cognito/";

pub fn config(server: &MockServer) -> ClientConfig {
    let mut config = ClientConfig::new(EMAIL, SecretString::from("hunter2")).unwrap();
    config.base_url = Url::parse(&server.uri()).unwrap();
    config.cognito_endpoint = Some(Url::parse(&format!("{}{COGNITO_PATH}", server.uri())).unwrap());
    config.iot_host_template = server.uri();
    config.poll_interval = Duration::ZERO;
    config.timeout = Duration::from_secs(5);
    config
}

pub fn biz(code: &str) -> impl wiremock::Match + 'static {
    body_partial_json(json!({ "bizCode": code }))
}

/// Client info, both Cognito legs and IoT credentials.
pub async fn mount_session(server: &MockServer, expected_logins: Option<u64>) {
    Mock::given(method("POST"))
        .and(path("/app"))
        .and(biz("101001"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "reCode": 200,
            "reData": {
                "clientId": "client-id",
                "clientSecret": "WFhYWGNsaWVudHNlY3JldFk=",
                "cgtRegion": REGION,
                "userPoolId": "eu-central-1_TestPool",
            }
        })))
        .mount(server)
        .await;

    let initiate = Mock::given(method("POST"))
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
    match expected_logins {
        Some(n) => initiate.expect(n).mount(server).await,
        None => initiate.mount(server).await,
    }

    Mock::given(method("POST"))
        .and(path(COGNITO_PATH))
        .and(header(
            "X-Amz-Target",
            "AWSCognitoIdentityProviderService.RespondToAuthChallenge",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "AuthenticationResult": {
                "AccessToken": "access-token-1",
                "IdToken": "id-token",
                "RefreshToken": "refresh-token",
                "ExpiresIn": 3600,
            }
        })))
        .mount(server)
        .await;

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

/// House H1 with station ST1 (XH02-M 12345678) holding detector D1.
pub async fn mount_directory(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/app"))
        .and(biz("102007"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "reCode": 200,
            "reData": [{
                "houseId": "H1",
                "houseName": "Home",
                "mqttRegion": REGION,
                "mqttServer": "mqtt.example.com",
            }]
        })))
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/app"))
        .and(biz("103007"))
        .and(body_partial_json(json!({ "houseId": "H1" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "reCode": 200,
            "reData": {
                "stations": [{
                    "stationId": "ST1",
                    "stationSn": "12345678",
                    "category": "XH02-M",
                    "stationName": "Hallway",
                    "userId": "U1",
                    "devices": [{
                        "deviceId": "D1",
                        "deviceSn": "ABCDEF01",
                        "deviceType": "XS01-M",
                        "deviceName": "Kitchen",
                    }]
                }]
            }
        })))
        .mount(server)
        .await;
}

/// The station's main shadow reports battery and alarm state for D1.
pub async fn mount_station_shadow(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path(format!("/things/{STATION_THING}/shadow")))
        .and(query_param("name", "2nd_mainpage"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "state": {
                "reported": {
                    "wifiRSSI": "-48",
                    "devs": {
                        "ABCDEF01": { "type": "XS01-M", "batInfo": "3", "status": { "a": "0" } }
                    }
                }
            },
            "version": 7
        })))
        .mount(server)
        .await;
}
