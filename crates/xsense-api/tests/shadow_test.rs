#![allow(clippy::unwrap_used)]
// Integration tests for the signed IoT shadow data plane using wiremock.

mod common;

use serde_json::json;
use wiremock::matchers::{body_partial_json, header, header_exists, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use xsense_api::shadow::SHADOW_FAILURE_THRESHOLD;
use xsense_api::{Error, ShadowName, StationIdentity, XSenseClient};

// ── Helpers ─────────────────────────────────────────────────────────

async fn setup() -> (MockServer, XSenseClient) {
    let server = MockServer::start().await;
    common::mount_login(&server).await;
    common::mount_iot_credentials(&server).await;
    let client = common::client(&server);
    client.login().await.unwrap();
    (server, client)
}

fn station() -> StationIdentity {
    StationIdentity {
        station_id: "S1".into(),
        serial: "12345678".into(),
        type_code: "SBS50".into(),
        house_id: "H1".into(),
        user_id: Some("U1".into()),
        region: Some(common::REGION.into()),
    }
}

fn shadow_path(thing: &str) -> String {
    format!("/things/{thing}/shadow")
}

// ── Fetch ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_station_shadow_unwraps_reported_state() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path(shadow_path("SBS5012345678")))
        .and(query_param("name", "2nd_mainpage"))
        .and(header_exists("authorization"))
        .and(header("x-amz-security-token", "session-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "state": {
                "reported": {
                    "wifiRSSI": "-52",
                    "devs": { "00000001": { "type": "XS01-M", "batInfo": "3" } }
                },
                "desired": {}
            },
            "metadata": {},
            "version": 42
        })))
        .expect(1)
        .mount(&server)
        .await;

    let doc = client.get_station_shadow(&station()).await.unwrap();

    assert_eq!(doc.get("wifiRSSI"), Some(&json!("-52")));
    assert_eq!(doc["devs"]["00000001"]["batInfo"], json!("3"));
    assert!(!doc.contains_key("state"));
    assert!(!doc.contains_key("version"));
}

#[tokio::test]
async fn test_resolve_returns_first_non_empty_hit() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path(shadow_path("thing-b")))
        .and(query_param("name", "first"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "state": { "reported": { "source": "b-first" } }
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(shadow_path("thing-a")))
        .and(query_param("name", "second"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "state": { "reported": { "source": "a-second" } }
        })))
        .mount(&server)
        .await;
    // An empty reported state counts as a miss.
    Mock::given(method("GET"))
        .and(path(shadow_path("thing-a")))
        .and(query_param("name", "first"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "state": { "reported": {} }
        })))
        .mount(&server)
        .await;

    let things = vec!["thing-a".to_owned(), "thing-b".to_owned()];
    let shadows = [ShadowName::named("first"), ShadowName::named("second")];
    let doc = client
        .resolve_shadow(&things, &shadows, Some(common::REGION))
        .await
        .unwrap();

    assert_eq!(doc.get("source"), Some(&json!("a-second")));
}

#[tokio::test]
async fn test_missing_shadow_is_an_empty_document() {
    let (_server, client) = setup().await;

    let doc = client
        .get_thing_shadow("nobody", &ShadowName::Classic, Some(common::REGION))
        .await
        .unwrap();
    assert!(doc.is_empty());

    let direct = client
        .try_thing_shadow("nobody", &ShadowName::Classic, common::REGION)
        .await;
    assert!(matches!(direct, Err(Error::ShadowNotFound { ref shadow, .. }) if shadow == "default"));
}

// ── Circuit breaker ─────────────────────────────────────────────────

#[tokio::test]
async fn test_breaker_stops_probing_after_repeated_failures() {
    let (server, client) = setup().await;
    let shadow = ShadowName::named("baseInfo");

    Mock::given(method("GET"))
        .and(path(shadow_path("T1")))
        .and(query_param("name", "baseInfo"))
        .respond_with(ResponseTemplate::new(404))
        .expect(u64::from(SHADOW_FAILURE_THRESHOLD) + 1)
        .mount(&server)
        .await;

    for _ in 0..10 {
        let doc = client
            .get_thing_shadow("T1", &shadow, Some(common::REGION))
            .await
            .unwrap();
        assert!(doc.is_empty());
    }

    assert!(client.shadow_tripped("T1", &shadow));
    assert_eq!(client.shadow_failure_count("T1", &shadow), SHADOW_FAILURE_THRESHOLD + 1);
    // Other pairs on the same thing are unaffected.
    assert!(!client.shadow_tripped("T1", &ShadowName::Classic));
}

#[tokio::test]
async fn test_breaker_resets_on_success() {
    let (server, client) = setup().await;
    let shadow = ShadowName::named("2nd_systime");

    Mock::given(method("GET"))
        .and(path(shadow_path("T2")))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(3)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(shadow_path("T2")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "state": { "reported": { "time": "1700000000" } }
        })))
        .mount(&server)
        .await;

    for _ in 0..3 {
        client
            .get_thing_shadow("T2", &shadow, Some(common::REGION))
            .await
            .unwrap();
    }
    assert_eq!(client.shadow_failure_count("T2", &shadow), 3);

    let doc = client
        .get_thing_shadow("T2", &shadow, Some(common::REGION))
        .await
        .unwrap();
    assert_eq!(doc.get("time"), Some(&json!("1700000000")));
    assert_eq!(client.shadow_failure_count("T2", &shadow), 0);
}

// ── Writes ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_temp_data_sync_posts_desired_state() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path(shadow_path("SBS5012345678")))
        .and(query_param("name", "2nd_apptempdata"))
        .and(header("content-type", "application/json"))
        .and(header_exists("authorization"))
        .and(body_partial_json(json!({
            "state": {
                "desired": {
                    "shadow": "appTempData",
                    "stationSN": "12345678",
                    "deviceSN": ["00000001"],
                    "report": "1",
                }
            }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let accepted = client
        .request_temp_data_sync(&station(), &["00000001".to_owned()])
        .await
        .unwrap();
    assert!(accepted);
}

#[tokio::test]
async fn test_rejected_temp_data_sync_is_not_an_error() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path(shadow_path("SBS5012345678")))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let accepted = client.request_temp_data_sync(&station(), &[]).await.unwrap();
    assert!(!accepted);
}
