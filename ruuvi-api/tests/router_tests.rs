//! HTTP Router Tests
//!
//! Drives the full axum router (auth layer, handlers, error mapping) with
//! `oneshot` requests over the in-memory store.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    response::Response,
    Router,
};
use serde_json::{json, Value as JsonValue};
use tower::ServiceExt;

use ruuvi_api::{create_api_router, ApiConfig, AppState, AuthConfig};
use ruuvi_core::ConnectionError;
use ruuvi_test_utils::{fixtures, MockStore};

const TOKEN: &str = "sensor-dashboard-token";

fn router_with(store: &MockStore, config: ApiConfig, auth: AuthConfig) -> Router {
    let service = Arc::new(fixtures::service(store));
    create_api_router(AppState::new(service, config), auth)
}

fn router(store: &MockStore) -> Router {
    router_with(store, ApiConfig::default(), AuthConfig::default())
}

async fn get(router: Router, uri: &str) -> Response {
    router
        .oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

async fn json_body(response: Response) -> JsonValue {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

// ============================================================================
// LATEST
// ============================================================================

#[tokio::test]
async fn test_single_reading_is_flattened() {
    let store = fixtures::two_device_store();
    let response = get(router(&store), "/?name=Kitchen").await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CACHE_CONTROL],
        "no-store, max-age=0"
    );
    assert_eq!(
        json_body(response).await,
        json!({
            "Kitchen": {
                "time": "2020-12-10T12:10:00Z",
                "mac": "aa:bb:cc:00:00:01",
                "temperature": 21.0,
                "humidity": 40.0,
                "tx_power": 4
            }
        })
    );
}

#[tokio::test]
async fn test_many_readings_in_timezone() {
    let store = fixtures::two_device_store();
    let response = get(
        router(&store),
        "/?n=2&columns=ts,device&columns=temp_c&names=Sauna&tz=Europe/Helsinki",
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        json_body(response).await,
        json!({
            "Sauna": [
                {"time": "2020-12-10T14:07:00+02:00", "temperature": 85.0},
                {"time": "2020-12-10T14:03:00+02:00", "temperature": 80.0}
            ]
        })
    );
}

#[tokio::test]
async fn test_all_devices_when_no_name_given() {
    let store = fixtures::two_device_store();
    let response = get(router(&store), "/?columns=ts,device,temp_c").await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        json_body(response).await,
        json!({
            "Kitchen": {"time": "2020-12-10T12:10:00Z", "temperature": 21.0},
            "Sauna": {"time": "2020-12-10T12:07:00Z", "temperature": 85.0}
        })
    );
}

#[tokio::test]
async fn test_device_without_rows() {
    let store = fixtures::two_device_store();

    let response = get(router(&store), "/?name=Porch").await;
    assert_eq!(json_body(response).await, json!({}));

    let response = get(router(&store), "/?name=Porch&n=5").await;
    assert_eq!(json_body(response).await, json!({"Porch": []}));
}

// ============================================================================
// BAD REQUESTS
// ============================================================================

#[tokio::test]
async fn test_bad_n() {
    let store = fixtures::two_device_store();

    let response = get(router(&store), "/?n=0").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["code"], "INVALID_RANGE");

    let response = get(router(&store), "/?n=many").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["code"], "INVALID_INPUT");

    assert!(store.statements().is_empty());
}

#[tokio::test]
async fn test_bad_timezone() {
    let store = fixtures::two_device_store();
    let response = get(router(&store), "/?tz=Mars/Olympus").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["code"], "INVALID_INPUT");
}

#[tokio::test]
async fn test_unknown_column() {
    let store = fixtures::two_device_store();
    let response = get(router(&store), "/?columns=ts,device,co2").await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["code"], "INVALID_COLUMN");
    assert_eq!(body["message"], "invalid column: unknown column co2");
    assert!(store.statements().is_empty());
}

#[tokio::test]
async fn test_malformed_list_parameters() {
    let store = fixtures::two_device_store();

    let response = get(router(&store), "/?name=Kitchen%27--").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["code"], "INVALID_INPUT");
    assert_eq!(body["message"], "Invalid names");

    let response = get(router(&store), "/?columns=ts,device,").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["message"], "Invalid columns");

    assert!(store.statements().is_empty());
}

#[tokio::test]
async fn test_store_failure_is_opaque() {
    let store = fixtures::two_device_store();
    store.fail_operation(ConnectionError::query(
        "relation \"ruuvitag\" does not exist",
    ));

    let response = get(router(&store), "/?name=Kitchen").await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = json_body(response).await;
    assert_eq!(body["code"], "DATABASE_ERROR");
    assert!(!body.to_string().contains("ruuvitag"));
}

#[tokio::test(start_paused = true)]
async fn test_request_deadline() {
    let store = fixtures::two_device_store();
    store.set_delay(Some(Duration::from_secs(60)));
    let config = ApiConfig {
        request_timeout: Duration::from_secs(2),
        ..ApiConfig::default()
    };

    let response = get(
        router_with(&store, config, AuthConfig::default()),
        "/?name=Kitchen",
    )
    .await;

    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(json_body(response).await["code"], "TIMEOUT");
    assert_eq!(store.cancels(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_requests_beyond_limit_are_shed() {
    let store = fixtures::two_device_store();
    store.set_delay(Some(Duration::from_secs(5)));
    let config = ApiConfig {
        max_concurrent_requests: 1,
        ..ApiConfig::default()
    };
    let app = router_with(&store, config, AuthConfig::default());

    let first = tokio::spawn(get(app.clone(), "/?name=Kitchen"));
    // The first request now holds the only slot while the store is slow.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let response = get(app.clone(), "/?name=Sauna").await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json_body(response).await["code"], "SERVICE_UNAVAILABLE");

    // Health checks are not limited.
    store.set_delay(None);
    let response = get(app.clone(), "/ready").await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = first.await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(store.statements().len(), 1);

    let response = get(app, "/?name=Sauna").await;
    assert_eq!(response.status(), StatusCode::OK);
}

// ============================================================================
// AUTHENTICATION
// ============================================================================

fn protected(store: &MockStore) -> Router {
    router_with(store, ApiConfig::default(), AuthConfig::with_tokens([TOKEN]))
}

#[tokio::test]
async fn test_missing_or_wrong_token_forbidden() {
    let store = fixtures::two_device_store();

    let response = get(protected(&store), "/").await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = protected(&store)
        .oneshot(
            Request::get("/")
                .header(header::AUTHORIZATION, "Bearer not-the-token")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(store.statements().is_empty());
}

#[tokio::test]
async fn test_valid_token_allowed() {
    let store = fixtures::two_device_store();
    let response = protected(&store)
        .oneshot(
            Request::get("/?name=Sauna")
                .header(header::AUTHORIZATION, format!("Bearer {}", TOKEN))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["Sauna"]["temperature"], 85.0);
}

#[tokio::test]
async fn test_health_needs_no_token() {
    let store = fixtures::two_device_store();
    let response = get(protected(&store), "/health").await;
    assert_eq!(response.status(), StatusCode::OK);
}

// ============================================================================
// HEALTH
// ============================================================================

#[tokio::test]
async fn test_health_ok() {
    let store = fixtures::two_device_store();
    let response = get(router(&store), "/health").await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await, json!({"status": "ok"}));
    assert_eq!(store.pings(), 1);
}

#[tokio::test]
async fn test_health_reports_unreachable_store() {
    let store = fixtures::two_device_store();
    store.fail_dial(ConnectionError::dial("connection refused"));

    let response = get(router(&store), "/health").await;

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = json_body(response).await;
    assert_eq!(body["status"], "error");
    assert!(body["error"]
        .as_str()
        .unwrap_or_default()
        .contains("connection refused"));
}

#[tokio::test]
async fn test_ready() {
    let store = fixtures::two_device_store();
    let response = get(router(&store), "/ready").await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(store.pings(), 0);
}
