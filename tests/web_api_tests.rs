//! Integration tests for the HTTP API.
//!
//! These tests drive the router directly through `tower::ServiceExt::oneshot`.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

use rotator_hub::config::{HttpConfig, RotatorConfig, WsConfig};
use rotator_hub::hal::MockRotator;
use rotator_hub::messages::{AzimuthGet, ElevationGet, RotatorObject, RotatorObjects};
use rotator_hub::services::{build_router, Hub};
use rotator_hub::traits::{EventSink, Rotator};

struct TestApp {
    router: axum::Router,
    roof: Arc<MockRotator>,
    north: Arc<MockRotator>,
}

async fn create_test_app() -> TestApp {
    let hub = Hub::new(EventSink::default(), WsConfig::default());

    let roof = MockRotator::with_config(
        RotatorConfig::builder("roof")
            .with_elevation(true)
            .build()
            .unwrap(),
    );
    let north = MockRotator::new("north");
    hub.add_rotator(roof.clone()).await.unwrap();
    hub.add_rotator(north.clone()).await.unwrap();

    let router = build_router(Arc::clone(&hub), &HttpConfig::default());
    TestApp { router, roof, north }
}

async fn call(app: &TestApp, method: &str, uri: &str, body: &str) -> (StatusCode, String) {
    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .header("Content-Type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, String::from_utf8(body.to_vec()).unwrap())
}

// ============================================================================
// Reads
// ============================================================================

#[tokio::test]
async fn test_list_rotators() {
    let app = create_test_app().await;

    let (status, body) = call(&app, "GET", "/api/rotators", "").await;
    assert_eq!(status, StatusCode::OK);

    let objects: RotatorObjects = serde_json::from_str(&body).unwrap();
    assert_eq!(objects.len(), 2);
    assert!(objects["roof"].config.has_elevation);
    assert!(!objects["north"].config.has_elevation);
}

#[tokio::test]
async fn test_get_rotator_versioned_path() {
    let app = create_test_app().await;
    app.roof.set_position(30, 15);

    let (status, body) = call(&app, "GET", "/api/v1.0/rotator/roof", "").await;
    assert_eq!(status, StatusCode::OK);

    let object: RotatorObject = serde_json::from_str(&body).unwrap();
    assert_eq!(object.name, "roof");
    assert_eq!(object.heading.azimuth, 30);
    assert_eq!(object.heading.elevation, 15);
}

#[tokio::test]
async fn test_get_axes() {
    let app = create_test_app().await;
    app.roof.set_position(120, 45);
    app.roof.set_azimuth(200).await.unwrap();

    let (status, body) = call(&app, "GET", "/api/rotator/roof/azimuth", "").await;
    assert_eq!(status, StatusCode::OK);
    let az: AzimuthGet = serde_json::from_str(&body).unwrap();
    assert_eq!(
        az,
        AzimuthGet { has_azimuth: true, azimuth: 120, preset: 200 }
    );

    let (status, body) = call(&app, "GET", "/api/rotator/north/elevation", "").await;
    assert_eq!(status, StatusCode::OK);
    let el: ElevationGet = serde_json::from_str(&body).unwrap();
    assert!(!el.has_elevation);
}

#[tokio::test]
async fn test_unknown_rotator() {
    let app = create_test_app().await;

    let (status, body) = call(&app, "GET", "/api/rotator/attic", "").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, "unable to find rotator");

    let (status, _) = call(&app, "PUT", "/api/rotator/attic/azimuth", r#"{"azimuth": 1}"#).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
}

// ============================================================================
// Writes
// ============================================================================

#[tokio::test]
async fn test_set_azimuth() {
    let app = create_test_app().await;

    let (status, _) = call(&app, "PUT", "/api/rotator/roof/azimuth", r#"{"azimuth": 120}"#).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(app.roof.az_preset(), 120);
    assert_eq!(app.roof.calls(), vec!["set_azimuth(120)"]);
}

#[tokio::test]
async fn test_set_elevation_versioned_path() {
    let app = create_test_app().await;

    let (status, _) = call(
        &app,
        "PUT",
        "/api/v1.0/rotator/roof/elevation",
        r#"{"elevation": 45}"#,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(app.roof.el_preset(), 45);
}

#[tokio::test]
async fn test_invalid_json() {
    let app = create_test_app().await;

    let (status, body) = call(&app, "PUT", "/api/rotator/roof/azimuth", "{not json").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, "invalid json");
    assert!(app.roof.calls().is_empty());
}

#[tokio::test]
async fn test_missing_field() {
    let app = create_test_app().await;

    let (status, body) = call(&app, "PUT", "/api/rotator/roof/elevation", r#"{"azimuth": 3}"#).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, "invalid request");
}

#[tokio::test]
async fn test_unsupported_axis() {
    let app = create_test_app().await;

    let (status, body) = call(&app, "PUT", "/api/rotator/north/elevation", r#"{"elevation": 10}"#).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, "rotator does not support elevation");
    assert!(app.north.calls().is_empty());
}

#[tokio::test]
async fn test_stop_unsupported_axis() {
    let app = create_test_app().await;

    let (status, body) = call(&app, "PUT", "/api/rotator/north/stop_elevation", "").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, "rotator does not support elevation");

    let (status, _) = call(&app, "GET", "/api/v1.0/rotator/north/stop_azimuth", "").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(app.north.calls(), vec!["stop_azimuth"]);
}

#[tokio::test]
async fn test_driver_error() {
    let app = create_test_app().await;
    app.roof.set_failing(true);

    let (status, body) = call(&app, "PUT", "/api/rotator/roof/azimuth", r#"{"azimuth": 120}"#).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body.starts_with("unable to set azimuth to 120: "), "{body}");

    let (status, body) = call(&app, "POST", "/api/rotator/roof/stop", "").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body.starts_with("unable to stop rotator: "), "{body}");
}

#[tokio::test]
async fn test_stop_endpoints_accept_any_method() {
    let app = create_test_app().await;

    for (method, path) in [
        ("GET", "/api/rotator/roof/stop"),
        ("POST", "/api/rotator/roof/stop_azimuth"),
        ("PUT", "/api/v1.0/rotator/roof/stop_elevation"),
    ] {
        let (status, _) = call(&app, method, path, "").await;
        assert_eq!(status, StatusCode::OK, "{method} {path}");
    }
    assert_eq!(
        app.roof.calls(),
        vec!["stop", "stop_azimuth", "stop_elevation"]
    );
}

// ============================================================================
// Routing
// ============================================================================

#[tokio::test]
async fn test_wrong_method() {
    let app = create_test_app().await;

    let (status, _) = call(&app, "DELETE", "/api/rotator/roof/azimuth", "").await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);

    let (status, _) = call(&app, "POST", "/api/rotators", "").await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn test_not_found() {
    let app = create_test_app().await;

    let (status, body) = call(&app, "GET", "/api/nothing", "").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, "not found");
}
