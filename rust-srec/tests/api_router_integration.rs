//! Integration tests that drive the full axum router in-process, without
//! binding a real socket or shelling out to an extractor/muxer binary.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use media_svc::api::routes::create_router;
use media_svc::api::server::AppState;
use media_svc::config::ServiceConfig;
use tower::ServiceExt;

fn test_state() -> AppState {
    AppState::new(Arc::new(ServiceConfig::from_env_or_default()))
}

#[tokio::test]
async fn health_endpoint_reports_ok() {
    let router = create_router(test_state());

    let response = router
        .oneshot(
            Request::builder()
                .uri("/api/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn legacy_probe_is_permanently_gone() {
    let router = create_router(test_state());

    let response = router
        .oneshot(
            Request::builder()
                .uri("/api/legacy/probe")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::GONE);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["upgrade_to"], "/api/info");
}

#[tokio::test]
async fn info_endpoint_rejects_invalid_url() {
    let router = create_router(test_state());

    let response = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/info")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"url":"not-a-url"}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn task_lifecycle_create_list_cancel() {
    let state = test_state();
    let router = create_router(state.clone());

    let create_response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/tasks")
                .header("content-type", "application/json")
                .body(Body::from(
                    r#"{"url":"https://example.com/video","mode":"merged"}"#,
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(create_response.status(), StatusCode::OK);

    let bytes = axum::body::to_bytes(create_response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    let task_id = body["task_id"].as_str().unwrap().to_string();

    let cancel_response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/api/tasks/{task_id}/cancel"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(cancel_response.status(), StatusCode::OK);

    let list_response = router
        .oneshot(
            Request::builder()
                .uri("/api/tasks")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(list_response.status(), StatusCode::OK);
}
