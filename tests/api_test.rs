use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    response::Response,
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use tenant_migrator::api;
use tenant_migrator::error::{DbError, RunError};

mod common;
use common::*;

fn app(connector: &StubConnector, runner: &SpyRunner) -> Router {
    api::router(Arc::new(dispatcher(connector, runner)))
}

fn post(path: &str, body: impl Into<Body>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/json")
        .body(body.into())
        .unwrap()
}

fn migrate_body(name: &str, command: &str) -> String {
    json!({ "name": name, "command": command, "dbstring": DBSTRING }).to_string()
}

async fn body_bytes(response: Response) -> Vec<u8> {
    to_bytes(response.into_body(), usize::MAX).await.unwrap().to_vec()
}

async fn error_message(response: Response) -> String {
    let body: Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    body["error"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_success_returns_empty_200() {
    let connector = StubConnector::new();
    let runner = SpyRunner::new();

    let response = app(&connector, &runner)
        .oneshot(post("/migrate", migrate_body("acme", "up")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_bytes(response).await.is_empty());
    assert_eq!(runner.calls().len(), 1);
}

#[tokio::test]
async fn test_legacy_goose_path() {
    let connector = StubConnector::new();
    let runner = SpyRunner::new();

    let response = app(&connector, &runner)
        .oneshot(post("/goose", migrate_body("acme", "status")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_body_without_content_type_is_accepted() {
    let connector = StubConnector::new();
    let runner = SpyRunner::new();

    let request = Request::builder()
        .method("POST")
        .uri("/migrate")
        .body(Body::from(migrate_body("acme", "version")))
        .unwrap();
    let response = app(&connector, &runner).oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_malformed_body_is_400_before_dispatch() {
    let connector = StubConnector::new();
    let runner = SpyRunner::new();

    for body in ["{not json", r#"{"command": "up"}"#, r#"{"name": 5, "command": "up"}"#, ""] {
        let response = app(&connector, &runner)
            .oneshot(post("/migrate", body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "body {:?}", body);
        assert!(error_message(response).await.contains("invalid request body"));
    }

    assert_eq!(connector.recorder.connects(), 0);
}

#[tokio::test]
async fn test_invalid_tenant_is_400() {
    let connector = StubConnector::new();
    let runner = SpyRunner::new();

    let response = app(&connector, &runner)
        .oneshot(post("/migrate", migrate_body("acme; DROP TABLE users", "up")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(error_message(response)
        .await
        .starts_with("invalid schema identifier"));
    assert_eq!(connector.recorder.connects(), 0);
}

#[tokio::test]
async fn test_unknown_command_is_400() {
    let connector = StubConnector::new();
    let runner = SpyRunner::new();

    let response = app(&connector, &runner)
        .oneshot(post("/migrate", migrate_body("acme", "frobnicate")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        error_message(response).await,
        "unknown migration command: frobnicate"
    );
}

#[tokio::test]
async fn test_unreachable_database_is_502() {
    let connector =
        StubConnector::failing_connect(DbError::Unreachable("connection refused".to_string()));
    let runner = SpyRunner::new();

    let response = app(&connector, &runner)
        .oneshot(post("/migrate", migrate_body("acme", "up")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_permission_denied_is_500() {
    let connector = StubConnector::failing_statement(
        "CREATE SCHEMA",
        DbError::PermissionDenied("permission denied for database".to_string()),
    );
    let runner = SpyRunner::new();

    let response = app(&connector, &runner)
        .oneshot(post("/migrate", migrate_body("acme", "up")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(runner.calls().is_empty());
}

#[tokio::test]
async fn test_execution_failure_is_500_with_detail() {
    let connector = StubConnector::new();
    let runner = SpyRunner::failing(RunError::ExecutionFailed(
        "applying migration 2 (add orders): syntax error at or near \"TABL\"".to_string(),
    ));

    let response = app(&connector, &runner)
        .oneshot(post("/migrate", migrate_body("acme", "up")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(error_message(response)
        .await
        .contains("syntax error at or near \"TABL\""));
}

#[tokio::test]
async fn test_health_check() {
    let connector = StubConnector::new();
    let runner = SpyRunner::new();

    let response = app(&connector, &runner)
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "tenant-migrator");
}

#[test]
fn test_status_code_mapping() {
    use std::time::Duration;
    use tenant_migrator::error::{DispatchError, ProvisionError};

    let cases = [
        (DispatchError::InvalidRequest("x".to_string()), StatusCode::BAD_REQUEST),
        (
            DispatchError::Provision(ProvisionError::InvalidIdentifier("x".to_string())),
            StatusCode::BAD_REQUEST,
        ),
        (
            DispatchError::Provision(ProvisionError::Connectivity("x".to_string())),
            StatusCode::BAD_GATEWAY,
        ),
        (
            DispatchError::Connection(DbError::Unreachable("x".to_string())),
            StatusCode::BAD_GATEWAY,
        ),
        (
            DispatchError::Run(RunError::Source("x".to_string())),
            StatusCode::INTERNAL_SERVER_ERROR,
        ),
        (DispatchError::TenantBusy("acme".to_string()), StatusCode::CONFLICT),
        (
            DispatchError::TimedOut(Duration::from_secs(1)),
            StatusCode::GATEWAY_TIMEOUT,
        ),
    ];

    for (err, expected) in cases {
        assert_eq!(api::status_code(&err), expected, "{:?}", err);
    }
}
