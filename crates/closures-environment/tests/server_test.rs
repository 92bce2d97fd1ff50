// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP API tests driven through the router without a listening socket.

mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use closures_environment::server::{AppState, router};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

fn app() -> Router {
    router(Arc::new(AppState::new(common::coordinator())))
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(match body {
            Some(body) => Body::from(body.to_string()),
            None => Body::empty(),
        })
        .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn create_description(app: &Router, source: &str, timeout_seconds: u64) -> String {
    let (status, body) = send(
        app,
        Method::POST,
        "/closure-descriptions",
        Some(json!({
            "name": "inc",
            "source": source,
            "runtimeId": "js",
            "outputNames": ["result"],
            "resourceConstraints": {"timeoutSeconds": timeout_seconds}
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    body["id"].as_str().unwrap().to_string()
}

async fn create_closure(app: &Router, description_id: &str) -> String {
    let (status, body) = send(
        app,
        Method::POST,
        "/closures",
        Some(json!({"descriptionRef": description_id})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    assert_eq!(body["state"], "CREATED");
    body["id"].as_str().unwrap().to_string()
}

async fn wait_terminal(app: &Router, closure_id: &str) -> Value {
    let uri = format!("/closures/{}", closure_id);
    for _ in 0..250 {
        let (status, body) = send(app, Method::GET, &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        if body["state"] != "STARTED" {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("closure {} never left STARTED", closure_id);
}

#[tokio::test]
async fn test_health() {
    let app = app();
    let (status, body) = send(&app, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "ok"}));
}

#[tokio::test]
async fn test_description_round_trip() {
    let app = app();
    let id = create_description(&app, "result = inputs.a + 1;", 3).await;

    let uri = format!("/closure-descriptions/{}", id);
    let (status, body) = send(&app, Method::GET, &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], id.as_str());
    assert_eq!(body["runtimeId"], "js");
    assert_eq!(body["outputNames"], json!(["result"]));
    assert_eq!(body["resourceConstraints"]["timeoutSeconds"], 3);
}

#[tokio::test]
async fn test_execute_and_poll() {
    let app = app();
    let description_id = create_description(&app, "result = inputs.a + 1;", 3).await;
    let closure_id = create_closure(&app, &description_id).await;

    let (status, body) = send(
        &app,
        Method::POST,
        &format!("/closures/{}/execute", closure_id),
        Some(json!({"inputs": {"a": 3}})),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["state"], "STARTED");
    assert_eq!(body["executionGeneration"], 1);

    let body = wait_terminal(&app, &closure_id).await;
    assert_eq!(body["state"], "FINISHED");
    assert_eq!(body["outputs"], json!({"result": 4}));
    assert_eq!(body["inputs"], json!({"a": 3}));
}

#[tokio::test]
async fn test_execute_while_started_conflicts() {
    let app = app();
    let description_id = create_description(&app, "while (true) {}", 1).await;
    let closure_id = create_closure(&app, &description_id).await;
    let uri = format!("/closures/{}/execute", closure_id);

    let (status, _) = send(&app, Method::POST, &uri, None).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let (status, body) = send(&app, Method::POST, &uri, None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "CONFLICT");

    let body = wait_terminal(&app, &closure_id).await;
    assert_eq!(body["state"], "CANCELLED");
}

#[tokio::test]
async fn test_external_completion_with_generation_guard() {
    let store = closures_core::ClosureStore::in_memory();
    let coordinator =
        closures_environment::ExecutionCoordinator::new(store.clone(), common::registry());
    let app = router(Arc::new(AppState::new(coordinator)));

    let description_id = create_description(&app, "result = 1;", 3).await;
    let closure_id = create_closure(&app, &description_id).await;
    let uri = format!("/closures/{}", closure_id);

    // An executor outside this process claims the closure
    let generation = store.start(&closure_id, None).await.unwrap();

    let (status, body) = send(
        &app,
        Method::PATCH,
        &uri,
        Some(json!({"generation": generation, "state": "FINISHED", "outputs": {"result": "done"}})),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["state"], "FINISHED");
    assert_eq!(body["outputs"], json!({"result": "done"}));

    let (status, body) = send(
        &app,
        Method::PATCH,
        &uri,
        Some(json!({"generation": generation, "state": "FAILED", "errorMessage": "late"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "STALE_TRANSITION");
}

#[tokio::test]
async fn test_patch_rejects_non_terminal_state() {
    let app = app();
    let description_id = create_description(&app, "result = 1;", 3).await;
    let closure_id = create_closure(&app, &description_id).await;

    let (status, body) = send(
        &app,
        Method::PATCH,
        &format!("/closures/{}", closure_id),
        Some(json!({"generation": 1, "state": "STARTED"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "INVALID_ARGUMENT");
}

#[tokio::test]
async fn test_error_responses() {
    let app = app();

    let (status, body) = send(&app, Method::GET, "/closures/missing", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "CLOSURE_NOT_FOUND");

    let (status, body) = send(&app, Method::GET, "/closure-descriptions/missing", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "DESCRIPTION_NOT_FOUND");

    let (status, body) = send(&app, Method::POST, "/closures", Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "INVALID_ARGUMENT");

    let (status, body) = send(
        &app,
        Method::POST,
        "/closure-descriptions",
        Some(json!({"name": "x", "source": "", "runtimeId": "js"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "INVALID_ARGUMENT");
}

#[tokio::test]
async fn test_unsupported_runtime_response() {
    let app = app();
    let (status, body) = send(
        &app,
        Method::POST,
        "/closure-descriptions",
        Some(json!({"name": "x", "source": "x", "runtimeId": "cobol"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let closure_id = create_closure(&app, body["id"].as_str().unwrap()).await;

    let (status, body) = send(
        &app,
        Method::POST,
        &format!("/closures/{}/execute", closure_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "UNSUPPORTED_RUNTIME");

    let (_, body) = send(&app, Method::GET, &format!("/closures/{}", closure_id), None).await;
    assert_eq!(body["state"], "CREATED");
}

#[tokio::test]
async fn test_unbounded_timeout_rejected() {
    let app = app();
    let (status, body) = send(
        &app,
        Method::POST,
        "/closure-descriptions",
        Some(json!({
            "name": "inc",
            "source": "result = 1;",
            "runtimeId": "js",
            "resourceConstraints": {"timeoutSeconds": u64::MAX}
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "INVALID_ARGUMENT");
}

#[tokio::test]
async fn test_reserved_input_name_rejected() {
    let app = app();
    let description_id = create_description(&app, "result = inputs.a + 1;", 3).await;
    let closure_id = create_closure(&app, &description_id).await;
    let uri = format!("/closures/{}/execute", closure_id);

    let (status, body) = send(
        &app,
        Method::POST,
        &uri,
        Some(json!({"inputs": {"a": 3, "print": "shadow"}})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "INVALID_ARGUMENT");

    let (_, body) = send(&app, Method::GET, &format!("/closures/{}", closure_id), None).await;
    assert_eq!(body["state"], "CREATED");

    let (status, _) = send(&app, Method::POST, &uri, Some(json!({"inputs": {"a": 3}}))).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let body = wait_terminal(&app, &closure_id).await;
    assert_eq!(body["outputs"], json!({"result": 4}));
}
