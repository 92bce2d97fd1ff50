// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP API.
//!
//! | Method | Path | Success |
//! |--------|------|---------|
//! | POST | `/closure-descriptions` | 201, description |
//! | GET | `/closure-descriptions/{id}` | 200, description |
//! | POST | `/closures` | 201, closure |
//! | GET | `/closures/{id}` | 200, closure |
//! | POST | `/closures/{id}/execute` | 202, STARTED closure |
//! | PATCH | `/closures/{id}` | 200, closure after the terminal transition |
//! | GET | `/health` | 200 |
//!
//! Failures are reported as `{"error": "<CODE>", "message": "..."}`.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use closures_core::{
    Bindings, ClosureState, ClosureStore, CoreError, NewClosure, NewClosureDescription,
    TerminalTransition,
};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::error::Error;
use crate::executor::ExecutionCoordinator;

/// State shared by all handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Closure store.
    pub store: ClosureStore,
    /// Execution coordinator.
    pub coordinator: ExecutionCoordinator,
}

impl AppState {
    /// Create handler state around a coordinator, sharing its store.
    pub fn new(coordinator: ExecutionCoordinator) -> Self {
        Self {
            store: coordinator.store().clone(),
            coordinator,
        }
    }
}

/// Body of `POST /closures/{id}/execute`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExecuteRequest {
    #[serde(default)]
    inputs: Option<Bindings>,
}

/// Body of `PATCH /closures/{id}`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransitionRequest {
    generation: i64,
    state: ClosureState,
    #[serde(default)]
    outputs: Bindings,
    #[serde(default)]
    error_message: Option<String>,
}

/// Error response.
#[derive(Debug)]
pub struct ApiError(Error);

impl<E: Into<Error>> From<E> for ApiError {
    fn from(e: E) -> Self {
        Self(e.into())
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            Error::UnsupportedRuntime(_) => StatusCode::BAD_REQUEST,
            Error::Core(e) => match e {
                CoreError::InvalidArgument { .. } => StatusCode::BAD_REQUEST,
                CoreError::DescriptionNotFound { .. } | CoreError::ClosureNotFound { .. } => {
                    StatusCode::NOT_FOUND
                }
                CoreError::Conflict { .. } | CoreError::StaleTransition { .. } => {
                    StatusCode::CONFLICT
                }
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self.0, "Request failed");
        }
        let body = json!({
            "error": self.0.error_code(),
            "message": self.0.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

/// Parse a JSON body; an empty body yields the default value.
fn parse_body<T: DeserializeOwned + Default>(body: &Bytes) -> ApiResult<T> {
    if body.iter().all(|b| b.is_ascii_whitespace()) {
        return Ok(T::default());
    }
    parse_required(body)
}

fn parse_required<T: DeserializeOwned>(body: &Bytes) -> ApiResult<T> {
    serde_json::from_slice(body)
        .map_err(|e| ApiError::from(CoreError::invalid("body", e.to_string())))
}

/// Build the API router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/closure-descriptions", post(create_description))
        .route("/closure-descriptions/{id}", get(get_description))
        .route("/closures", post(create_closure))
        .route("/closures/{id}", get(get_closure).patch(transition_closure))
        .route("/closures/{id}/execute", post(execute_closure))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    state.store.health_check().await?;
    Ok(Json(json!({"status": "ok"})))
}

async fn create_description(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let request: NewClosureDescription = parse_required(&body)?;
    let description = state.store.create_description(request).await?;
    Ok((StatusCode::CREATED, Json(description)))
}

async fn get_description(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.store.get_description(&id).await?))
}

async fn create_closure(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let request: NewClosure = parse_required(&body)?;
    let closure = state.store.create(request).await?;
    Ok((StatusCode::CREATED, Json(closure)))
}

async fn get_closure(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.store.get(&id).await?))
}

async fn execute_closure(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let request: ExecuteRequest = parse_body(&body)?;
    let closure = state.coordinator.execute(&id, request.inputs).await?;
    Ok((StatusCode::ACCEPTED, Json(closure)))
}

/// Terminal transition reported by an external executor.
async fn transition_closure(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let request: TransitionRequest = parse_required(&body)?;
    let store = &state.store;

    let closure = match request.state {
        ClosureState::Finished => {
            store
                .complete(&id, request.generation, request.outputs)
                .await?
        }
        ClosureState::Failed => {
            let message = request.error_message.unwrap_or_default();
            store.fail(&id, request.generation, message).await?
        }
        ClosureState::Cancelled => {
            store
                .transition(&id, request.generation, TerminalTransition::Cancelled)
                .await?
        }
        other => {
            return Err(CoreError::invalid(
                "state",
                format!("'{}' is not a terminal state", other),
            )
            .into());
        }
    };

    Ok(Json(closure))
}

/// Serve the API until `shutdown_rx` flips to `true`.
pub async fn run_server_with_shutdown(
    bind_addr: SocketAddr,
    state: Arc<AppState>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<()> {
    let listener = TcpListener::bind(bind_addr).await?;
    info!(addr = %listener.local_addr()?, "Closures HTTP server starting");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            while !*shutdown_rx.borrow() {
                if shutdown_rx.changed().await.is_err() {
                    break;
                }
            }
        })
        .await?;

    info!("Closures HTTP server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (
                ApiError::from(CoreError::invalid("name", "empty")),
                StatusCode::BAD_REQUEST,
            ),
            (
                ApiError::from(Error::UnsupportedRuntime("cobol".into())),
                StatusCode::BAD_REQUEST,
            ),
            (
                ApiError::from(CoreError::ClosureNotFound {
                    closure_id: "c".into(),
                }),
                StatusCode::NOT_FOUND,
            ),
            (
                ApiError::from(CoreError::Conflict {
                    closure_id: "c".into(),
                    generation: 1,
                }),
                StatusCode::CONFLICT,
            ),
            (
                ApiError::from(CoreError::DatabaseError {
                    operation: "get".into(),
                    details: "gone".into(),
                }),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (error, expected) in cases {
            assert_eq!(error.status(), expected, "{:?}", error);
        }
    }

    #[test]
    fn test_empty_execute_body_is_default() {
        let request: ExecuteRequest = parse_body(&Bytes::from_static(b"")).unwrap();
        assert!(request.inputs.is_none());

        let request: ExecuteRequest =
            parse_body(&Bytes::from_static(br#"{"inputs": {"a": 1}}"#)).unwrap();
        assert_eq!(request.inputs.unwrap()["a"], 1);
    }

    #[test]
    fn test_malformed_body_is_invalid_argument() {
        let err = parse_required::<NewClosure>(&Bytes::from_static(b"{not json")).unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }
}
