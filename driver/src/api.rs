//! HTTP wire transport for the driver side (SPEC_FULL.md §4.7).
//!
//! Executors reach the driver over `POST /executor-message`, a single route
//! carrying the tagged `ExecutorToDriver` union — the "addressable handle"
//! spec §9 asks for instead of a cyclic in-memory reference. `GET /health`
//! and `GET /status` (SPEC_FULL.md §10.5) are a read-only operational
//! surface beyond the message schema itself.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use common::message::ExecutorToDriver;
use common::CoordinatorError;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, warn};

use crate::driver_endpoint::DriverEndpoint;

#[derive(Clone)]
pub struct AppState {
    pub driver: Arc<DriverEndpoint>,
}

/// Builds the driver's axum router. One body limit covers the whole
/// surface since `LaunchTask`'s opaque task bytes are the only
/// potentially-large payload, and they never arrive on this side.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/status", get(status))
        .route("/executor-message", post(handle_executor_message))
        .with_state(state)
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

#[derive(Serialize)]
struct StatusResponse {
    registered_executors: usize,
    total_core_count: u64,
    pending_executors: u64,
    pending_remove: usize,
    is_ready: bool,
}

async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let registry = state.driver.registry();
    Json(StatusResponse {
        registered_executors: registry.total_registered_executors(),
        total_core_count: registry.total_core_count(),
        pending_executors: registry.pending_executors(),
        pending_remove: registry.pending_remove_count(),
        is_ready: state.driver.is_ready(),
    })
}

async fn handle_executor_message(
    State(state): State<AppState>,
    Json(message): Json<ExecutorToDriver>,
) -> Result<impl IntoResponse, ApiError> {
    match message {
        ExecutorToDriver::RegisterExecutor {
            executor_id,
            endpoint,
            host,
            total_cores,
            log_urls,
        } => {
            state
                .driver
                .register_executor(executor_id, endpoint, host, total_cores, log_urls)
                .await?;
        }
        ExecutorToDriver::StatusUpdate {
            executor_id,
            task_id,
            state: task_state,
            data,
        } => {
            state.driver.status_update(executor_id, task_id, task_state, data).await?;
        }
        ExecutorToDriver::RegisterNewTask {
            task_set_id,
            task_id,
            executor_id,
            blocks,
            is_last_task,
        } => {
            state
                .driver
                .skewtune_register_new_task(task_set_id, task_id, executor_id, blocks, is_last_task)
                .await;
        }
        ExecutorToDriver::ReportBlockStatuses {
            task_set_id,
            task_id,
            updates,
            new_task_id,
        } => {
            state
                .driver
                .skewtune_report_block_statuses(&task_set_id, task_id, updates, new_task_id);
        }
        ExecutorToDriver::ReportTaskFinished { task_set_id, task_id } => {
            state.driver.skewtune_report_task_finished(&task_set_id, task_id);
        }
        ExecutorToDriver::ReportTaskComputeSpeed {
            task_set_id,
            task_id,
            bytes_per_ms,
            ..
        } => {
            state
                .driver
                .skewtune_report_task_compute_speed(&task_set_id, task_id, bytes_per_ms);
        }
        ExecutorToDriver::ReportBlockDownloadSpeed {
            task_set_id,
            from_executor,
            to_executor,
            bytes_per_ms,
        } => {
            state
                .driver
                .skewtune_report_block_download_speed(&task_set_id, from_executor, to_executor, bytes_per_ms);
        }
        ExecutorToDriver::TransferRemovedFetch { .. } => {
            // Purely informational relay between executors; the driver has
            // no bookkeeping of its own to update here.
        }
    }

    Ok(StatusCode::OK)
}

/// Maps `CoordinatorError` onto HTTP status codes (spec §7).
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Coordinator(CoordinatorError::DuplicateExecutor(_)) => StatusCode::CONFLICT,
            ApiError::Coordinator(CoordinatorError::UnknownExecutor(_)) => StatusCode::NOT_FOUND,
            ApiError::Coordinator(CoordinatorError::FrameSizeExceeded { .. }) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Coordinator(CoordinatorError::InvalidArgument(_)) => StatusCode::BAD_REQUEST,
            ApiError::Coordinator(CoordinatorError::RpcAskFailed { .. }) => StatusCode::BAD_GATEWAY,
            ApiError::Coordinator(CoordinatorError::ExecutorDisconnected(_)) => StatusCode::GONE,
            ApiError::Coordinator(CoordinatorError::RegistrationFailed(_)) => StatusCode::BAD_REQUEST,
            ApiError::Coordinator(CoordinatorError::DriverDisconnected(_)) => StatusCode::SERVICE_UNAVAILABLE,
        };

        if status.is_server_error() {
            error!(error = %self, "driver api request failed");
        } else {
            warn!(error = %self, "driver api request rejected");
        }

        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler_backend::NoopTaskScheduler;
    use common::config::DriverConfig;
    use common::model::ExecutorId;
    use std::collections::HashMap;
    use tower::ServiceExt;

    fn test_state() -> AppState {
        AppState {
            driver: Arc::new(DriverEndpoint::new(DriverConfig::default(), Arc::new(NoopTaskScheduler))),
        }
    }

    #[tokio::test]
    async fn health_check_returns_ok() {
        let app = create_router(test_state());
        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/health")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn register_executor_via_wire_updates_status() {
        let state = test_state();
        let app = create_router(state.clone());

        let message = ExecutorToDriver::RegisterExecutor {
            executor_id: ExecutorId::from("e1"),
            endpoint: "http://127.0.0.1:7077".into(),
            host: "127.0.0.1".into(),
            total_cores: 4,
            log_urls: HashMap::new(),
        };
        let body = serde_json::to_vec(&message).unwrap();
        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/executor-message")
                    .header("content-type", "application/json")
                    .body(axum::body::Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(state.driver.registry().total_core_count(), 4);
    }

    #[tokio::test]
    async fn duplicate_register_returns_conflict() {
        let state = test_state();
        state
            .driver
            .register_executor(ExecutorId::from("e1"), "http://h:1".into(), "h".into(), 2, HashMap::new())
            .await
            .unwrap();
        let app = create_router(state);

        let message = ExecutorToDriver::RegisterExecutor {
            executor_id: ExecutorId::from("e1"),
            endpoint: "http://h:1".into(),
            host: "h".into(),
            total_cores: 2,
            log_urls: HashMap::new(),
        };
        let body = serde_json::to_vec(&message).unwrap();
        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/executor-message")
                    .header("content-type", "application/json")
                    .body(axum::body::Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }
}
