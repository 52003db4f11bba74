//! HTTP wire transport for the executor side (SPEC_FULL.md §4.7): a single
//! `POST /driver-message` route carrying the tagged `DriverToExecutor`
//! union, plus a `GET /health` check (SPEC_FULL.md §10.5).

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use common::message::DriverToExecutor;
use std::sync::Arc;

use crate::backend::ExecutorBackend;

#[derive(Clone)]
pub struct AppState {
    pub backend: Arc<ExecutorBackend>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/driver-message", post(handle_driver_message))
        .with_state(state)
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn handle_driver_message(
    State(state): State<AppState>,
    Json(message): Json<DriverToExecutor>,
) -> impl IntoResponse {
    state.backend.handle_message(message).await;
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::DriverClient;
    use common::config::ExecutorConfig;
    use tower::ServiceExt;

    fn test_state() -> AppState {
        let config = ExecutorConfig {
            executor_id: "e1".into(),
            driver_url: "http://127.0.0.1:1".into(),
            hostname: "127.0.0.1".into(),
            cores: 2,
            app_id: "app-1".into(),
            worker_url: None,
            user_class_path: vec![],
            executor_port: 7077,
            graceful_shutdown_timeout_secs: 30,
        };
        let client = DriverClient::new(&config);
        AppState {
            backend: ExecutorBackend::new(config, client),
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
    async fn stop_executor_message_is_accepted() {
        let app = create_router(test_state());
        let body = serde_json::to_vec(&DriverToExecutor::StopExecutor).unwrap();
        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/driver-message")
                    .header("content-type", "application/json")
                    .body(axum::body::Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
