//! Internal HTTP surface for the scheduler and operators.

use crate::controller::FleetController;
use crate::error::MachineError;
use crate::machinery::Machinery;
use axum::http::StatusCode;
use axum::{
    extract::{Path, State},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use sandfleet_common::AcquireCriteria;
use serde_json::json;
use std::sync::Arc;

pub fn router(controller: Arc<FleetController>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/admin/status", get(get_status))
        .route("/machines/acquire", post(acquire))
        .route("/machines/{label}/release", post(release))
        .route("/machines/{label}/start", post(start))
        .route("/machines/{label}/stop", post(stop))
        .route("/machines/{label}/status", get(status))
        .with_state(controller)
}

fn error_response(err: MachineError) -> Response {
    let (code, tag) = match &err {
        MachineError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
        MachineError::InvariantViolation(_) => (StatusCode::CONFLICT, "invariant_violation"),
        MachineError::Timeout { .. } => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
        MachineError::Cloud { .. } | MachineError::UnexpectedState { .. } => {
            (StatusCode::BAD_GATEWAY, "cloud_error")
        }
        MachineError::Configuration(_) => (StatusCode::INTERNAL_SERVER_ERROR, "configuration_error"),
        MachineError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "db_error"),
    };
    if code.is_server_error() {
        tracing::error!("[http] {}: {}", tag, err);
    }
    (code, Json(json!({"error": tag, "message": err.to_string()}))).into_response()
}

async fn root() -> &'static str {
    "Sandfleet Orchestrator Online"
}

async fn get_status(State(controller): State<Arc<FleetController>>) -> impl IntoResponse {
    Json(controller.fleet_status().await)
}

async fn acquire(
    State(controller): State<Arc<FleetController>>,
    Json(criteria): Json<AcquireCriteria>,
) -> Response {
    match controller.acquire(&criteria).await {
        Ok(Some(machine)) => (StatusCode::OK, Json(machine)).into_response(),
        Ok(None) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e),
    }
}

async fn release(
    State(controller): State<Arc<FleetController>>,
    Path(label): Path<String>,
) -> Response {
    match controller.release(&label).await {
        Ok(()) => Json(json!({"status": "ok", "label": label})).into_response(),
        Err(e) => error_response(e),
    }
}

async fn start(
    State(controller): State<Arc<FleetController>>,
    Path(label): Path<String>,
) -> Response {
    match controller.start(&label).await {
        Ok(()) => Json(json!({"status": "ok", "label": label})).into_response(),
        Err(e) => error_response(e),
    }
}

async fn stop(
    State(controller): State<Arc<FleetController>>,
    Path(label): Path<String>,
) -> Response {
    match controller.stop(&label).await {
        Ok(()) => Json(json!({"status": "ok", "label": label})).into_response(),
        Err(e) => error_response(e),
    }
}

async fn status(
    State(controller): State<Arc<FleetController>>,
    Path(label): Path<String>,
) -> impl IntoResponse {
    let state = controller.status(&label).await;
    Json(json!({"label": label, "state": state}))
}
