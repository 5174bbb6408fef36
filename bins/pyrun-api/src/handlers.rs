// HTTP route handlers for the pyrun API

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{StatusCode, Uri},
    response::{IntoResponse, Json, Response},
};
use pyrun_common::types::{ExecutionOutcome, ExecutionRequest};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::AppState;

const SERVICE_NAME: &str = "pyrun";
const ENDPOINTS: [&str; 3] = ["/health", "/api/run", "/warmup"];

fn now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// POST /api/run - Execute code, optionally against test cases
pub async fn run_code(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ExecutionRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            warn!(error = %rejection.body_text(), "Malformed request body");
            return (
                StatusCode::BAD_REQUEST,
                Json(ExecutionOutcome::failure(format!(
                    "Invalid request body: {}",
                    rejection.body_text()
                ))),
            )
                .into_response();
        }
    };

    let job = match state.executor.validate(&request) {
        Ok(job) => job,
        Err(e) => {
            info!(reason = %e, action = %request.action, "Request rejected");
            return (StatusCode::BAD_REQUEST, Json(ExecutionOutcome::failure(e.to_string())))
                .into_response();
        }
    };

    match state.executor.run(job).await {
        Ok(outcome) => {
            info!(
                action = %job.action,
                test_cases = job.test_cases.len(),
                summary = outcome.summary.as_deref().unwrap_or("-"),
                "Request completed"
            );
            (StatusCode::OK, Json(outcome)).into_response()
        }
        Err(e) => {
            error!(error = ?e, "Execution pipeline failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ExecutionOutcome::failure("Server Error: internal error")),
            )
                .into_response()
        }
    }
}

/// GET /health - Health check endpoint
pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "OK",
            "timestamp": now(),
            "service": SERVICE_NAME,
            "version": env!("CARGO_PKG_VERSION"),
            "containment": state.executor.containment().to_string(),
        })),
    )
}

/// GET /warmup - Cheap request used to keep instances warm
pub async fn warmup() -> impl IntoResponse {
    Json(json!({
        "status": "warmed up",
        "timestamp": now(),
    }))
}

/// GET / - Service banner
pub async fn root() -> impl IntoResponse {
    Json(json!({
        "message": "pyrun code execution API",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "health": "/health",
            "run": "/api/run",
            "warmup": "/warmup",
        },
        "status": "operational",
    }))
}

/// Fallback for unknown routes
pub async fn not_found(uri: Uri) -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": "Route not found",
            "path": uri.path(),
            "availableEndpoints": ENDPOINTS,
        })),
    )
}
