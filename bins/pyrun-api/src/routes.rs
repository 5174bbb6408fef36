// Route table for the pyrun API

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health_check))
        .route("/warmup", get(handlers::warmup))
        .route("/api/run", post(handlers::run_code))
        .fallback(handlers::not_found)
}

/// Full application: routes, body limit, request tracing and state
pub fn app(state: Arc<AppState>, max_body_bytes: usize) -> Router {
    Router::new()
        .merge(routes())
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
