//! Router construction for the two listeners.

use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::health::{livez, readyz};
use crate::handlers::jobs::{cancel_job, get_job, submit_job};
use crate::state::AppState;

/// Request bodies larger than this are rejected outright.
const MAX_BODY_BYTES: usize = 64 * 1024;

/// Router for the readiness listener: the readiness probe plus the job API.
pub fn readiness_router(state: AppState) -> Router {
    Router::new()
        .route("/readyz", get(readyz))
        .route("/jobs", post(submit_job))
        .route("/jobs/:job_id", get(get_job))
        .route("/jobs/:job_id", delete(cancel_job))
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .with_state(state)
}

/// Router for the liveness listener.
pub fn liveness_router(state: AppState) -> Router {
    Router::new()
        .route("/livez", get(livez))
        .with_state(state)
}
