//! Liveness and readiness probe handlers.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::Serialize;

use reelpipe_models::HealthSnapshot;

use crate::state::AppState;

/// Liveness response.
#[derive(Serialize)]
pub struct LivenessResponse {
    pub status: String,
    pub version: String,
    pub timestamp: String,
}

/// Liveness probe.
///
/// Answers only "is the worker pool still scheduling"; a slow or stuck
/// job never fails this probe.
pub async fn livez(
    State(state): State<AppState>,
) -> Result<Json<LivenessResponse>, (StatusCode, Json<LivenessResponse>)> {
    let alive = state.pipeline.is_alive();
    let response = LivenessResponse {
        status: if alive { "alive" } else { "stalled" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now().to_rfc3339(),
    };

    if alive {
        Ok(Json(response))
    } else {
        Err((StatusCode::SERVICE_UNAVAILABLE, Json(response)))
    }
}

/// Readiness response: status plus the full snapshot.
#[derive(Serialize)]
pub struct ReadinessResponse {
    pub status: String,
    #[serde(flatten)]
    pub snapshot: HealthSnapshot,
}

/// Readiness probe.
///
/// Degrades when the queue is saturated, storage is at the ceiling, or
/// no worker can make progress; recovers on its own once pressure clears.
pub async fn readyz(
    State(state): State<AppState>,
) -> Result<Json<ReadinessResponse>, (StatusCode, Json<ReadinessResponse>)> {
    let ready = state.pipeline.is_ready().await;
    let response = ReadinessResponse {
        status: if ready { "ready" } else { "degraded" }.to_string(),
        snapshot: state.pipeline.snapshot().await,
    };

    if ready {
        Ok(Json(response))
    } else {
        Err((StatusCode::SERVICE_UNAVAILABLE, Json(response)))
    }
}
