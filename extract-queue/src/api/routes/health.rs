//! Health and version routes.

use axum::{Json, Router, extract::State, routing::get};

use crate::api::models::{HealthResponse, VersionInfo};
use crate::api::server::AppState;

/// Create the health router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/version_info", get(version_info))
}

/// Liveness with queue depth and worker counts.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let (workers, busy_workers) = state
        .worker_pool
        .as_ref()
        .map(|pool| (pool.worker_count(), pool.busy_count()))
        .unwrap_or((0, 0));

    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        queue_depth: state.job_service.queue().len(),
        workers,
        busy_workers,
    })
}

async fn version_info(State(state): State<AppState>) -> Json<VersionInfo> {
    Json(state.version)
}
