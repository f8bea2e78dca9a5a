//! GET /api/health

use axum::extract::State;
use axum::response::Json;
use chrono::Utc;

use crate::convert;
use crate::state::SharedState;
use crate::types::HealthResponse;

pub async fn health(State(state): State<SharedState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: Utc::now().to_rfc3339(),
        ffmpeg_version: convert::ffmpeg_version().await,
        worker_pool: state.worker_pool.stats(),
        buffer_pool: state.buffer_pool.stats(),
        cache: state.cache.global_stats().await.into(),
    })
}
