//! GET /api/cache/stats[/{device_id}]

use axum::extract::{Path, State};
use axum::response::Json;

use crate::state::SharedState;
use crate::types::CacheStatsResponse;

pub async fn global(State(state): State<SharedState>) -> Json<CacheStatsResponse> {
    Json(CacheStatsResponse {
        device_id: None,
        device_stats: None,
        global_stats: state.cache.global_stats().await.into(),
    })
}

pub async fn device(
    State(state): State<SharedState>,
    Path(device_id): Path<String>,
) -> Json<CacheStatsResponse> {
    let device_stats = state.cache.device_stats(&device_id).await;
    let global_stats = state.cache.global_stats().await;

    Json(CacheStatsResponse {
        device_id: Some(device_id),
        device_stats: Some(device_stats.into()),
        global_stats: global_stats.into(),
    })
}
