//! HTTP route handlers

pub mod convert;
pub mod health;
pub mod stats;

use axum::response::Json;
use serde_json::{json, Value};

/// GET / — service identity banner.
pub async fn root() -> Json<Value> {
    Json(json!({
        "service": "Mediashift Converter API",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
        "endpoints": [
            "POST /api/convert",
            "GET  /api/cache/stats",
            "GET  /api/cache/stats/{device_id}",
            "GET  /api/health",
        ],
    }))
}
