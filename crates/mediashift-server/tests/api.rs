//! HTTP-level scenarios against the real router.
//!
//! Conversion scenarios that need a live transcoder binary are exercised at
//! the converter layer; these tests cover the pipeline around it: request
//! validation, cache hit/miss/expiry behavior, streaming, and the stats and
//! health surfaces.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

use mediashift_server::server::create_router;
use mediashift_server::{AppState, Config, SharedState};

fn base_config(dir: &Path) -> Config {
    Config {
        cache_dir: dir.to_path_buf(),
        max_workers: 2,
        buffer_pool_size: 2,
        buffer_size: 1024 * 1024,
        ..Config::default()
    }
}

async fn test_state(config: Config) -> SharedState {
    let state = Arc::new(AppState::new(config));
    state.start().await.expect("state start");
    state
}

async fn test_router(config: Config) -> (Router, SharedState) {
    let state = test_state(config).await;
    (create_router(state.clone()), state)
}

async fn post_convert(router: &Router, body: Value) -> (StatusCode, Value) {
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/convert")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

async fn get_json(router: &Router, uri: &str) -> (StatusCode, Value) {
    let response = router
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

#[tokio::test]
async fn banner_lists_endpoints() {
    let dir = TempDir::new().unwrap();
    let (router, _state) = test_router(base_config(dir.path())).await;

    let (status, json) = get_json(&router, "/").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "running");
    assert!(json["endpoints"]
        .as_array()
        .unwrap()
        .iter()
        .any(|e| e.as_str().unwrap().contains("/api/convert")));
}

#[tokio::test]
async fn health_reports_pools_and_cache() {
    let dir = TempDir::new().unwrap();
    let (router, _state) = test_router(base_config(dir.path())).await;

    let (status, json) = get_json(&router, "/api/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["worker_pool"]["max_workers"], 2);
    assert_eq!(json["worker_pool"]["active_workers"], 0);
    assert_eq!(json["buffer_pool"]["allocated"], 2);
    assert!(json["cache"]["entries"].is_number());
    assert!(json["ffmpeg_version"].is_string());
}

#[tokio::test]
async fn health_can_be_disabled() {
    let dir = TempDir::new().unwrap();
    let mut config = base_config(dir.path());
    config.enable_health_check = false;
    let (router, _state) = test_router(config).await;

    let (status, _) = get_json(&router, "/api/health").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn missing_device_id_is_rejected() {
    let dir = TempDir::new().unwrap();
    let (router, _state) = test_router(base_config(dir.path())).await;

    let (status, json) =
        post_convert(&router, json!({ "url": "http://host/a.mp3" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["success"], false);
    assert_eq!(json["error"], "device_id is required");
}

#[tokio::test]
async fn missing_url_is_rejected() {
    let dir = TempDir::new().unwrap();
    let (router, _state) = test_router(base_config(dir.path())).await;

    let (status, json) = post_convert(&router, json!({ "device_id": "d1" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "url is required");
}

#[tokio::test]
async fn unknown_extension_names_supported_ones() {
    let dir = TempDir::new().unwrap();
    let (router, _state) = test_router(base_config(dir.path())).await;

    let (status, json) = post_convert(
        &router,
        json!({ "device_id": "d3", "url": "http://host/blob.bin" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let details = json["details"].as_str().unwrap();
    assert!(details.contains(".mp3"));
    assert!(details.contains(".webp"));
    assert!(details.contains(".mkv"));
}

#[tokio::test]
async fn malformed_body_is_rejected() {
    let dir = TempDir::new().unwrap();
    let (router, _state) = test_router(base_config(dir.path())).await;

    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/convert")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(json["error"], "Invalid request body");
}

#[tokio::test]
async fn invalid_base64_is_rejected() {
    let dir = TempDir::new().unwrap();
    let (router, _state) = test_router(base_config(dir.path())).await;

    let (status, json) = post_convert(
        &router,
        json!({
            "device_id": "d2",
            "url": "!!!not-base64!!!",
            "media_type": "image",
            "is_base64": true,
        }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "Failed to decode base64 data");
}

#[tokio::test]
async fn cached_entry_is_served_without_reprocessing() {
    let dir = TempDir::new().unwrap();
    let (router, state) = test_router(base_config(dir.path())).await;

    let artifact = dir.path().join("d1_cached.opus");
    tokio::fs::write(&artifact, b"opus bytes").await.unwrap();
    state
        .cache
        .insert("d1", "http://host/a.mp3", &artifact, "audio", 10)
        .await;

    let (status, json) = post_convert(
        &router,
        json!({ "device_id": "d1", "url": "http://host/a.mp3" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    assert_eq!(json["cache_hit"], true);
    assert_eq!(json["media_type"], "audio");
    assert_eq!(json["processed_size_bytes"], 10);
    assert!(json["processed_path"]
        .as_str()
        .unwrap()
        .ends_with("d1_cached.opus"));
    assert!(json["cache_expires"].is_string());
    assert!(json["file_expires"].is_string());
    // hit responses carry no original size
    assert!(json.get("original_size_bytes").is_none());
}

#[tokio::test]
async fn download_mode_streams_cached_artifact() {
    let dir = TempDir::new().unwrap();
    let (router, state) = test_router(base_config(dir.path())).await;

    let artifact = dir.path().join("d1_stream.opus");
    tokio::fs::write(&artifact, b"streamed audio").await.unwrap();
    state
        .cache
        .insert("d1", "http://host/a.mp3", &artifact, "audio", 14)
        .await;

    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/convert?download=true")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    json!({ "device_id": "d1", "url": "http://host/a.mp3" }).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "audio/ogg"
    );
    assert!(response.headers()[header::CONTENT_DISPOSITION]
        .to_str()
        .unwrap()
        .contains("d1_stream.opus"));
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"streamed audio");
}

#[tokio::test]
async fn deleted_file_demotes_hit_to_miss() {
    let dir = TempDir::new().unwrap();
    let (router, state) = test_router(base_config(dir.path())).await;

    // entry whose file is already gone; the unreachable URL proves the
    // handler fell through to the fetch stage
    state
        .cache
        .insert(
            "d1",
            "http://127.0.0.1:9/gone.mp3",
            dir.path().join("never-written.opus"),
            "audio",
            10,
        )
        .await;

    let (status, json) = post_convert(
        &router,
        json!({ "device_id": "d1", "url": "http://127.0.0.1:9/gone.mp3" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "Failed to download file");
}

#[tokio::test]
async fn expired_entry_is_reprocessed() {
    let dir = TempDir::new().unwrap();
    let mut config = base_config(dir.path());
    config.cache_ttl = Duration::from_millis(200);
    config.file_ttl = Duration::from_millis(5_000);
    let (router, state) = test_router(config).await;

    let artifact = dir.path().join("d1_expiring.opus");
    tokio::fs::write(&artifact, b"soon stale").await.unwrap();
    state
        .cache
        .insert("d1", "http://127.0.0.1:9/a.mp3", &artifact, "audio", 10)
        .await;

    // inside the TTL: a hit
    let (status, json) = post_convert(
        &router,
        json!({ "device_id": "d1", "url": "http://127.0.0.1:9/a.mp3" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["cache_hit"], true);

    // past the TTL: a miss that reaches the (unreachable) downloader
    tokio::time::sleep(Duration::from_millis(300)).await;
    let (status, json) = post_convert(
        &router,
        json!({ "device_id": "d1", "url": "http://127.0.0.1:9/a.mp3" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "Failed to download file");
}

#[tokio::test]
async fn disabled_cache_skips_lookup() {
    let dir = TempDir::new().unwrap();
    let mut config = base_config(dir.path());
    config.enable_cache = false;
    let (router, state) = test_router(config).await;

    let artifact = dir.path().join("d1_ignored.opus");
    tokio::fs::write(&artifact, b"ignored").await.unwrap();
    state
        .cache
        .insert("d1", "http://127.0.0.1:9/a.mp3", &artifact, "audio", 7)
        .await;

    // the entry exists but the flag short-circuits straight to fetching
    let (status, json) = post_convert(
        &router,
        json!({ "device_id": "d1", "url": "http://127.0.0.1:9/a.mp3" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "Failed to download file");
}

#[tokio::test]
async fn stats_cover_device_and_global_views() {
    let dir = TempDir::new().unwrap();
    let (router, state) = test_router(base_config(dir.path())).await;

    let artifact = dir.path().join("d7_a.opus");
    tokio::fs::write(&artifact, vec![7u8; 4096]).await.unwrap();
    state
        .cache
        .insert("d7", "http://host/a.mp3", &artifact, "audio", 4096)
        .await;

    let (status, json) = get_json(&router, "/api/cache/stats/d7").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["device_id"], "d7");
    assert_eq!(json["device_stats"]["entries"], 1);
    assert_eq!(json["device_stats"]["total_kb"], 4);
    assert_eq!(json["global_stats"]["devices"], 1);
    assert_eq!(json["global_stats"]["entries"], 1);
    assert!(json["global_stats"]["hit_rate"].is_string());

    let (status, json) = get_json(&router, "/api/cache/stats").await;
    assert_eq!(status, StatusCode::OK);
    assert!(json.get("device_id").is_none());
    assert_eq!(json["global_stats"]["entries"], 1);
}

#[tokio::test]
async fn unknown_device_stats_are_empty() {
    let dir = TempDir::new().unwrap();
    let (router, _state) = test_router(base_config(dir.path())).await;

    let (status, json) = get_json(&router, "/api/cache/stats/ghost").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["device_stats"]["entries"], 0);
    assert_eq!(json["device_stats"]["total_kb"], 0);
}
