//! POST /api/convert — the conversion pipeline
//!
//! parse → validate → detect type → default level → cache lookup → fetch →
//! convert → stat → cache insert → respond. A hit whose file has vanished
//! out-of-band demotes to a miss.

use std::path::{Path, PathBuf};
use std::time::Instant;

use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Json, Response};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Deserialize;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::AppError;
use crate::media;
use crate::pool::{BoxError, PoolError};
use crate::state::{AppState, SharedState};
use crate::types::{AfLevel, ConvertRequest, ConvertResponse, MediaType};

#[derive(Debug, Default, Deserialize)]
pub struct ConvertQuery {
    pub download: Option<String>,
}

pub async fn convert(
    State(state): State<SharedState>,
    Query(query): Query<ConvertQuery>,
    payload: Result<Json<ConvertRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let start = Instant::now();
    let Json(request) = payload
        .map_err(|e| AppError::bad_request_with("Invalid request body", e.to_string()))?;
    let download_mode = query.download.as_deref() == Some("true");

    if request.device_id.is_empty() {
        return Err(AppError::bad_request("device_id is required"));
    }
    if request.url.is_empty() {
        return Err(AppError::bad_request("url is required"));
    }

    let media_type = match request.media_type {
        Some(media_type) => media_type,
        None => media::infer_media_type(&request.url).ok_or_else(|| {
            AppError::bad_request_with(
                "Could not detect media type from URL. Please provide media_type (audio/image/video)",
                format!("Supported extensions: {}", media::supported_extensions()),
            )
        })?,
    };

    let level = request
        .anti_fingerprint_level
        .unwrap_or_else(|| default_level(media_type));

    if state.config.enable_cache {
        if let Some(entry) = state.cache.get(&request.device_id, &request.url).await {
            match tokio::fs::metadata(&entry.processed_path).await {
                Ok(meta) => {
                    info!(
                        device_id = %request.device_id,
                        url = %short_url(&request.url),
                        path = %entry.processed_path.display(),
                        "cache hit"
                    );
                    if download_mode {
                        return stream_file(&entry.processed_path, media_type).await;
                    }
                    return Ok(Json(ConvertResponse {
                        success: true,
                        processed_path: entry.processed_path.display().to_string(),
                        cache_hit: true,
                        media_type,
                        original_size_bytes: None,
                        processed_size_bytes: meta.len(),
                        size_increase_percent: None,
                        processing_time_ms: start.elapsed().as_millis().to_string(),
                        cache_expires: Some(entry.cache_expires_at.to_rfc3339()),
                        file_expires: Some(entry.file_expires_at.to_rfc3339()),
                    })
                    .into_response());
                }
                Err(_) => {
                    // file deleted under the entry: treat as a miss
                    warn!(
                        device_id = %request.device_id,
                        path = %entry.processed_path.display(),
                        "cached file missing, reprocessing"
                    );
                }
            }
        }
    }

    let token = CancellationToken::new();
    let pipeline = process_miss(
        &state,
        &request,
        media_type,
        level,
        download_mode,
        start,
        &token,
    );
    match tokio::time::timeout(state.config.request_timeout, pipeline).await {
        Ok(result) => result,
        Err(_) => {
            token.cancel();
            Err(AppError::internal("Request timed out"))
        }
    }
}

fn default_level(media_type: MediaType) -> AfLevel {
    match media_type {
        MediaType::Audio | MediaType::Image => AfLevel::Moderate,
        MediaType::Video => AfLevel::Basic,
    }
}

async fn process_miss(
    state: &AppState,
    request: &ConvertRequest,
    media_type: MediaType,
    level: AfLevel,
    download_mode: bool,
    start: Instant,
    token: &CancellationToken,
) -> Result<Response, AppError> {
    info!(
        device_id = %request.device_id,
        url = %short_url(&request.url),
        media_type = %media_type,
        level = %level,
        "cache miss, processing"
    );

    let input = if request.is_base64 {
        BASE64.decode(request.url.as_bytes()).map_err(|e| {
            AppError::bad_request_with("Failed to decode base64 data", e.to_string())
        })?
    } else {
        state.downloader.download(&request.url).await?
    };
    if input.is_empty() {
        return Err(AppError::bad_request("Decoded base64 data is empty"));
    }
    let original_size = input.len() as u64;

    let media_dir = state.config.cache_dir.join(media::media_subdir(media_type));
    tokio::fs::create_dir_all(&media_dir).await.map_err(|e| {
        AppError::internal_with("Failed to create media cache directory", e.to_string())
    })?;

    let url_key = device_file_cache::url_key(&request.url);
    let output_path = match media_type {
        MediaType::Audio => state
            .audio
            .output_path(&media_dir, &request.device_id, &url_key),
        MediaType::Image => state
            .image
            .output_path(&media_dir, &request.device_id, &url_key),
        MediaType::Video => state
            .video
            .output_path(&media_dir, &request.device_id, &url_key),
    };

    let processing_start = Instant::now();
    let final_path =
        dispatch_conversion(state, media_type, input, level, output_path, token).await?;

    let meta = tokio::fs::metadata(&final_path)
        .await
        .map_err(|e| AppError::internal_with("Failed to stat output file", e.to_string()))?;
    let processed_size = meta.len();
    let size_increase =
        (processed_size as f64 - original_size as f64) / original_size as f64 * 100.0;

    // best-effort: a response is still produced if caching is off
    let (cache_expires, file_expires) = if state.config.enable_cache {
        let entry = state
            .cache
            .insert(
                &request.device_id,
                &request.url,
                &final_path,
                media_type.as_str(),
                processed_size,
            )
            .await;
        (
            Some(entry.cache_expires_at.to_rfc3339()),
            Some(entry.file_expires_at.to_rfc3339()),
        )
    } else {
        (None, None)
    };

    info!(
        device_id = %request.device_id,
        media_type = %media_type,
        level = %level,
        original_size,
        processed_size,
        elapsed_ms = processing_start.elapsed().as_millis() as u64,
        "processed"
    );

    if download_mode {
        return stream_file(&final_path, media_type).await;
    }

    Ok(Json(ConvertResponse {
        success: true,
        processed_path: final_path.display().to_string(),
        cache_hit: false,
        media_type,
        original_size_bytes: Some(original_size),
        processed_size_bytes: processed_size,
        size_increase_percent: Some(format!("{size_increase:.2}%")),
        processing_time_ms: start.elapsed().as_millis().to_string(),
        cache_expires,
        file_expires,
    })
    .into_response())
}

/// Run the conversion through the worker pool, bounded by the request
/// token.
async fn dispatch_conversion(
    state: &AppState,
    media_type: MediaType,
    input: Vec<u8>,
    level: AfLevel,
    output_path: PathBuf,
    token: &CancellationToken,
) -> Result<PathBuf, AppError> {
    let task_token = token.clone();
    let result = match media_type {
        MediaType::Audio => {
            let converter = state.audio.clone();
            state
                .worker_pool
                .submit_scoped(token.clone(), async move {
                    converter
                        .convert(&input, level, &output_path, &task_token)
                        .await
                        .map_err(|e| Box::new(e) as BoxError)
                })
                .await
        }
        MediaType::Image => {
            let converter = state.image.clone();
            state
                .worker_pool
                .submit_scoped(token.clone(), async move {
                    converter
                        .convert(&input, level, &output_path, &task_token)
                        .await
                        .map_err(|e| Box::new(e) as BoxError)
                })
                .await
        }
        MediaType::Video => {
            let converter = state.video.clone();
            state
                .worker_pool
                .submit_scoped(token.clone(), async move {
                    converter
                        .convert(&input, level, &output_path, &task_token)
                        .await
                        .map_err(|e| Box::new(e) as BoxError)
                })
                .await
        }
    };

    result.map_err(|e| match e {
        PoolError::Cancelled => AppError::internal("Conversion cancelled"),
        PoolError::Task(err) => {
            AppError::internal_with(format!("Conversion failed: {media_type}"), err.to_string())
        }
        other => AppError::internal_with("Conversion failed", other.to_string()),
    })
}

/// Stream the artifact back instead of returning JSON.
async fn stream_file(path: &Path, media_type: MediaType) -> Result<Response, AppError> {
    let file = tokio::fs::File::open(path)
        .await
        .map_err(|e| AppError::internal_with("Failed to open processed file", e.to_string()))?;
    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("artifact");

    Response::builder()
        .header(header::CONTENT_TYPE, media::content_type_for(path, media_type))
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{filename}\""),
        )
        .body(Body::from_stream(ReaderStream::new(file)))
        .map_err(|e| AppError::internal(e.to_string()))
}

fn short_url(url: &str) -> &str {
    match url.char_indices().nth(60) {
        Some((idx, _)) => &url[..idx],
        None => url,
    }
}
