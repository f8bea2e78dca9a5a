//! Request and response types for the HTTP surface

use device_file_cache::{DeviceStats, GlobalStats};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Media kinds the service converts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Audio,
    Image,
    Video,
}

impl MediaType {
    pub fn as_str(self) -> &'static str {
        match self {
            MediaType::Audio => "audio",
            MediaType::Image => "image",
            MediaType::Video => "video",
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Anti-fingerprint dial selecting how strongly transcode parameters are
/// perturbed. Higher levels shift the content hash further.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AfLevel {
    None,
    Basic,
    Moderate,
    Paranoid,
}

impl AfLevel {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "none" => Some(AfLevel::None),
            "basic" => Some(AfLevel::Basic),
            "moderate" => Some(AfLevel::Moderate),
            "paranoid" => Some(AfLevel::Paranoid),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AfLevel::None => "none",
            AfLevel::Basic => "basic",
            AfLevel::Moderate => "moderate",
            AfLevel::Paranoid => "paranoid",
        }
    }
}

impl fmt::Display for AfLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body of `POST /api/convert`.
///
/// `device_id` and `url` are validated by the handler rather than by serde
/// so missing fields produce a named error instead of a decode failure.
#[derive(Debug, Deserialize)]
pub struct ConvertRequest {
    #[serde(default)]
    pub device_id: String,
    #[serde(default)]
    pub url: String,
    pub media_type: Option<MediaType>,
    pub anti_fingerprint_level: Option<AfLevel>,
    #[serde(default)]
    pub is_base64: bool,
}

/// Success body of `POST /api/convert`.
#[derive(Debug, Serialize)]
pub struct ConvertResponse {
    pub success: bool,
    pub processed_path: String,
    pub cache_hit: bool,
    pub media_type: MediaType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_size_bytes: Option<u64>,
    pub processed_size_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_increase_percent: Option<String>,
    pub processing_time_ms: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_expires: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_expires: Option<String>,
}

/// Body of `GET /api/cache/stats[/{device_id}]`.
#[derive(Debug, Serialize)]
pub struct CacheStatsResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_stats: Option<DeviceStatsView>,
    pub global_stats: GlobalStatsView,
}

/// Per-device cache stats as exposed over HTTP.
#[derive(Debug, Serialize)]
pub struct DeviceStatsView {
    pub entries: usize,
    pub total_kb: u64,
}

impl From<DeviceStats> for DeviceStatsView {
    fn from(stats: DeviceStats) -> Self {
        Self {
            entries: stats.entries,
            total_kb: stats.total_bytes / 1024,
        }
    }
}

/// Global cache stats as exposed over HTTP.
#[derive(Debug, Serialize)]
pub struct GlobalStatsView {
    pub devices: usize,
    pub entries: usize,
    pub total_mb: u64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub hit_rate: String,
}

impl From<GlobalStats> for GlobalStatsView {
    fn from(stats: GlobalStats) -> Self {
        Self {
            devices: stats.devices,
            entries: stats.entries,
            total_mb: stats.total_bytes / (1024 * 1024),
            hits: stats.hits,
            misses: stats.misses,
            evictions: stats.evictions,
            hit_rate: format!("{:.2}%", stats.hit_rate_percent),
        }
    }
}

/// Body of `GET /api/health`.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
    pub ffmpeg_version: String,
    pub worker_pool: crate::pool::WorkerPoolStats,
    pub buffer_pool: crate::pool::BufferPoolStats,
    pub cache: GlobalStatsView,
}
