//! Cache entry and statistics types

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

/// Metadata for one cached artifact.
///
/// `cache_expires_at` is the logical visibility horizon: lookups after it
/// miss. `file_expires_at` is the physical deletion deadline and is always
/// strictly later. Neither moves over the entry's lifetime.
#[derive(Debug)]
pub struct CacheEntry {
    pub device_id: String,
    pub url_key: String,
    pub processed_path: PathBuf,
    pub media_type: String,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
    pub cache_expires_at: DateTime<Utc>,
    pub file_expires_at: DateTime<Utc>,
    uses: AtomicU64,
}

impl CacheEntry {
    pub(crate) fn new(
        device_id: String,
        url_key: String,
        processed_path: PathBuf,
        media_type: String,
        size_bytes: u64,
        created_at: DateTime<Utc>,
        cache_expires_at: DateTime<Utc>,
        file_expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            device_id,
            url_key,
            processed_path,
            media_type,
            size_bytes,
            created_at,
            cache_expires_at,
            file_expires_at,
            uses: AtomicU64::new(0),
        }
    }

    /// Number of cache hits this entry has served.
    pub fn uses(&self) -> u64 {
        self.uses.load(Ordering::Relaxed)
    }

    pub(crate) fn record_use(&self) {
        self.uses.fetch_add(1, Ordering::Relaxed);
    }
}

/// Lifetime hit/miss/eviction counters.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

/// Snapshot of the whole cache plus lifetime counters.
#[derive(Debug, Clone, Serialize)]
pub struct GlobalStats {
    pub devices: usize,
    pub entries: usize,
    pub total_bytes: u64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub hit_rate_percent: f64,
}

/// Snapshot of a single device's partition.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeviceStats {
    pub entries: usize,
    pub total_bytes: u64,
}
