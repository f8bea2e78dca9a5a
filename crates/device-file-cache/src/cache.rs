//! The device cache proper: two-tier map, sweeper, delayed deleters

use chrono::{Duration as ChronoDuration, Utc};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::RwLock as SyncRwLock;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::types::{CacheEntry, CacheStats, DeviceStats, GlobalStats};

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(28 * 60);
const DEFAULT_FILE_TTL: Duration = Duration::from_secs(30 * 60);

/// Fixed-width hex digest of a URL, used as the inner map key.
pub fn url_key(url: &str) -> String {
    format!("{:x}", Sha256::digest(url.as_bytes()))
}

type DeviceMap = HashMap<String, HashMap<String, Arc<CacheEntry>>>;

/// Per-device cache of processed files.
///
/// Lookups take the map's read lock; inserts, the sweeper, and the per-entry
/// deleters take the write lock. Hit counters on entries are atomics bumped
/// under the read lock. Lifetime counters live behind their own lock so
/// stat reads never contend with the map.
#[derive(Clone)]
pub struct DeviceCache {
    inner: Arc<Inner>,
}

struct Inner {
    map: RwLock<DeviceMap>,
    stats: SyncRwLock<CacheStats>,
    cache_dir: PathBuf,
    cache_ttl: Duration,
    file_ttl: Duration,
    stop: CancellationToken,
}

impl DeviceCache {
    /// Create a cache rooted at `cache_dir`.
    ///
    /// The file TTL must exceed the cache TTL so a live entry never points
    /// at a deleted file; invalid combinations fall back to the defaults
    /// (28 and 30 minutes) with a warning.
    pub fn new(cache_dir: impl Into<PathBuf>, cache_ttl: Duration, file_ttl: Duration) -> Self {
        let (cache_ttl, file_ttl) =
            if cache_ttl.is_zero() || file_ttl.is_zero() || file_ttl <= cache_ttl {
                warn!(
                    cache_ttl_secs = cache_ttl.as_secs(),
                    file_ttl_secs = file_ttl.as_secs(),
                    "invalid TTL pair, using defaults"
                );
                (DEFAULT_CACHE_TTL, DEFAULT_FILE_TTL)
            } else {
                (cache_ttl, file_ttl)
            };

        Self {
            inner: Arc::new(Inner {
                map: RwLock::new(HashMap::new()),
                stats: SyncRwLock::new(CacheStats::default()),
                cache_dir: cache_dir.into(),
                cache_ttl,
                file_ttl,
                stop: CancellationToken::new(),
            }),
        }
    }

    /// Create the cache directory and start the background sweeper.
    pub async fn init(&self) -> io::Result<()> {
        tokio::fs::create_dir_all(&self.inner.cache_dir).await?;

        let inner = self.inner.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            ticker.tick().await; // first tick fires immediately
            loop {
                tokio::select! {
                    _ = inner.stop.cancelled() => break,
                    _ = ticker.tick() => inner.sweep().await,
                }
            }
            debug!("cache sweeper stopped");
        });

        info!(
            dir = %self.inner.cache_dir.display(),
            cache_ttl_secs = self.inner.cache_ttl.as_secs(),
            file_ttl_secs = self.inner.file_ttl.as_secs(),
            "device cache initialized"
        );
        Ok(())
    }

    pub fn cache_dir(&self) -> &Path {
        &self.inner.cache_dir
    }

    pub fn cache_ttl(&self) -> Duration {
        self.inner.cache_ttl
    }

    pub fn file_ttl(&self) -> Duration {
        self.inner.file_ttl
    }

    /// Look up `(device_id, url)`. Misses on absence or logical expiry.
    ///
    /// A returned entry may still reference a file deleted out-of-band;
    /// callers must stat the path and treat failure as a miss.
    pub async fn get(&self, device_id: &str, url: &str) -> Option<Arc<CacheEntry>> {
        let key = url_key(url);
        let found = {
            let map = self.inner.map.read().await;
            match map.get(device_id).and_then(|entries| entries.get(&key)) {
                Some(entry) if Utc::now() < entry.cache_expires_at => {
                    entry.record_use();
                    Some(entry.clone())
                }
                _ => None,
            }
        };

        match found {
            Some(entry) => {
                self.inner.record_hit();
                Some(entry)
            }
            None => {
                self.inner.record_miss();
                None
            }
        }
    }

    /// Store a processed file, replacing any live entry for the pair, and
    /// arm the delayed deleter that removes it after the file TTL.
    pub async fn insert(
        &self,
        device_id: &str,
        url: &str,
        processed_path: impl Into<PathBuf>,
        media_type: &str,
        size_bytes: u64,
    ) -> Arc<CacheEntry> {
        let now = Utc::now();
        let key = url_key(url);
        let entry = Arc::new(CacheEntry::new(
            device_id.to_string(),
            key.clone(),
            processed_path.into(),
            media_type.to_string(),
            size_bytes,
            now,
            now + chrono_from(self.inner.cache_ttl),
            now + chrono_from(self.inner.file_ttl),
        ));

        {
            let mut map = self.inner.map.write().await;
            map.entry(device_id.to_string())
                .or_default()
                .insert(key, entry.clone());
        }

        let inner = self.inner.clone();
        let armed = entry.clone();
        tokio::spawn(async move {
            tokio::time::sleep(inner.file_ttl).await;
            inner.evict(&armed).await;
        });

        debug!(
            device_id,
            path = %entry.processed_path.display(),
            cache_expires = %entry.cache_expires_at,
            "cache insert"
        );
        entry
    }

    /// Snapshot one device's partition.
    pub async fn device_stats(&self, device_id: &str) -> DeviceStats {
        let map = self.inner.map.read().await;
        match map.get(device_id) {
            Some(entries) => DeviceStats {
                entries: entries.len(),
                total_bytes: entries.values().map(|e| e.size_bytes).sum(),
            },
            None => DeviceStats::default(),
        }
    }

    /// Snapshot the whole cache plus lifetime counters.
    pub async fn global_stats(&self) -> GlobalStats {
        let (devices, entries, total_bytes) = {
            let map = self.inner.map.read().await;
            let entries: usize = map.values().map(|d| d.len()).sum();
            let bytes: u64 = map
                .values()
                .flat_map(|d| d.values())
                .map(|e| e.size_bytes)
                .sum();
            (map.len(), entries, bytes)
        };

        let counters = *self.inner.stats.read().expect("stats lock poisoned");
        let total = counters.hits + counters.misses;
        let hit_rate_percent = if total > 0 {
            counters.hits as f64 / total as f64 * 100.0
        } else {
            0.0
        };

        GlobalStats {
            devices,
            entries,
            total_bytes,
            hits: counters.hits,
            misses: counters.misses,
            evictions: counters.evictions,
            hit_rate_percent,
        }
    }

    /// Stop the background sweeper. In-flight deleters are left to fire.
    pub fn stop(&self) {
        self.inner.stop.cancel();
    }
}

impl Inner {
    fn record_hit(&self) {
        self.stats.write().expect("stats lock poisoned").hits += 1;
    }

    fn record_miss(&self) {
        self.stats.write().expect("stats lock poisoned").misses += 1;
    }

    fn record_eviction(&self) {
        self.stats.write().expect("stats lock poisoned").evictions += 1;
    }

    /// Delayed-deleter body: drop the map entry (only if it still refers to
    /// this artifact; a replacement insert must survive the stale timer of
    /// the entry it displaced) and unlink the file.
    async fn evict(&self, entry: &CacheEntry) {
        {
            let mut map = self.map.write().await;
            if let Some(entries) = map.get_mut(&entry.device_id) {
                let same = entries
                    .get(&entry.url_key)
                    .is_some_and(|e| e.processed_path == entry.processed_path);
                if same {
                    entries.remove(&entry.url_key);
                    if entries.is_empty() {
                        map.remove(&entry.device_id);
                    }
                }
            }
        }

        match tokio::fs::remove_file(&entry.processed_path).await {
            Ok(()) => {
                self.record_eviction();
                debug!(path = %entry.processed_path.display(), "deleted expired file");
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(path = %entry.processed_path.display(), error = %e, "failed to delete expired file");
            }
        }
    }

    /// Periodic sweep: drop entries past their file deadline and unlink
    /// their files outside the lock. Redundant with the per-entry deleters;
    /// repeated deletion attempts are harmless.
    async fn sweep(&self) {
        let now = Utc::now();
        let mut expired: Vec<PathBuf> = Vec::new();
        {
            let mut map = self.map.write().await;
            for entries in map.values_mut() {
                entries.retain(|_, entry| {
                    if now > entry.file_expires_at {
                        expired.push(entry.processed_path.clone());
                        false
                    } else {
                        true
                    }
                });
            }
            map.retain(|_, entries| !entries.is_empty());
        }

        if expired.is_empty() {
            return;
        }

        let count = expired.len();
        for path in expired {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %e, "sweep failed to delete file");
                }
            }
        }
        debug!(count, "sweep removed expired entries");
    }
}

fn chrono_from(d: Duration) -> ChronoDuration {
    ChronoDuration::milliseconds(d.as_millis() as i64)
}
