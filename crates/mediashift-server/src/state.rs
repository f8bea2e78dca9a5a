//! Shared application state passed to all route handlers

use std::sync::Arc;

use chrono::{DateTime, Utc};
use device_file_cache::DeviceCache;

use crate::config::Config;
use crate::convert::{AudioConverter, ImageConverter, VideoConverter};
use crate::download::Downloader;
use crate::pool::{BufferPool, PoolError, WorkerPool};

pub struct AppState {
    pub config: Config,
    pub cache: DeviceCache,
    pub downloader: Downloader,
    pub worker_pool: WorkerPool,
    pub buffer_pool: Arc<BufferPool>,
    pub audio: Arc<AudioConverter>,
    pub image: Arc<ImageConverter>,
    pub video: Arc<VideoConverter>,
    pub started_at: DateTime<Utc>,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    /// Wire every component from the configuration. The worker pool and
    /// cache still need [`AppState::start`] before serving traffic.
    pub fn new(config: Config) -> Self {
        let buffer_pool = BufferPool::new(config.buffer_pool_size, config.buffer_size);
        let worker_pool = WorkerPool::new(config.max_workers, config.queue_size_multiplier);
        let cache = DeviceCache::new(&config.cache_dir, config.cache_ttl, config.file_ttl);
        let downloader = Downloader::new(
            buffer_pool.clone(),
            config.max_download_size,
            config.download_timeout,
        );

        Self {
            config,
            cache,
            downloader,
            worker_pool,
            buffer_pool,
            audio: Arc::new(AudioConverter::new()),
            image: Arc::new(ImageConverter::new()),
            video: Arc::new(VideoConverter::new()),
            started_at: Utc::now(),
        }
    }

    /// Create the cache directory, start the sweeper, and spawn the
    /// worker pool.
    pub async fn start(&self) -> Result<(), StartError> {
        self.cache.init().await?;
        self.worker_pool.start().await?;
        Ok(())
    }

    /// Stop the worker pool (draining in-flight tasks) and the cache
    /// sweeper, in that order.
    pub async fn shutdown(&self) {
        self.worker_pool.stop().await;
        self.cache.stop();
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StartError {
    #[error("failed to initialize cache: {0}")]
    Cache(#[from] std::io::Error),
    #[error("failed to start worker pool: {0}")]
    WorkerPool(#[from] PoolError),
}
