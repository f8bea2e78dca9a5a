//! HTTP(S) artifact fetching with size caps and connection reuse

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use crate::pool::BufferPool;

const POOL_MAX_IDLE: usize = 100;
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("empty URL")]
    EmptyUrl,
    #[error("invalid URL scheme: must be http:// or https://")]
    InvalidScheme,
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("server returned HTTP {0}")]
    Status(u16),
    #[error("file too large: {size} bytes (max {max})")]
    TooLarge { size: u64, max: u64 },
    #[error("downloaded file is empty")]
    Empty,
}

/// Downloader over one long-lived client with a generous idle pool.
pub struct Downloader {
    client: reqwest::Client,
    buffer_pool: Arc<BufferPool>,
    max_size: u64,
}

impl Downloader {
    pub fn new(buffer_pool: Arc<BufferPool>, max_size: u64, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(POOL_MAX_IDLE)
            .pool_idle_timeout(POOL_IDLE_TIMEOUT)
            .gzip(true)
            .build()
            .expect("failed to create HTTP client");

        Self {
            client,
            buffer_pool,
            max_size,
        }
    }

    /// Fetch `url` fully into memory, enforcing the scheme, a 200 status,
    /// the configured size cap, and a non-empty body.
    pub async fn download(&self, url: &str) -> Result<Vec<u8>, DownloadError> {
        if url.is_empty() {
            return Err(DownloadError::EmptyUrl);
        }
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(DownloadError::InvalidScheme);
        }

        let response = self.client.get(url).send().await?;
        if response.status() != reqwest::StatusCode::OK {
            return Err(DownloadError::Status(response.status().as_u16()));
        }

        let advertised = response.content_length();
        if let Some(len) = advertised {
            if len > self.max_size {
                return Err(DownloadError::TooLarge {
                    size: len,
                    max: self.max_size,
                });
            }
        }

        let data = match advertised {
            // known small body: read through a pooled buffer, copy out exact
            Some(len) if len > 0 && len <= self.buffer_pool.buffer_size() as u64 => {
                self.read_pooled(response, len as usize).await?
            }
            _ => self.read_capped(response).await?,
        };

        if data.is_empty() {
            return Err(DownloadError::Empty);
        }

        debug!(url, bytes = data.len(), "download complete");
        Ok(data)
    }

    async fn read_pooled(
        &self,
        mut response: reqwest::Response,
        len: usize,
    ) -> Result<Vec<u8>, DownloadError> {
        let mut lease = self.buffer_pool.acquire(len);
        let mut filled = 0usize;

        while let Some(chunk) = response.chunk().await? {
            let end = filled + chunk.len();
            if end > len {
                // server sent more than it advertised
                return Err(DownloadError::TooLarge {
                    size: end as u64,
                    max: len as u64,
                });
            }
            lease[filled..end].copy_from_slice(&chunk);
            filled = end;
        }

        Ok(lease[..filled].to_vec())
    }

    async fn read_capped(&self, mut response: reqwest::Response) -> Result<Vec<u8>, DownloadError> {
        let mut data = Vec::new();

        while let Some(chunk) = response.chunk().await? {
            if data.len() as u64 + chunk.len() as u64 > self.max_size {
                return Err(DownloadError::TooLarge {
                    size: data.len() as u64 + chunk.len() as u64,
                    max: self.max_size,
                });
            }
            data.extend_from_slice(&chunk);
        }

        Ok(data)
    }
}
