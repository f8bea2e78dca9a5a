//! Configuration parsed from environment variables

use std::env;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

use crate::types::AfLevel;

/// Process-wide configuration, read once at startup.
///
/// Duration-valued variables are given in seconds, sizes in bytes.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub body_limit: usize,

    pub max_workers: usize,
    pub queue_size_multiplier: usize,
    pub request_timeout: Duration,

    pub buffer_pool_size: usize,
    pub buffer_size: usize,

    pub cache_dir: PathBuf,
    pub cache_ttl: Duration,
    pub file_ttl: Duration,
    pub enable_cache: bool,

    pub download_timeout: Duration,
    pub max_download_size: u64,

    pub default_af_level: AfLevel,

    pub enable_cors: bool,
    pub enable_health_check: bool,
    pub enable_performance_logs: bool,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5001,
            read_timeout: Duration::from_secs(5 * 60),
            write_timeout: Duration::from_secs(5 * 60),
            body_limit: 500 * 1024 * 1024,
            max_workers: default_worker_count(),
            queue_size_multiplier: 10,
            request_timeout: Duration::from_secs(5 * 60),
            buffer_pool_size: 100,
            buffer_size: 10 * 1024 * 1024,
            cache_dir: PathBuf::from("/tmp/media-cache"),
            cache_ttl: Duration::from_secs(28 * 60),
            file_ttl: Duration::from_secs(30 * 60),
            enable_cache: true,
            download_timeout: Duration::from_secs(30),
            max_download_size: 500 * 1024 * 1024,
            default_af_level: AfLevel::Moderate,
            enable_cors: true,
            enable_health_check: true,
            enable_performance_logs: true,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Parse configuration from environment variables, falling back to the
    /// defaults above. Unparseable values are logged and ignored.
    pub fn from_env() -> Self {
        let defaults = Config::default();

        Self {
            port: env_parse("PORT", defaults.port),
            read_timeout: env_secs("READ_TIMEOUT", defaults.read_timeout),
            write_timeout: env_secs("WRITE_TIMEOUT", defaults.write_timeout),
            body_limit: env_parse("BODY_LIMIT", defaults.body_limit),
            max_workers: env_parse("MAX_WORKERS", defaults.max_workers).max(1),
            queue_size_multiplier: env_parse("QUEUE_SIZE_MULTIPLIER", defaults.queue_size_multiplier)
                .max(1),
            request_timeout: env_secs("REQUEST_TIMEOUT", defaults.request_timeout),
            buffer_pool_size: env_parse("BUFFER_POOL_SIZE", defaults.buffer_pool_size),
            buffer_size: env_parse("BUFFER_SIZE", defaults.buffer_size).max(1),
            cache_dir: env::var("CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.cache_dir),
            cache_ttl: env_secs("CACHE_TTL", defaults.cache_ttl),
            file_ttl: env_secs("FILE_TTL", defaults.file_ttl),
            enable_cache: env_parse("ENABLE_CACHE", defaults.enable_cache),
            download_timeout: env_secs("DOWNLOAD_TIMEOUT", defaults.download_timeout),
            max_download_size: env_parse("MAX_DOWNLOAD_SIZE", defaults.max_download_size),
            default_af_level: env_level("DEFAULT_AF_LEVEL", defaults.default_af_level),
            enable_cors: env_parse("ENABLE_CORS", defaults.enable_cors),
            enable_health_check: env_parse("ENABLE_HEALTH_CHECK", defaults.enable_health_check),
            enable_performance_logs: env_parse(
                "ENABLE_PERFORMANCE_LOGS",
                defaults.enable_performance_logs,
            ),
            log_level: env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
        }
    }
}

fn env_parse<T: std::str::FromStr + Copy>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => match raw.parse() {
            Ok(value) => value,
            Err(_) => {
                warn!(key, value = %raw, "invalid value, using default");
                default
            }
        },
        Err(_) => default,
    }
}

fn env_secs(key: &str, default: Duration) -> Duration {
    Duration::from_secs(env_parse(key, default.as_secs()))
}

fn env_level(key: &str, default: AfLevel) -> AfLevel {
    match env::var(key) {
        Ok(raw) => AfLevel::parse(&raw).unwrap_or_else(|| {
            warn!(key, value = %raw, "unknown anti-fingerprint level, using default");
            default
        }),
        Err(_) => default,
    }
}

fn default_worker_count() -> usize {
    match std::thread::available_parallelism() {
        Ok(n) if n.get() >= 2 => n.get() * 2,
        _ => 4,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.port, 5001);
        assert_eq!(config.cache_ttl, Duration::from_secs(28 * 60));
        assert_eq!(config.file_ttl, Duration::from_secs(30 * 60));
        assert!(config.file_ttl > config.cache_ttl);
        assert_eq!(config.max_download_size, 500 * 1024 * 1024);
        assert_eq!(config.buffer_size, 10 * 1024 * 1024);
        assert_eq!(config.default_af_level, AfLevel::Moderate);
        assert!(config.enable_cache);
        assert!(config.max_workers >= 4);
    }
}
