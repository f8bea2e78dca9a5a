use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use mediashift_server::server::{shutdown_signal, start_server};
use mediashift_server::{AppState, Config};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env();

    let default_filter = format!(
        "mediashift_server={0},device_file_cache={0},tower_http={0}",
        config.log_level
    );
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&default_filter)),
        )
        .init();

    info!("starting Mediashift Converter API");
    info!(
        port = config.port,
        workers = config.max_workers,
        buffer_pool = config.buffer_pool_size,
        buffer_size = config.buffer_size,
        cache_dir = %config.cache_dir.display(),
        cache_ttl_secs = config.cache_ttl.as_secs(),
        file_ttl_secs = config.file_ttl.as_secs(),
        cache_enabled = config.enable_cache,
        default_level = %config.default_af_level,
        "configuration loaded"
    );

    let state = Arc::new(AppState::new(config));
    state.start().await?;

    start_server(state.clone(), shutdown_signal()).await?;

    // listener has drained; stop the pool, then the cache sweeper
    state.shutdown().await;
    info!("shutdown complete");
    Ok(())
}
