//! Router assembly and server lifecycle

use std::future::Future;
use std::net::SocketAddr;

use axum::extract::DefaultBodyLimit;
use axum::http::{header, Method};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::routes;
use crate::state::SharedState;

/// Build the router with flag-gated layers.
pub fn create_router(state: SharedState) -> Router {
    let mut router = Router::new()
        .route("/", get(routes::root))
        .route("/api/convert", post(routes::convert::convert))
        .route("/api/cache/stats", get(routes::stats::global))
        .route("/api/cache/stats/{device_id}", get(routes::stats::device));

    if state.config.enable_health_check {
        router = router.route("/api/health", get(routes::health::health));
    }

    router = router.layer(DefaultBodyLimit::max(state.config.body_limit));
    router = router.layer(TimeoutLayer::new(state.config.write_timeout));

    if state.config.enable_cors {
        router = router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST, Method::HEAD, Method::OPTIONS])
                .allow_headers([header::ORIGIN, header::CONTENT_TYPE, header::ACCEPT]),
        );
    }

    if state.config.enable_performance_logs {
        router = router.layer(TraceLayer::new_for_http());
    }

    router.with_state(state)
}

/// Bind and serve until the shutdown future resolves, then drain.
pub async fn start_server(
    state: SharedState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let port = state.config.port;
    let router = create_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
}

/// Resolve on SIGTERM or SIGINT.
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
            _ = sigint.recv() => info!("received SIGINT, shutting down"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
        info!("received Ctrl+C, shutting down");
    }
}
