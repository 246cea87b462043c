//! restweave HTTP server
//!
//! Exposes the query engine over REST:
//!
//! - `POST /run-query` - evaluate the query text in the request body
//! - `GET|POST /run-query/{namespace}/{name}/{revision}` - evaluate a saved query
//! - `GET /health` - health check
//! - `GET /metrics` - Prometheus metrics
//!
//! Query-string entries bind `$param` references; `debug=true` adds
//! per-statement debug details and `tenant=...` selects the mapping
//! tenant.
//!
//! Configuration comes from `RESTWEAVE_CONFIG`, `./restweave.toml` or
//! defaults, with `RESTWEAVE_*` environment overrides.

mod config;
mod handlers;
mod types;

use axum::{
    http::{HeaderValue, Method},
    routing::{get, post},
    Router,
};
use config::load_config;
use handlers::AppState;
use restweave::{MappingResolver, PluginRegistry, QueryEngine, ReqwestHttpClient};
use std::{net::SocketAddr, sync::Arc};
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use types::Counters;

// =============================================================================
// Router and Server Setup
// =============================================================================

/// Build CORS layer from configuration
fn build_cors_layer(cors_origins: &[String]) -> CorsLayer {
    if cors_origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers(Any)
    } else {
        let origins: Vec<HeaderValue> =
            cors_origins.iter().filter_map(|o| o.parse().ok()).collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers(Any)
    }
}

/// Build the application router
fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .route("/run-query", post(handlers::run_query))
        .route(
            "/run-query/{namespace}/{name}/{revision}",
            get(handlers::run_saved_query).post(handlers::run_saved_query),
        )
        .with_state(state.clone())
        .layer(build_cors_layer(&state.config.server.cors_allowed_origins))
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received, starting graceful shutdown");
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let app_config = load_config();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&app_config.server.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    info!("starting restweave server v{}", env!("CARGO_PKG_VERSION"));
    info!(
        listen_addr = %app_config.server.listen_addr,
        tenant = %app_config.server.tenant,
        mappings = app_config.mappings.len(),
        "configuration loaded"
    );

    let plugins = PluginRegistry::from_global();
    let client = Arc::new(ReqwestHttpClient::new(
        app_config.engine.max_connections_per_host,
    )?);
    let mappings = MappingResolver::new(&app_config.mappings, plugins.database());
    let engine = QueryEngine::new(
        client,
        mappings,
        plugins,
        &app_config.engine,
        app_config.server.tenant.clone(),
    );

    let state = Arc::new(AppState {
        engine,
        config: app_config.clone(),
        counters: Counters::default(),
    });

    let app = build_router(state);

    let addr: SocketAddr = app_config.server.listen_addr.parse()?;
    info!("server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    restweave::plugins::teardown();
    info!("server shutdown complete");
    Ok(())
}
