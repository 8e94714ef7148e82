//! gopher-burrow - Image Gopher catalog service
//!
//! Receives scan reports from gatherers and serves the catalog to the web
//! portal over HTTP REST + SSE.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use gopher_common::events::EventBus;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gopher_burrow::config::IngestSettings;
use gopher_burrow::services::{FsContentSource, GathererProbe, MaintenanceSweeper};
use gopher_burrow::AppState;

/// Command-line arguments for gopher-burrow
#[derive(Parser, Debug)]
#[command(name = "gopher-burrow")]
#[command(about = "Image Gopher catalog service")]
#[command(version)]
struct Args {
    /// Configuration file (overrides GOPHER_BURROW_CONFIG)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides server.port)
    #[arg(short, long, env = "GOPHER_BURROW_PORT")]
    port: Option<u16>,

    /// Catalog database file (overrides database.filename)
    #[arg(short, long, env = "GOPHER_BURROW_DATABASE")]
    database: Option<PathBuf>,

    /// Log level (overrides logging.log_level)
    #[arg(short, long, env = "GOPHER_BURROW_LOG_LEVEL")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let (mut config, config_path) = gopher_common::config::resolve_burrow_config(args.config.as_deref())
        .context("Failed to load configuration")?;
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(database) = args.database {
        config.database.filename = Some(database);
    }
    if let Some(level) = args.log_level {
        config.logging.log_level = level;
    }
    config.validate().context("Invalid configuration")?;

    let default_filter = format!(
        "gopher_burrow={level},gopher_common={level},tower_http=info",
        level = config.logging.log_level.to_lowercase()
    );
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting Image Gopher burrow v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );
    match &config_path {
        Some(path) => info!("Configuration: {}", path.display()),
        None => info!("Configuration: compiled defaults"),
    }

    let settings = IngestSettings::from(&config);

    let db_path = config.database_path();
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create data directory {}", parent.display()))?;
    }
    info!("Database: {}", db_path.display());
    let db_pool = gopher_burrow::db::init_database_pool(&db_path, settings.lock_timeout)
        .await
        .context("Failed to open catalog database")?;

    if config.gatherer.wait_for_ok {
        // The catalog works without a gatherer; only log the outcome
        GathererProbe::new(&config.gatherer).wait_until_ready().await;
    }

    let event_bus = EventBus::new(1000);
    let state = AppState::new(
        db_pool,
        event_bus.clone(),
        &settings,
        Arc::new(FsContentSource::new()),
    );

    let shutdown = CancellationToken::new();
    let sweeper = Arc::new(MaintenanceSweeper::new(
        state.store.clone(),
        state.tags.clone(),
        event_bus,
        settings.clone(),
    ));
    let sweeper_handle = sweeper.run(shutdown.clone());

    let app = gopher_burrow::build_router(state);

    let host: std::net::IpAddr = config
        .server
        .host
        .parse()
        .with_context(|| format!("Invalid server.host '{}'", config.server.host))?;
    let addr = SocketAddr::new(host, config.server.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    shutdown.cancel();
    if let Err(e) = sweeper_handle.await {
        warn!("Maintenance sweeper ended abnormally: {}", e);
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received terminate signal, shutting down"),
    }
}
