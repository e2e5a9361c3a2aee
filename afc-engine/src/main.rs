//! afc-engine - lead follow-up decision engine
//!
//! Serves the callable HTTP surface, drives the lifecycle hooks from the
//! change listener and runs the daily sweep at its configured times.

use std::net::SocketAddr;
use std::path::PathBuf;

use afc_common::config::{load_config, resolve_config_path};
use afc_common::db::init_database;
use afc_common::events::EventBus;
use afc_common::time::offset_from_minutes;
use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use afc_engine::listener::spawn_listener;
use afc_engine::sweep::SweepScheduler;
use afc_engine::{build_router, search_index, AppState};

/// Command-line arguments for afc-engine
#[derive(Parser, Debug)]
#[command(name = "afc-engine")]
#[command(about = "Automated follow-up cycle engine for the lead CRM")]
#[command(version)]
struct Args {
    /// Config file (overrides AFC_CONFIG and the per-user file)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides the config file)
    #[arg(short, long, env = "AFC_PORT")]
    port: Option<u16>,

    /// SQLite database file (overrides the config file)
    #[arg(short, long, env = "AFC_DATABASE")]
    database: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = resolve_config_path(args.config.as_deref());
    let mut config = load_config(config_path.as_deref()).context("Failed to load configuration")?;
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(database) = args.database {
        config.database_path = database;
    }

    // RUST_LOG wins over the configured level
    let level = config.logging.level.clone();
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            format!("afc_engine={level},afc_common={level},tower_http={level}").into()
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting afc-engine on port {}", config.port);
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    match &config_path {
        Some(path) => info!("Config: {}", path.display()),
        None => info!("Config: built-in defaults"),
    }
    info!("Database: {}", config.database_path.display());

    let db_pool = init_database(&config.database_path)
        .await
        .context("Failed to initialize database")?;
    info!("Database connection established");

    let event_bus = EventBus::new(config.store.event_capacity);
    let search_index = search_index::from_config(&config);

    let sweep_enabled = config.sweep.enabled;
    let sweep_times = config.sweep.parsed_times().context("Invalid sweep times")?;
    let local_offset = offset_from_minutes(config.local_utc_offset_minutes);
    let port = config.port;

    let state = AppState::new(db_pool, event_bus, config, search_index)
        .context("Failed to build engine state")?;

    spawn_listener(&state.event_bus, state.lifecycle.clone());
    info!("Change listener running");

    if sweep_enabled {
        SweepScheduler::new(
            state.sweep.clone(),
            sweep_times,
            local_offset,
            state.last_error.clone(),
        )
        .spawn();
        info!("Daily sweep scheduled (UTC offset {})", local_offset);
    } else {
        warn!("Daily sweep disabled by configuration");
    }

    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
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
                warn!("Failed to install terminate handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
