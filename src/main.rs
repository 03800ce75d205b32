//! Header sync service (v1)
//!
//! Keeps a traffic rule table in step with a user-edited header
//! configuration shared by several surfaces.
//!
//! # Architecture Overview
//!
//! ```text
//!   editing surfaces              ┌─────────────────────────────────────────┐
//!   (panel, CLI, processes)       │               HEADER SYNC               │
//!        │                        │                                         │
//!        │ POST /message ─────────┼─▶ api ──▶ store (working copy) ──┐     │
//!        │ state file write ──────┼─▶ store watcher ─────────────────┤     │
//!        │                        │                                  ▼     │
//!        │                        │          sync worker (one pass at a time)│
//!        │                        │              │                 │       │
//!        │                        │              ▼                 ▼       │
//!        │                        │         rule table       status fan-out │
//!        │ WS /status/stream ◀────┼──────────────────────────────┘        │
//!                                 │                                         │
//!                                 │ config · observability · lifecycle      │
//!                                 └─────────────────────────────────────────┘
//! ```

use clap::Parser;
use std::path::PathBuf;
use tokio::net::TcpListener;

use header_sync::api::ApiServer;
use header_sync::config::{load_config, ServiceConfig};
use header_sync::lifecycle::signals::wait_for_signal;
use header_sync::lifecycle::startup::open_storage;
use header_sync::lifecycle::{HeaderSync, Shutdown, StartupError};
use header_sync::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "header-sync")]
#[command(about = "Keeps installed header rules in step with the shared configuration", long_about = None)]
struct Cli {
    /// Service configuration file (TOML). Defaults apply when omitted.
    #[arg(short, long, env = "HEADER_SYNC_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ServiceConfig::default(),
    };

    logging::init(&config.observability);

    tracing::info!("header-sync v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        config_file = ?cli.config,
        storage = ?config.storage.kind,
        api_enabled = config.api.enabled,
        backend_timeout_ms = config.sync.backend_timeout_ms,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let kv = open_storage(&config.storage).map_err(StartupError::from)?;
    let shutdown = Shutdown::new();
    let app = HeaderSync::start(&config, kv, &shutdown).await;

    let api_task = if config.api.enabled {
        let listener = TcpListener::bind(&config.api.bind_address)
            .await
            .map_err(|source| StartupError::Bind {
                addr: config.api.bind_address.clone(),
                source,
            })?;
        let server = ApiServer::new(&config.api, app.app_state());
        let rx = shutdown.subscribe();
        Some(tokio::spawn(server.run(listener, rx)))
    } else {
        tracing::info!("Message API disabled");
        None
    };

    wait_for_signal().await;
    tracing::info!("Shutting down");
    shutdown.trigger();

    if let Some(task) = api_task {
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(error = %e, "API server failed"),
            Err(e) => tracing::error!(error = %e, "API server task panicked"),
        }
    }
    app.join().await;

    tracing::info!("Shutdown complete");
    Ok(())
}
