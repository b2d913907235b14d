//! DuraGraph server binary
//!
//! Serves the run/thread API and the worker protocol over HTTP.

use anyhow::Context;
use clap::Parser;
use duragraph_server::api::{create_router, AppState};
use duragraph_server::config::{load_assistants, ServerConfig};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "duragraph-server", version, about = "Durable graph workflow server")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, env = "CONFIG_PATH")]
    config: Option<PathBuf>,

    /// Override `server.host`
    #[arg(long, env = "DURAGRAPH_HOST")]
    host: Option<String>,

    /// Override `server.port`
    #[arg(long, env = "DURAGRAPH_PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let mut config = ServerConfig::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    config.validate().context("validating configuration")?;

    tracing::info!(
        name = %config.server.name,
        workers_enabled = config.worker.enabled,
        max_iterations = config.engine.max_iterations,
        "configuration loaded"
    );

    let state = AppState::in_memory(&config);

    if let Some(path) = &config.assistants.path {
        let definitions = load_assistants(path)
            .with_context(|| format!("loading assistants from {}", path.display()))?;
        let count = state.assistants.preload(definitions).await?;
        tracing::info!(count, path = %path.display(), "assistants preloaded");
    }

    if config.worker.enabled {
        let workers = state.workers.clone();
        let mut interval = tokio::time::interval(config.cleanup_interval());
        tokio::spawn(async move {
            loop {
                interval.tick().await;
                let marked = workers.cleanup_stale_workers();
                if !marked.is_empty() {
                    tracing::info!(count = marked.len(), "stale workers marked offline");
                }
            }
        });
    }

    let addr = config.socket_addr()?;
    let app = create_router(state);

    tracing::info!("Starting DuraGraph server on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("DuraGraph server shut down gracefully");
    Ok(())
}

/// Signal for graceful shutdown (Ctrl-C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for CTRL-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received CTRL-C signal, shutting down");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM signal, shutting down");
        }
    }
}
