//! depotgate-daemon - DepotGate service binary.
//!
//! Loads the TOML configuration, composes the core once, and serves the
//! HTTP API plus the agent-tool façade until SIGTERM or ctrl-c.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::signal::unix::{SignalKind, signal};
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use depotgate_core::Depot;
use depotgate_daemon::config::DaemonConfig;
use depotgate_daemon::routes;
use depotgate_daemon::state::{AppState, AuthSettings};

/// DepotGate - artifact staging and outbound logistics gate.
#[derive(Parser, Debug)]
#[command(name = "depotgate-daemon")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "depotgate.toml")]
    config: PathBuf,

    /// Override the bind host.
    #[arg(long)]
    host: Option<String>,

    /// Override the bind port.
    #[arg(long)]
    port: Option<u16>,

    /// Log filter when RUST_LOG is not set (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(args.log_level.clone())),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = DaemonConfig::load(&args.config)?;
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }

    let depot_config = config.depot_config();
    std::fs::create_dir_all(&depot_config.storage_base_path)
        .with_context(|| "creating storage base directory")?;
    for base in depot_config.sink_bases_by_scheme.values() {
        std::fs::create_dir_all(base).with_context(|| "creating sink base directory")?;
    }

    let depot = Arc::new(Depot::new(&depot_config).context("constructing depot")?);
    let state = AppState::new(
        depot,
        AuthSettings {
            api_key: config.api_key.clone(),
            allow_insecure_dev: config.allow_insecure_dev,
        },
        Duration::from_secs(config.request_timeout_secs),
    );

    let router = routes::router(state);
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;

    info!(
        %addr,
        tenant_id = %config.tenant_id,
        auth = if config.allow_insecure_dev { "disabled" } else { "api-key" },
        "depotgate daemon listening"
    );

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving")?;

    info!("depotgate daemon stopped");
    Ok(())
}

/// Resolves when SIGTERM or ctrl-c arrives.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(err) => {
            tracing::warn!(%err, "sigterm handler unavailable; ctrl-c only");
            let _ = ctrl_c.await;
            return;
        }
    };

    tokio::select! {
        _ = ctrl_c => {}
        _ = sigterm.recv() => {}
    }
    info!("shutdown signal received");
}
