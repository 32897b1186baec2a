//! # sluice-agent
//!
//! sluice server binary: loads settings, wires the in-memory event store and
//! local worker controller into the session server, and runs until ctrl-c.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use sluice_core::logging::{self, LogFormat};
use sluice_server::{ServerConfig, SluiceServer};
use sluice_settings::SluiceSettings;
use sluice_store::{LocalWorkerController, MemoryEventStore};

/// sluice change-stream distribution server.
#[derive(Parser, Debug)]
#[command(name = "sluice", about = "Change-stream session server")]
struct Cli {
    /// Settings file (defaults to `~/.sluice/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Session protocol port (overrides settings, 0 for auto-assign).
    #[arg(long)]
    port: Option<u16>,

    /// HTTP port for health and metrics (overrides settings).
    #[arg(long)]
    http_port: Option<u16>,

    /// Disable the HTTP listener.
    #[arg(long)]
    no_http: bool,

    /// Log filter directive, e.g. `debug` or `sluice_server=trace`.
    #[arg(long)]
    log_level: Option<String>,

    /// Emit logs as JSON.
    #[arg(long)]
    json_logs: bool,
}

impl Cli {
    /// Load settings from the chosen file and layer the flags on top.
    fn resolve_settings(&self) -> Result<SluiceSettings> {
        let path = self.config.clone().unwrap_or_else(sluice_settings::settings_path);
        let mut settings = sluice_settings::load_settings_from_path(&path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?;

        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(http_port) = self.http_port {
            settings.server.http_port = http_port;
        }
        if self.no_http {
            settings.server.http_enabled = false;
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
        if self.json_logs {
            settings.logging.format = LogFormat::Json;
        }
        Ok(settings)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    let settings = args.resolve_settings()?;

    logging::init_subscriber(&settings.logging.level, settings.logging.format);

    let metrics = match sluice_server::metrics::install_recorder() {
        Ok(handle) => Some(handle),
        Err(err) => {
            tracing::warn!(error = %err, "metrics recorder unavailable, /metrics disabled");
            None
        }
    };

    let store = Arc::new(MemoryEventStore::new());
    let workers = Arc::new(LocalWorkerController::new());
    let config = ServerConfig::from(&settings.server);
    let server = SluiceServer::new(config.clone(), store.clone(), workers, store, metrics);

    let mut handles = Vec::new();
    let (addr, handle) = server
        .listen()
        .await
        .context("Failed to bind session listener")?;
    handles.push(handle);
    tracing::info!("sluice listening on {addr}");

    if config.http_enabled {
        let (http_addr, http_handle) = server
            .listen_http()
            .await
            .context("Failed to bind HTTP listener")?;
        handles.push(http_handle);
        tracing::info!("health and metrics on http://{http_addr}");
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    server
        .shutdown()
        .graceful_shutdown(handles, Some(config.shutdown_timeout()))
        .await;
    tracing::info!("Shutdown complete");
    Ok(())
}
