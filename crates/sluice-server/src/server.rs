//! `SluiceServer`: the consumer TCP listener plus the HTTP side endpoints.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use sluice_core::{EventDelivery, FilterInstaller, WorkerLifecycle};
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::health::{self, HealthResponse};
use crate::metrics::CONNECTIONS_REJECTED_TOTAL;
use crate::registry::{DestinationSummary, SubscriptionRegistry};
use crate::session::connection::run_connection;
use crate::session::{SessionContext, SessionStats};
use crate::shutdown::ShutdownCoordinator;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Registry, delivery backend and counters.
    pub ctx: SessionContext,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

/// The sluice server.
pub struct SluiceServer {
    config: ServerConfig,
    ctx: SessionContext,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
    metrics: Option<PrometheusHandle>,
}

impl SluiceServer {
    /// Create a server over the given backends.
    pub fn new(
        config: ServerConfig,
        delivery: Arc<dyn EventDelivery>,
        workers: Arc<dyn WorkerLifecycle>,
        filters: Arc<dyn FilterInstaller>,
        metrics: Option<PrometheusHandle>,
    ) -> Self {
        let ctx = SessionContext {
            registry: Arc::new(SubscriptionRegistry::new(workers, filters)),
            delivery,
            default_fetch_size: config.default_fetch_size,
            stats: Arc::new(SessionStats::default()),
        };
        Self {
            config,
            ctx,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
            metrics,
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            ctx: self.ctx.clone(),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
        };

        Router::new()
            .route("/health", get(health_handler))
            .route("/destinations", get(destinations_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(state)
    }

    /// Bind the consumer listener and start accepting connections.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, max_connections = self.config.max_connections, "session listener started");

        let handle = tokio::spawn(accept_loop(
            listener,
            self.ctx.clone(),
            self.config.clone(),
            self.shutdown.token(),
        ));
        Ok((local_addr, handle))
    }

    /// Bind the HTTP listener for `/health`, `/destinations` and `/metrics`.
    pub async fn listen_http(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let addr = format!("{}:{}", self.config.host, self.config.http_port);
        let listener = TcpListener::bind(&addr).await?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, "http listener started");

        let router = self.router();
        let token = self.shutdown.token();
        let handle = tokio::spawn(async move {
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(err) = result {
                warn!(error = %err, "http server failed");
            }
        });
        Ok((local_addr, handle))
    }

    /// Subscription registry.
    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.ctx.registry
    }

    /// Live connection counters.
    pub fn stats(&self) -> &Arc<SessionStats> {
        &self.ctx.stats
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// Accept consumers until cancelled, then wait for open connections.
async fn accept_loop(listener: TcpListener, ctx: SessionContext, config: ServerConfig, cancel: CancellationToken) {
    let permits = Arc::new(Semaphore::new(config.max_connections));
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(err) => {
                        warn!(error = %err, "accept failed");
                        continue;
                    }
                };
                let Ok(permit) = permits.clone().try_acquire_owned() else {
                    warn!(%peer, max_connections = config.max_connections, "connection limit reached, refusing");
                    counter!(CONNECTIONS_REJECTED_TOTAL).increment(1);
                    continue;
                };
                if let Err(err) = stream.set_nodelay(true) {
                    warn!(%peer, error = %err, "failed to set TCP_NODELAY");
                }

                let ctx = ctx.clone();
                let cancel = cancel.clone();
                let max_frame_length = config.max_frame_length;
                let _ = connections.spawn(async move {
                    run_connection(stream, peer.to_string(), ctx, max_frame_length, cancel).await;
                    drop(permit);
                });
            }
        }
    }

    info!(open = connections.len(), "session listener stopped, draining connections");
    let drain = async { while connections.join_next().await.is_some() {} };
    if tokio::time::timeout(config.shutdown_timeout(), drain).await.is_err() {
        warn!("connections did not close in time, aborting");
        connections.abort_all();
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let running = state
        .ctx
        .registry
        .snapshot()
        .await
        .iter()
        .filter(|d| d.running)
        .count();
    Json(health::health_check(
        state.start_time,
        state.ctx.stats.connections(),
        state.ctx.stats.bound(),
        running,
    ))
}

/// GET /destinations
async fn destinations_handler(State(state): State<AppState>) -> Json<Vec<DestinationSummary>> {
    Json(state.ctx.registry.snapshot().await)
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    match state.metrics {
        Some(handle) => (StatusCode::OK, crate::metrics::render(&handle)),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed".to_owned()),
    }
}
