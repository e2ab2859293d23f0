//! Metrics Module
//!
//! Counters the core increments plus the HTTP observation surface: a small
//! router serving a health check and a JSON snapshot of the counter set.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::cache::CacheStore;
use crate::config::MetricsConfig;

// == Server Metrics ==
/// Connection and command counters, incremented from the data path.
#[derive(Debug, Default)]
pub struct ServerMetrics {
    connections_total: AtomicU64,
    active_connections: AtomicU64,
    commands_processed: AtomicU64,
}

impl ServerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn command_processed(&self) {
        self.commands_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connections_total(&self) -> u64 {
        self.connections_total.load(Ordering::Relaxed)
    }

    pub fn active_connections(&self) -> u64 {
        self.active_connections.load(Ordering::Relaxed)
    }

    pub fn commands_processed(&self) -> u64 {
        self.commands_processed.load(Ordering::Relaxed)
    }
}

// == Admin State ==
/// Shared state for the observation endpoints.
#[derive(Clone)]
pub struct AdminState {
    pub cache: Arc<RwLock<CacheStore>>,
    pub metrics: Arc<ServerMetrics>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Serialize)]
struct MetricsResponse {
    used_memory: u64,
    max_memory: u64,
    entries: usize,
    keyspace_hits: u64,
    keyspace_misses: u64,
    hit_rate: f64,
    evicted_keys: u64,
    expired_keys: u64,
    connections_total: u64,
    active_connections: u64,
    commands_processed: u64,
}

// == Router ==
/// Builds the admin router: `GET /health` and `GET <path>`.
pub fn create_admin_router(state: AdminState, metrics_path: &str) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route(metrics_path, get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse { status: "healthy" })
}

async fn metrics_handler(State(state): State<AdminState>) -> Json<MetricsResponse> {
    let cache = state.cache.read().await;
    let stats = cache.stats();

    Json(MetricsResponse {
        used_memory: cache.size_bytes(),
        max_memory: cache.max_bytes(),
        entries: cache.count(),
        keyspace_hits: stats.hits,
        keyspace_misses: stats.misses,
        hit_rate: stats.hit_rate(),
        evicted_keys: stats.evictions,
        expired_keys: stats.expired,
        connections_total: state.metrics.connections_total(),
        active_connections: state.metrics.active_connections(),
        commands_processed: state.metrics.commands_processed(),
    })
}

// == Listener ==
/// Spawns the observation listener; it drains on the shutdown signal.
pub fn spawn_metrics_server(
    cfg: MetricsConfig,
    state: AdminState,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let addr = format!("0.0.0.0:{}", cfg.port);
        let listener = match tokio::net::TcpListener::bind(&addr).await {
            Ok(listener) => listener,
            Err(e) => {
                error!(%addr, error = %e, "failed to bind metrics listener");
                return;
            }
        };

        info!(%addr, path = %cfg.path, "metrics listener started");
        let app = create_admin_router(state, &cfg.path);
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.changed().await;
            })
            .await;

        if let Err(e) = result {
            error!(error = %e, "metrics listener failed");
        }
    })
}
