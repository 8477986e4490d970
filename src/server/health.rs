//! Health check and metrics endpoints for Kubernetes
//!
//! - `/healthz` - Liveness: Is the process alive?
//! - `/readyz` - Readiness: Are the worker pools running?
//! - `/metrics` - Prometheus metrics in text format

use crate::server::metrics::SharedMetrics;
use crate::server::shutdown::ShutdownSignal;
use axum::{
    extract::State,
    http::{header::CONTENT_TYPE, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

/// Shared state for readiness tracking
///
/// The manager sets this to ready once caches are synced and worker pools
/// are running, and back to not ready when shutdown begins.
#[derive(Debug, Clone)]
pub struct ReadinessState {
    ready: Arc<AtomicBool>,
}

impl ReadinessState {
    /// Create a new readiness state (initially not ready)
    pub fn new() -> Self {
        Self {
            ready: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn set_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    /// Mark the controller as not ready (e.g., during shutdown)
    ///
    /// This causes the readiness probe to return 503.
    pub fn set_not_ready(&self) {
        self.ready.store(false, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

impl Default for ReadinessState {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
struct ServerState {
    readiness: ReadinessState,
    metrics: SharedMetrics,
}

/// Liveness probe handler
///
/// Always returns 200 OK - if this responds, the process is alive.
async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn readyz(State(state): State<ServerState>) -> StatusCode {
    if state.readiness.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn metrics(State(state): State<ServerState>) -> impl IntoResponse {
    match state.metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to encode metrics: {}", e),
        )
            .into_response(),
    }
}

fn build_router(readiness: ReadinessState, metrics: SharedMetrics) -> Router {
    let state = ServerState { readiness, metrics };

    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(self::metrics))
        .with_state(state)
}

/// Run the health server on `port` until the first shutdown stage
pub async fn run_health_server(
    port: u16,
    readiness: ReadinessState,
    metrics: SharedMetrics,
    shutdown: ShutdownSignal,
) -> Result<(), std::io::Error> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    // Log after successful bind - server is actually listening
    info!(port = %port, "Health and metrics server listening");

    serve_health(listener, readiness, metrics, shutdown).await
}

/// Serve the health endpoints on an already bound listener
pub async fn serve_health(
    listener: TcpListener,
    readiness: ReadinessState,
    metrics: SharedMetrics,
    shutdown: ShutdownSignal,
) -> Result<(), std::io::Error> {
    let app = build_router(readiness, metrics);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.wait().await })
        .await?;
    info!("Health and metrics server stopped");
    Ok(())
}
