//! HTTP server for health and metrics endpoints
//!
//! Provides Kubernetes health probes:
//! - `/healthz` - Liveness probe (process is running)
//! - `/readyz` - Readiness probe (worker pools are running)
//!
//! Also provides two-stage shutdown handling for SIGTERM/SIGINT.

mod health;
pub mod metrics;
pub mod shutdown;

pub use health::{run_health_server, serve_health, ReadinessState};
pub use metrics::{create_metrics, ControllerMetrics, SharedMetrics};
pub use shutdown::{
    shutdown_channel, wait_for_signal, ShutdownController, ShutdownSignal, ShutdownStage,
};

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[path = "health_test.rs"]
mod health_tests;

#[cfg(test)]
#[path = "shutdown_test.rs"]
mod shutdown_tests;
