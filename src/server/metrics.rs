//! Prometheus metrics for the controller manager
//!
//! Exposed on `/metrics` by the health server.

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;

pub type SharedMetrics = Arc<ControllerMetrics>;

pub struct ControllerMetrics {
    registry: Registry,
    reconcile_total: IntCounterVec,
    reconcile_duration: HistogramVec,
    queue_depth: IntGaugeVec,
    requeues_total: IntCounterVec,
}

impl ControllerMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let reconcile_total = IntCounterVec::new(
            Opts::new(
                "rollouts_controller_reconcile_total",
                "Reconciliations by resource kind and result",
            ),
            &["kind", "result"],
        )?;
        let reconcile_duration = HistogramVec::new(
            HistogramOpts::new(
                "rollouts_controller_reconcile_duration_seconds",
                "Time spent in one reconciliation",
            )
            .buckets(vec![0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
            &["kind"],
        )?;
        let queue_depth = IntGaugeVec::new(
            Opts::new(
                "rollouts_controller_queue_depth",
                "Keys waiting in the work queue",
            ),
            &["kind"],
        )?;
        let requeues_total = IntCounterVec::new(
            Opts::new(
                "rollouts_controller_requeues_total",
                "Keys re-queued with backoff after a retryable error",
            ),
            &["kind"],
        )?;

        registry.register(Box::new(reconcile_total.clone()))?;
        registry.register(Box::new(reconcile_duration.clone()))?;
        registry.register(Box::new(queue_depth.clone()))?;
        registry.register(Box::new(requeues_total.clone()))?;

        Ok(Self {
            registry,
            reconcile_total,
            reconcile_duration,
            queue_depth,
            requeues_total,
        })
    }

    /// `result` is one of `success`, `retry` or `terminal`
    pub fn record_reconcile(&self, kind: &str, result: &str, duration_secs: f64) {
        self.reconcile_total
            .with_label_values(&[kind, result])
            .inc();
        self.reconcile_duration
            .with_label_values(&[kind])
            .observe(duration_secs);
    }

    pub fn set_queue_depth(&self, kind: &str, depth: usize) {
        self.queue_depth
            .with_label_values(&[kind])
            .set(i64::try_from(depth).unwrap_or(i64::MAX));
    }

    pub fn record_requeue(&self, kind: &str) {
        self.requeues_total.with_label_values(&[kind]).inc();
    }

    pub fn reconcile_count(&self, kind: &str, result: &str) -> u64 {
        self.reconcile_total.with_label_values(&[kind, result]).get()
    }

    /// Render every registered metric in the Prometheus text format
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// Create the shared metrics registry
pub fn create_metrics() -> Result<SharedMetrics, prometheus::Error> {
    Ok(Arc::new(ControllerMetrics::new()?))
}
