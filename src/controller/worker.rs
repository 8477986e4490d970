//! Worker pools
//!
//! One pool per resource kind drains that kind's work queue. Each worker
//! handles one key to completion before asking for the next, so the queue's
//! in-flight exclusion is the only synchronization reconcilers rely on.

use super::error::ReconcileError;
use super::key::{ObjectKey, ResourceKind};
use super::queue::WorkQueue;
use crate::server::SharedMetrics;
use async_trait::async_trait;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Reconcile function for one resource kind
///
/// Implementations must be idempotent: they are called at least once per
/// change, possibly more, and must recompute desired state from the cache
/// rather than from whatever triggered the call.
#[async_trait]
pub trait Reconciler: Send + Sync {
    async fn reconcile(&self, key: &ObjectKey) -> Result<(), ReconcileError>;
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("{0} worker count must be at least 1")]
    InvalidWorkerCount(ResourceKind),
}

pub struct WorkerPool {
    kind: ResourceKind,
    workers: JoinSet<()>,
}

impl WorkerPool {
    /// Spawn `count` workers draining `queue`
    pub fn start(
        kind: ResourceKind,
        count: usize,
        queue: Arc<WorkQueue<ObjectKey>>,
        reconciler: Arc<dyn Reconciler>,
        metrics: Option<SharedMetrics>,
    ) -> Result<Self, PoolError> {
        if count == 0 {
            return Err(PoolError::InvalidWorkerCount(kind));
        }

        let mut workers = JoinSet::new();
        for id in 0..count {
            workers.spawn(run_worker(
                id,
                kind,
                Arc::clone(&queue),
                Arc::clone(&reconciler),
                metrics.clone(),
            ));
        }
        info!(kind = %kind, workers = count, "Worker pool started");

        Ok(Self { kind, workers })
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// Workers still running
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Wait for every worker to exit. Workers exit once their queue is shut down
    /// and their current reconciliation has finished.
    pub async fn drain(&mut self) {
        while let Some(result) = self.workers.join_next().await {
            if let Err(e) = result {
                if !e.is_cancelled() {
                    error!(kind = %self.kind, error = %e, "Worker task failed");
                }
            }
        }
        debug!(kind = %self.kind, "Worker pool drained");
    }

    /// Stop every worker immediately, abandoning in-flight reconciliations
    pub fn abort(&mut self) {
        if !self.workers.is_empty() {
            warn!(kind = %self.kind, remaining = self.workers.len(), "Aborting workers");
        }
        self.workers.abort_all();
    }
}

async fn run_worker(
    id: usize,
    kind: ResourceKind,
    queue: Arc<WorkQueue<ObjectKey>>,
    reconciler: Arc<dyn Reconciler>,
    metrics: Option<SharedMetrics>,
) {
    debug!(kind = %kind, worker = id, "Worker started");
    while let Some(key) = queue.get().await {
        process_key(kind, &queue, reconciler.as_ref(), metrics.as_ref(), key).await;
    }
    debug!(kind = %kind, worker = id, "Worker stopped");
}

async fn process_key(
    kind: ResourceKind,
    queue: &Arc<WorkQueue<ObjectKey>>,
    reconciler: &dyn Reconciler,
    metrics: Option<&SharedMetrics>,
    key: ObjectKey,
) {
    if let Some(metrics) = metrics {
        metrics.set_queue_depth(kind.as_str(), queue.len());
    }

    let started = Instant::now();
    let result = AssertUnwindSafe(reconciler.reconcile(&key))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| Err(ReconcileError::Panicked(panic_message(&*panic))));
    let elapsed = started.elapsed().as_secs_f64();

    let outcome = match result {
        Ok(()) => {
            debug!(kind = %kind, key = %key, "Reconciled");
            queue.forget(&key);
            "success"
        }
        Err(e) if e.is_retryable() => {
            warn!(
                kind = %kind,
                key = %key,
                error = %e,
                requeues = queue.num_requeues(&key),
                "Reconcile error (will retry)"
            );
            queue.add_rate_limited(key.clone());
            if let Some(metrics) = metrics {
                metrics.record_requeue(kind.as_str());
            }
            "retry"
        }
        Err(e) => {
            error!(kind = %kind, key = %key, error = %e, "Reconcile failed, not retrying");
            queue.forget(&key);
            "terminal"
        }
    };
    queue.done(&key);

    if let Some(metrics) = metrics {
        metrics.record_reconcile(kind.as_str(), outcome, elapsed);
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
#[path = "worker_test.rs"]
mod tests;
