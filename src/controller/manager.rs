//! Controller manager
//!
//! Owns the informers, the per-kind work queues and worker pools, and the
//! health/metrics endpoint. `run` wires them together and implements the
//! two-stage shutdown: stop handing out work, drain within the grace period,
//! abort whatever is left.

use super::client::KubeUpdater;
use super::experiment::{self, ExperimentReconciler};
use super::informer::{InformerError, Informers};
use super::key::ResourceKind;
use super::rollout::{self, RolloutReconciler};
use super::router::{EventRouter, Queues};
use super::service::{self, ServiceReconciler};
use super::worker::{PoolError, Reconciler, WorkerPool};
use crate::server::{create_metrics, run_health_server, ReadinessState, SharedMetrics, ShutdownSignal};
use kube::Client;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Default port for health and metrics endpoints
pub const DEFAULT_METRICS_PORT: u16 = 8090;

pub const DEFAULT_ROLLOUT_THREADS: usize = 10;
pub const DEFAULT_EXPERIMENT_THREADS: usize = 10;
pub const DEFAULT_SERVICE_THREADS: usize = 10;

/// Default time in-flight reconciliations get to finish on shutdown
pub const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 30;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerConfig {
    /// Port of the health/metrics server; `None` disables the server
    pub metrics_port: Option<u16>,
    pub shutdown_grace: Duration,
    /// Restrict watches to one namespace
    pub namespace: Option<String>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            metrics_port: Some(DEFAULT_METRICS_PORT),
            shutdown_grace: Duration::from_secs(DEFAULT_SHUTDOWN_GRACE_SECS),
            namespace: None,
        }
    }
}

/// Worker pool size per resource kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerCounts {
    pub rollout: usize,
    pub experiment: usize,
    pub service: usize,
}

impl Default for WorkerCounts {
    fn default() -> Self {
        Self {
            rollout: DEFAULT_ROLLOUT_THREADS,
            experiment: DEFAULT_EXPERIMENT_THREADS,
            service: DEFAULT_SERVICE_THREADS,
        }
    }
}

impl WorkerCounts {
    pub fn get(&self, kind: ResourceKind) -> usize {
        match kind {
            ResourceKind::Rollout => self.rollout,
            ResourceKind::Experiment => self.experiment,
            ResourceKind::Service => self.service,
        }
    }

    /// Every kind needs at least one worker
    pub fn validate(&self) -> Result<(), PoolError> {
        for kind in KINDS {
            if self.get(kind) == 0 {
                return Err(PoolError::InvalidWorkerCount(kind));
            }
        }
        Ok(())
    }
}

const KINDS: [ResourceKind; 3] = [
    ResourceKind::Rollout,
    ResourceKind::Experiment,
    ResourceKind::Service,
];

/// Reconcile function registered per resource kind
#[derive(Clone)]
pub struct Reconcilers {
    pub rollout: Arc<dyn Reconciler>,
    pub experiment: Arc<dyn Reconciler>,
    pub service: Arc<dyn Reconciler>,
}

impl Reconcilers {
    /// Default reconcilers reading from `informers` and writing through `client`
    pub fn from_client(client: Client, informers: &Informers) -> Self {
        let updater = Arc::new(KubeUpdater::new(client));

        let rollout_ctx = rollout::Context {
            rollouts: informers.rollouts.store(),
            services: informers.services.store(),
            rollout_updater: updater.clone(),
            service_updater: updater.clone(),
        };
        let service_ctx = service::Context {
            services: informers.services.store(),
            rollouts: informers.rollouts.store(),
            updater: updater.clone(),
        };
        let experiment_ctx = experiment::Context {
            experiments: informers.experiments.store(),
            updater,
        };

        Self {
            rollout: Arc::new(RolloutReconciler::new(Arc::new(rollout_ctx))),
            experiment: Arc::new(ExperimentReconciler::new(Arc::new(experiment_ctx))),
            service: Arc::new(ServiceReconciler::new(Arc::new(service_ctx))),
        }
    }

    pub fn get(&self, kind: ResourceKind) -> &Arc<dyn Reconciler> {
        match kind {
            ResourceKind::Rollout => &self.rollout,
            ResourceKind::Experiment => &self.experiment,
            ResourceKind::Service => &self.service,
        }
    }
}

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Informer(#[from] InformerError),

    #[error("Failed to create metrics registry: {0}")]
    Metrics(#[from] prometheus::Error),
}

pub struct Manager {
    config: ManagerConfig,
    client: Option<Client>,
    informers: Informers,
    reconcilers: Reconcilers,
    queues: Queues,
    metrics: SharedMetrics,
    readiness: ReadinessState,
}

impl Manager {
    /// Create the manager and subscribe its event router to `informers`
    ///
    /// Without [`Manager::with_client`] the informers are expected to be
    /// driven by the caller (see [`Informer::run_stream`](super::informer::Informer::run_stream)).
    pub fn new(
        config: ManagerConfig,
        informers: Informers,
        reconcilers: Reconcilers,
    ) -> Result<Self, ManagerError> {
        let queues = Queues::new();
        let router = Arc::new(EventRouter::new(queues.clone(), informers.rollouts.store()));
        router.register(&informers);

        Ok(Self {
            config,
            client: None,
            informers,
            reconcilers,
            queues,
            metrics: create_metrics()?,
            readiness: ReadinessState::new(),
        })
    }

    /// Watch the cluster behind `client` when `run` starts
    pub fn with_client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    pub fn informers(&self) -> &Informers {
        &self.informers
    }

    pub fn queues(&self) -> &Queues {
        &self.queues
    }

    pub fn metrics(&self) -> SharedMetrics {
        self.metrics.clone()
    }

    pub fn readiness(&self) -> ReadinessState {
        self.readiness.clone()
    }

    /// Run until `shutdown` fires
    ///
    /// Worker counts are checked before anything is started. Returns `Ok`
    /// after a clean (or forced) shutdown.
    pub async fn run(self, workers: WorkerCounts, shutdown: ShutdownSignal) -> Result<(), ManagerError> {
        workers.validate()?;

        let health = self.spawn_health_server(&shutdown);

        if let Some(client) = &self.client {
            self.informers
                .start(client, self.config.namespace.as_deref(), &shutdown)?;
        }

        info!("Waiting for informer caches to sync");
        tokio::select! {
            biased;
            _ = shutdown.wait() => {
                info!("Shutdown requested before caches synced");
                self.queues.shut_down();
                return Ok(());
            }
            synced = self.informers.wait_for_sync() => synced?,
        }

        let mut pools = Vec::with_capacity(KINDS.len());
        for kind in KINDS {
            pools.push(WorkerPool::start(
                kind,
                workers.get(kind),
                Arc::clone(self.queues.get(kind)),
                Arc::clone(self.reconcilers.get(kind)),
                Some(self.metrics.clone()),
            )?);
        }

        self.readiness.set_ready();
        info!(
            rollout_workers = workers.rollout,
            experiment_workers = workers.experiment,
            service_workers = workers.service,
            "Controller manager started"
        );

        shutdown.wait().await;
        self.readiness.set_not_ready();
        self.queues.shut_down();
        info!(grace = ?self.config.shutdown_grace, "Draining worker pools");

        let drain = async {
            for pool in pools.iter_mut() {
                pool.drain().await;
            }
        };
        tokio::select! {
            _ = drain => info!("Worker pools drained"),
            _ = tokio::time::sleep(self.config.shutdown_grace) => {
                warn!("Shutdown grace period elapsed, aborting workers");
            }
            _ = shutdown.wait_forced() => warn!("Forced shutdown, aborting workers"),
        }
        for pool in pools.iter_mut() {
            pool.abort();
        }

        if let Some(health) = health {
            health.abort();
        }
        info!("Controller manager stopped");
        Ok(())
    }

    fn spawn_health_server(&self, shutdown: &ShutdownSignal) -> Option<JoinHandle<()>> {
        let port = self.config.metrics_port?;
        let readiness = self.readiness.clone();
        let metrics = self.metrics.clone();
        let shutdown = shutdown.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = run_health_server(port, readiness, metrics, shutdown).await {
                error!(port = port, error = %e, "Health server failed");
            }
        }))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[path = "manager_test.rs"]
mod tests;
