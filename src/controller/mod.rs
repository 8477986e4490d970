pub mod client;
pub mod error;
pub mod experiment;
pub mod informer;
pub mod key;
pub mod manager;
pub mod queue;
pub mod rollout;
pub mod router;
pub mod service;
pub mod worker;

#[cfg(test)]
pub mod fixtures;

pub use error::ReconcileError;
pub use informer::{Informer, InformerError, Informers, ResourceEvent};
pub use key::{ObjectKey, ResourceKind};
pub use manager::{Manager, ManagerConfig, ManagerError, Reconcilers, WorkerCounts};
pub use queue::{BackoffConfig, WorkQueue};
pub use rollout::{current_selector, resolve_service_keys};
pub use worker::{PoolError, Reconciler, WorkerPool};
