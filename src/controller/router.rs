//! Event router
//!
//! Translates informer notifications into work queue keys, including the
//! cross-kind cases (a Service change wakes the Rollouts routing through it,
//! a ReplicaSet change wakes its owning Rollout or Experiment).

use super::informer::{Informers, ResourceEvent};
use super::key::{ObjectKey, ResourceKind};
use super::queue::WorkQueue;
use super::rollout::{resolve_service_keys, rollouts_for_service};
use crate::crd::experiment::Experiment;
use crate::crd::rollout::{Rollout, MANAGED_BY_ROLLOUTS_ANNOTATION};
use k8s_openapi::api::apps::v1::ReplicaSet;
use k8s_openapi::api::core::v1::Service;
use kube::runtime::reflector::Store;
use kube::{Resource, ResourceExt};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::trace;

/// One work queue per resource kind
#[derive(Clone)]
pub struct Queues {
    pub rollouts: Arc<WorkQueue<ObjectKey>>,
    pub experiments: Arc<WorkQueue<ObjectKey>>,
    pub services: Arc<WorkQueue<ObjectKey>>,
}

impl Queues {
    pub fn new() -> Self {
        Self {
            rollouts: Arc::new(WorkQueue::new(ResourceKind::Rollout.as_str())),
            experiments: Arc::new(WorkQueue::new(ResourceKind::Experiment.as_str())),
            services: Arc::new(WorkQueue::new(ResourceKind::Service.as_str())),
        }
    }

    pub fn get(&self, kind: ResourceKind) -> &Arc<WorkQueue<ObjectKey>> {
        match kind {
            ResourceKind::Rollout => &self.rollouts,
            ResourceKind::Experiment => &self.experiments,
            ResourceKind::Service => &self.services,
        }
    }

    pub fn shut_down(&self) {
        self.rollouts.shut_down();
        self.experiments.shut_down();
        self.services.shut_down();
    }
}

impl Default for Queues {
    fn default() -> Self {
        Self::new()
    }
}

pub struct EventRouter {
    queues: Queues,
    rollouts: Store<Rollout>,
}

impl EventRouter {
    pub fn new(queues: Queues, rollouts: Store<Rollout>) -> Self {
        Self { queues, rollouts }
    }

    /// Subscribe to every informer in `informers`
    pub fn register(self: &Arc<Self>, informers: &Informers) {
        let router = Arc::clone(self);
        informers
            .rollouts
            .add_event_handler(move |event| router.on_rollout(event));
        let router = Arc::clone(self);
        informers
            .services
            .add_event_handler(move |event| router.on_service(event));
        let router = Arc::clone(self);
        informers
            .replicasets
            .add_event_handler(move |event| router.on_replicaset(event));
        let router = Arc::clone(self);
        informers
            .experiments
            .add_event_handler(move |event| router.on_experiment(event));
    }

    pub fn on_rollout(&self, event: &ResourceEvent<Rollout>) {
        let rollout = event.object();
        self.enqueue(ResourceKind::Rollout, ObjectKey::from_obj(rollout.as_ref()));
        if event.is_delete() {
            // Lets the service reconciler release what the rollout claimed
            for key in resolve_service_keys(rollout).unwrap_or_default() {
                self.enqueue(ResourceKind::Service, key);
            }
        }
    }

    pub fn on_service(&self, event: &ResourceEvent<Service>) {
        let service = event.object();
        self.enqueue(ResourceKind::Service, ObjectKey::from_obj(service.as_ref()));
        // Read-only O(n) scan of the rollout cache under its read lock
        for key in rollout_keys_for_service(service, &self.rollouts.state()) {
            self.enqueue(ResourceKind::Rollout, key);
        }
    }

    pub fn on_replicaset(&self, event: &ResourceEvent<ReplicaSet>) {
        let replicaset = event.object();
        for key in owner_keys(replicaset.as_ref(), "Rollout") {
            self.enqueue(ResourceKind::Rollout, key);
        }
        for key in owner_keys(replicaset.as_ref(), "Experiment") {
            self.enqueue(ResourceKind::Experiment, key);
        }
    }

    pub fn on_experiment(&self, event: &ResourceEvent<Experiment>) {
        let experiment = event.object();
        self.enqueue(
            ResourceKind::Experiment,
            ObjectKey::from_obj(experiment.as_ref()),
        );
        for key in owner_keys(experiment.as_ref(), "Rollout") {
            self.enqueue(ResourceKind::Rollout, key);
        }
    }

    fn enqueue(&self, kind: ResourceKind, key: ObjectKey) {
        trace!(kind = %kind, key = %key, "Enqueue");
        self.queues.get(kind).add(key);
    }
}

/// Rollouts to wake for a Service change
///
/// Every cached rollout that references the service, plus the rollout named
/// in its managed-by annotation (which may no longer reference it).
pub fn rollout_keys_for_service(
    service: &Service,
    rollouts: &[Arc<Rollout>],
) -> BTreeSet<ObjectKey> {
    let service_key = ObjectKey::from_obj(service);
    let mut keys: BTreeSet<ObjectKey> =
        rollouts_for_service(rollouts.iter().map(Arc::as_ref), &service_key)
            .into_iter()
            .collect();
    if let Some(owner) = service.annotations().get(MANAGED_BY_ROLLOUTS_ANNOTATION) {
        keys.insert(ObjectKey::new(service_key.namespace, owner.clone()));
    }
    keys
}

/// Keys of `obj`'s owners of the given kind, in `obj`'s namespace
pub fn owner_keys<K: Resource>(obj: &K, owner_kind: &str) -> Vec<ObjectKey> {
    let namespace = obj.namespace().unwrap_or_default();
    obj.owner_references()
        .iter()
        .filter(|owner| owner.kind == owner_kind)
        .map(|owner| ObjectKey::new(namespace.clone(), owner.name.clone()))
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[path = "router_test.rs"]
mod tests;
