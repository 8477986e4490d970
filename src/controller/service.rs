//! Default Service reconciler
//!
//! Releases Services whose managing Rollout is gone or no longer routes
//! through them, so they can be claimed again.

use super::client::ObjectUpdater;
use super::error::ReconcileError;
use super::key::ObjectKey;
use super::rollout::resolve_service_keys;
use super::worker::Reconciler;
use crate::crd::rollout::{Rollout, DEFAULT_ROLLOUT_UNIQUE_LABEL_KEY, MANAGED_BY_ROLLOUTS_ANNOTATION};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Service;
use kube::runtime::reflector::Store;
use kube::ResourceExt;
use std::sync::Arc;
use tracing::{debug, info};

pub struct Context {
    pub services: Store<Service>,
    pub rollouts: Store<Rollout>,
    pub updater: Arc<dyn ObjectUpdater<Service>>,
}

pub struct ServiceReconciler {
    ctx: Arc<Context>,
}

impl ServiceReconciler {
    pub fn new(ctx: Arc<Context>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Reconciler for ServiceReconciler {
    async fn reconcile(&self, key: &ObjectKey) -> Result<(), ReconcileError> {
        reconcile(key, &self.ctx).await
    }
}

pub async fn reconcile(key: &ObjectKey, ctx: &Context) -> Result<(), ReconcileError> {
    let Some(service) = ctx.services.get(&key.object_ref()) else {
        debug!(service = %key, "Service not in cache, skipping");
        return Ok(());
    };
    let Some(owner) = service.annotations().get(MANAGED_BY_ROLLOUTS_ANNOTATION) else {
        return Ok(());
    };

    let owner_key = ObjectKey::new(key.namespace.clone(), owner.clone());
    if still_referenced(ctx.rollouts.get(&owner_key.object_ref()).as_deref(), key) {
        return Ok(());
    }

    release_service(&service, ctx.updater.as_ref()).await?;
    info!(service = %key, rollout = %owner_key, "Released Service");
    Ok(())
}

/// Drop the managed-by annotation and the revision pin from `service`
pub(crate) async fn release_service(
    service: &Service,
    updater: &dyn ObjectUpdater<Service>,
) -> Result<(), ReconcileError> {
    let mut released = service.clone();
    released.annotations_mut().remove(MANAGED_BY_ROLLOUTS_ANNOTATION);
    if let Some(selector) = released
        .spec
        .as_mut()
        .and_then(|spec| spec.selector.as_mut())
    {
        selector.remove(DEFAULT_ROLLOUT_UNIQUE_LABEL_KEY);
    }
    updater.update(&released).await
}

/// Whether `owner` still routes through `service`
///
/// An owner whose strategy is invalid keeps its services until it is fixed.
fn still_referenced(owner: Option<&Rollout>, service: &ObjectKey) -> bool {
    match owner {
        None => false,
        Some(rollout) => resolve_service_keys(rollout)
            .map(|keys| keys.contains(service))
            .unwrap_or(true),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[path = "service_test.rs"]
mod tests;
