use crate::controller::client::ObjectUpdater;
use crate::controller::error::ReconcileError;
use crate::controller::key::ObjectKey;
use crate::controller::service::release_service;
use crate::controller::worker::Reconciler;
use crate::crd::rollout::{Rollout, RolloutStatus, MANAGED_BY_ROLLOUTS_ANNOTATION};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Service;
use kube::runtime::reflector::Store;
use kube::ResourceExt;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::traffic::{observe_traffic, resolve_service_keys};
use super::validation::validate_rollout;

pub struct Context {
    pub rollouts: Store<Rollout>,
    pub services: Store<Service>,
    pub rollout_updater: Arc<dyn ObjectUpdater<Rollout>>,
    pub service_updater: Arc<dyn ObjectUpdater<Service>>,
}

/// Default Rollout reconciler
///
/// Keeps the traffic-routing facts of a Rollout current: claims the Services it
/// routes through and mirrors their live selector values into the status.
/// Deciding when to move traffic is left to the strategy logic.
pub struct RolloutReconciler {
    ctx: Arc<Context>,
}

impl RolloutReconciler {
    pub fn new(ctx: Arc<Context>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Reconciler for RolloutReconciler {
    async fn reconcile(&self, key: &ObjectKey) -> Result<(), ReconcileError> {
        reconcile(key, &self.ctx).await
    }
}

/// Reconcile one Rollout
///
/// 1. Looks the Rollout up in the cache (gone means deleted, nothing to do)
/// 2. Validates the spec; invalid specs are reported on the status and are terminal
/// 3. Releases Services it still claims but no longer references
/// 4. Requires every referenced Service to be cached, and claims it
/// 5. Writes the observed selectors to the status if they changed
pub async fn reconcile(key: &ObjectKey, ctx: &Context) -> Result<(), ReconcileError> {
    let Some(rollout) = ctx.rollouts.get(&key.object_ref()) else {
        debug!(rollout = %key, "Rollout not in cache, skipping");
        return Ok(());
    };

    let variant = match validate_rollout(&rollout) {
        Ok(variant) => variant,
        Err(message) => {
            warn!(rollout = %key, error = %message, "Invalid Rollout spec");
            report_invalid_spec(&rollout, &message, ctx).await;
            return Err(ReconcileError::ValidationError(message));
        }
    };
    debug!(rollout = %key, strategy = variant.name(), "Reconciling Rollout");

    let service_keys = resolve_service_keys(&rollout)
        .map_err(|e| ReconcileError::ValidationError(e.to_string()))?;
    release_dropped_services(key, &service_keys, ctx).await?;
    for service_key in &service_keys {
        let service = ctx
            .services
            .get(&service_key.object_ref())
            .ok_or_else(|| ReconcileError::ServiceNotFound(service_key.clone()))?;
        claim_service(&service, &key.name, ctx).await?;
    }

    let observed = observe_traffic(&rollout, &ctx.services)
        .map_err(|e| ReconcileError::ValidationError(e.to_string()))?;
    let desired = RolloutStatus {
        observed_generation: rollout.metadata.generation,
        message: None,
        ..observed
    };

    if rollout.status.as_ref() != Some(&desired) {
        info!(
            rollout = %key,
            active = ?desired.active_selector,
            preview = ?desired.preview_selector,
            canary = ?desired.canary_selector,
            stable = ?desired.stable_selector,
            "Updating Rollout traffic status"
        );
        let mut updated = (*rollout).clone();
        updated.status = Some(desired);
        ctx.rollout_updater.update_status(&updated).await?;
    }

    Ok(())
}

/// Mark `service` as routed by `rollout_name`
///
/// A Service claimed by a different Rollout is a conflict; it is released by
/// the Service reconciler once that Rollout stops referencing it.
async fn claim_service(
    service: &Service,
    rollout_name: &str,
    ctx: &Context,
) -> Result<(), ReconcileError> {
    match service.annotations().get(MANAGED_BY_ROLLOUTS_ANNOTATION) {
        Some(owner) if owner == rollout_name => Ok(()),
        Some(owner) => Err(ReconcileError::ServiceConflict {
            service: ObjectKey::from_obj(service),
            owner: owner.clone(),
        }),
        None => {
            let mut claimed = service.clone();
            claimed.annotations_mut().insert(
                MANAGED_BY_ROLLOUTS_ANNOTATION.to_string(),
                rollout_name.to_string(),
            );
            ctx.service_updater.update(&claimed).await?;
            info!(
                service = %ObjectKey::from_obj(service),
                rollout = rollout_name,
                "Claimed Service"
            );
            Ok(())
        }
    }
}

/// Release Services in the rollout's namespace that it claimed but no longer routes through
///
/// Runs before claiming so a Service moved between rollouts frees up in the
/// same pass; the Service update then wakes any rollout waiting on it.
async fn release_dropped_services(
    key: &ObjectKey,
    service_keys: &BTreeSet<ObjectKey>,
    ctx: &Context,
) -> Result<(), ReconcileError> {
    for service in ctx.services.state() {
        let service_key = ObjectKey::from_obj(service.as_ref());
        if service_key.namespace != key.namespace || service_keys.contains(&service_key) {
            continue;
        }
        if service.annotations().get(MANAGED_BY_ROLLOUTS_ANNOTATION) != Some(&key.name) {
            continue;
        }
        release_service(&service, ctx.service_updater.as_ref()).await?;
        info!(service = %service_key, rollout = %key, "Released Service no longer referenced");
    }
    Ok(())
}

/// Best-effort status write for a spec that cannot be reconciled
async fn report_invalid_spec(rollout: &Rollout, message: &str, ctx: &Context) {
    let current = rollout.status.as_ref().and_then(|s| s.message.as_deref());
    if current == Some(message) {
        return;
    }

    let mut updated = rollout.clone();
    let status = updated.status.get_or_insert_with(RolloutStatus::default);
    status.message = Some(message.to_string());
    status.observed_generation = rollout.metadata.generation;

    if let Err(e) = ctx.rollout_updater.update_status(&updated).await {
        warn!(rollout = %rollout.name_any(), error = %e, "Failed to report invalid spec");
    }
}
