use crate::controller::key::ObjectKey;
use crate::crd::rollout::{
    InvalidStrategy, Rollout, RolloutStatus, StrategyVariant, DEFAULT_ROLLOUT_UNIQUE_LABEL_KEY,
};
use k8s_openapi::api::core::v1::Service;
use kube::runtime::reflector::Store;
use kube::ResourceExt;
use std::collections::BTreeSet;

/// Services referenced by a Rollout, as `namespace/name` keys
///
/// Services always live in the Rollout's own namespace. Empty service names
/// mean "not configured yet" and are skipped. Blue-green contributes the
/// active and preview services, canary contributes the canary service.
/// The set is ordered so repeated calls yield the same sequence.
///
/// # Errors
/// Returns [`InvalidStrategy`] when the strategy is not exactly one of
/// blue-green or canary.
pub fn resolve_service_keys(rollout: &Rollout) -> Result<BTreeSet<ObjectKey>, InvalidStrategy> {
    let namespace = rollout.namespace().unwrap_or_default();
    let names: Vec<&str> = match rollout.spec.strategy.variant()? {
        StrategyVariant::BlueGreen(bg) => {
            vec![bg.active_service.as_str(), bg.preview_service.as_str()]
        }
        StrategyVariant::Canary(canary) => vec![canary.canary_service.as_str()],
    };

    Ok(names
        .into_iter()
        .filter(|name| !name.is_empty())
        .map(|name| ObjectKey::new(namespace.clone(), name))
        .collect())
}

/// Revision currently receiving a Service's traffic
///
/// Reads the reserved `rollouts-pod-template-hash` selector entry. `None`
/// means the service is absent, has no selector, or no cutover has happened.
pub fn current_selector(service: Option<&Service>) -> Option<&str> {
    service?
        .spec
        .as_ref()?
        .selector
        .as_ref()?
        .get(DEFAULT_ROLLOUT_UNIQUE_LABEL_KEY)
        .map(String::as_str)
}

/// Selector values observed on a Rollout's services
///
/// Only the traffic fields of [`RolloutStatus`] are filled in.
pub fn observe_traffic(
    rollout: &Rollout,
    services: &Store<Service>,
) -> Result<RolloutStatus, InvalidStrategy> {
    let namespace = rollout.namespace().unwrap_or_default();
    let lookup = |name: &str| -> Option<String> {
        if name.is_empty() {
            return None;
        }
        let service = services.get(&ObjectKey::new(namespace.clone(), name).object_ref());
        current_selector(service.as_deref()).map(str::to_string)
    };

    let mut status = RolloutStatus::default();
    match rollout.spec.strategy.variant()? {
        StrategyVariant::BlueGreen(bg) => {
            status.active_selector = lookup(&bg.active_service);
            status.preview_selector = lookup(&bg.preview_service);
        }
        StrategyVariant::Canary(canary) => {
            status.canary_selector = lookup(&canary.canary_service);
            status.stable_selector = canary.stable_service.as_deref().and_then(&lookup);
        }
    }
    Ok(status)
}

/// Rollouts in `rollouts` that reference `service`
///
/// Reverse of [`resolve_service_keys`]; rollouts with an invalid strategy
/// reference nothing.
pub fn rollouts_for_service<'a, I>(rollouts: I, service: &ObjectKey) -> Vec<ObjectKey>
where
    I: IntoIterator<Item = &'a Rollout>,
{
    rollouts
        .into_iter()
        .filter(|rollout| {
            resolve_service_keys(rollout)
                .map(|keys| keys.contains(service))
                .unwrap_or(false)
        })
        .map(ObjectKey::from_obj)
        .collect()
}

#[cfg(test)]
#[path = "traffic_test.rs"]
mod tests;
