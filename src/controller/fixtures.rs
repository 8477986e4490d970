//! Builders shared by controller tests

#![allow(clippy::unwrap_used, clippy::expect_used)]

use crate::crd::experiment::{Experiment, ExperimentSpec, TemplateSpec};
use crate::crd::rollout::{
    BlueGreenStrategy, CanaryStrategy, Rollout, RolloutSpec, RolloutStrategy,
    MANAGED_BY_ROLLOUTS_ANNOTATION,
};
use k8s_openapi::api::apps::v1::ReplicaSet;
use k8s_openapi::api::core::v1::{Service, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::ObjectMeta;
use kube::runtime::reflector::{self, store::Writer, Store};
use kube::runtime::watcher;
use kube::Resource;
use std::collections::BTreeMap;

fn meta(namespace: &str, name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        ..Default::default()
    }
}

pub fn blue_green_rollout(namespace: &str, name: &str, active: &str, preview: &str) -> Rollout {
    Rollout {
        metadata: meta(namespace, name),
        spec: RolloutSpec {
            strategy: RolloutStrategy {
                blue_green: Some(BlueGreenStrategy {
                    active_service: active.to_string(),
                    preview_service: preview.to_string(),
                }),
                canary: None,
            },
            ..Default::default()
        },
        status: None,
    }
}

pub fn canary_rollout(namespace: &str, name: &str, canary: &str, stable: Option<&str>) -> Rollout {
    Rollout {
        metadata: meta(namespace, name),
        spec: RolloutSpec {
            strategy: RolloutStrategy {
                blue_green: None,
                canary: Some(CanaryStrategy {
                    canary_service: canary.to_string(),
                    stable_service: stable.map(str::to_string),
                }),
            },
            ..Default::default()
        },
        status: None,
    }
}

/// Rollout whose strategy sets neither variant
pub fn strategyless_rollout(namespace: &str, name: &str) -> Rollout {
    Rollout {
        metadata: meta(namespace, name),
        spec: RolloutSpec::default(),
        status: None,
    }
}

pub fn service(namespace: &str, name: &str, selector: &[(&str, &str)]) -> Service {
    let selector: BTreeMap<String, String> = selector
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    Service {
        metadata: meta(namespace, name),
        spec: Some(ServiceSpec {
            selector: Some(selector),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn managed_service(
    namespace: &str,
    name: &str,
    owner: &str,
    selector: &[(&str, &str)],
) -> Service {
    let mut svc = service(namespace, name, selector);
    svc.metadata.annotations = Some(BTreeMap::from([(
        MANAGED_BY_ROLLOUTS_ANNOTATION.to_string(),
        owner.to_string(),
    )]));
    svc
}

pub fn experiment(namespace: &str, name: &str, templates: &[&str]) -> Experiment {
    Experiment {
        metadata: meta(namespace, name),
        spec: ExperimentSpec {
            duration: None,
            templates: templates
                .iter()
                .map(|t| TemplateSpec {
                    name: t.to_string(),
                    ..Default::default()
                })
                .collect(),
        },
        status: None,
    }
}

pub fn owner_ref(kind: &str, name: &str) -> OwnerReference {
    OwnerReference {
        api_version: "argoproj.io/v1alpha1".to_string(),
        kind: kind.to_string(),
        name: name.to_string(),
        uid: format!("uid-{}", name),
        controller: Some(true),
        ..Default::default()
    }
}

pub fn replicaset(namespace: &str, name: &str, owners: Vec<OwnerReference>) -> ReplicaSet {
    let mut metadata = meta(namespace, name);
    metadata.owner_references = Some(owners);
    ReplicaSet {
        metadata,
        ..Default::default()
    }
}

/// Reflector store pre-populated with `objects`
pub fn store_with<K>(objects: Vec<K>) -> (Store<K>, Writer<K>)
where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    let (store, mut writer) = reflector::store();
    for obj in objects {
        writer.apply_watcher_event(&watcher::Event::Apply(obj));
    }
    (store, writer)
}
