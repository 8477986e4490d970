use k8s_openapi::api::core::v1::PodTemplateSpec;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Selector label that pins a Service to one revision of a Rollout
pub const DEFAULT_ROLLOUT_UNIQUE_LABEL_KEY: &str = "rollouts-pod-template-hash";

/// Annotation recording which Rollout currently owns a Service's selector
pub const MANAGED_BY_ROLLOUTS_ANNOTATION: &str = "argo-rollouts.argoproj.io/managed-by-rollouts";

/// Rollout is a Custom Resource for managing progressive delivery
///
/// Serde shape is compatible with `argoproj.io/v1alpha1` Rollout manifests.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "argoproj.io",
    version = "v1alpha1",
    kind = "Rollout",
    namespaced,
    status = "RolloutStatus",
    shortname = "ro",
    printcolumn = r#"{"name":"Desired", "type":"integer", "jsonPath":".spec.replicas"}"#,
    printcolumn = r#"{"name":"Active", "type":"string", "jsonPath":".status.activeSelector"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
pub struct RolloutSpec {
    /// Number of desired pods
    #[serde(default = "default_replicas")]
    pub replicas: i32,

    /// Label selector for pods
    #[serde(default)]
    pub selector: LabelSelector,

    /// Template describes the pods that will be created
    #[serde(default)]
    pub template: PodTemplateSpec,

    /// Deployment strategy; exactly one of `blueGreen` or `canary` must be set
    #[serde(default)]
    pub strategy: RolloutStrategy,
}

fn default_replicas() -> i32 {
    1
}

/// Wire shape of the strategy union
///
/// Both fields are optional on the wire. Use [`RolloutStrategy::variant`] to
/// get the validated tagged form.
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
pub struct RolloutStrategy {
    /// Blue-Green deployment strategy
    #[serde(rename = "blueGreen", skip_serializing_if = "Option::is_none")]
    pub blue_green: Option<BlueGreenStrategy>,

    /// Canary deployment strategy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub canary: Option<CanaryStrategy>,
}

/// Blue-Green deployment strategy
///
/// Traffic is switched in one step from the active Service to the revision
/// previously exposed through the preview Service.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct BlueGreenStrategy {
    /// Name of the service that selects active pods (receives production traffic)
    #[serde(rename = "activeService", default)]
    pub active_service: String,

    /// Name of the service that selects preview pods (for testing before promotion)
    #[serde(rename = "previewService", default)]
    pub preview_service: String,
}

/// Canary deployment strategy
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct CanaryStrategy {
    /// Service that selects only canary pods
    #[serde(rename = "canaryService", default)]
    pub canary_service: String,

    /// Service that selects only stable pods
    #[serde(rename = "stableService", skip_serializing_if = "Option::is_none")]
    pub stable_service: Option<String>,
}

/// Validated, exactly-one-of view over [`RolloutStrategy`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StrategyVariant<'a> {
    BlueGreen(&'a BlueGreenStrategy),
    Canary(&'a CanaryStrategy),
}

impl StrategyVariant<'_> {
    /// Label used in logs and metrics
    pub fn name(&self) -> &'static str {
        match self {
            StrategyVariant::BlueGreen(_) => "blue_green",
            StrategyVariant::Canary(_) => "canary",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidStrategy {
    #[error("spec.strategy must set one of blueGreen or canary")]
    Missing,

    #[error("spec.strategy.blueGreen and spec.strategy.canary are mutually exclusive")]
    Ambiguous,
}

impl RolloutStrategy {
    /// Collapse the wire shape into its single populated variant
    pub fn variant(&self) -> Result<StrategyVariant<'_>, InvalidStrategy> {
        match (&self.blue_green, &self.canary) {
            (Some(bg), None) => Ok(StrategyVariant::BlueGreen(bg)),
            (None, Some(canary)) => Ok(StrategyVariant::Canary(canary)),
            (Some(_), Some(_)) => Err(InvalidStrategy::Ambiguous),
            (None, None) => Err(InvalidStrategy::Missing),
        }
    }
}

/// Status of a Rollout as observed by the controller
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct RolloutStatus {
    /// Generation of the spec last processed
    #[serde(rename = "observedGeneration", skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Revision hash currently selected by the active Service (blue-green)
    #[serde(rename = "activeSelector", skip_serializing_if = "Option::is_none")]
    pub active_selector: Option<String>,

    /// Revision hash currently selected by the preview Service (blue-green)
    #[serde(rename = "previewSelector", skip_serializing_if = "Option::is_none")]
    pub preview_selector: Option<String>,

    /// Revision hash currently selected by the canary Service
    #[serde(rename = "canarySelector", skip_serializing_if = "Option::is_none")]
    pub canary_selector: Option<String>,

    /// Revision hash currently selected by the stable Service
    #[serde(rename = "stableSelector", skip_serializing_if = "Option::is_none")]
    pub stable_selector: Option<String>,

    /// Human-readable reason when the spec could not be processed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[cfg(test)]
#[path = "rollout_test.rs"]
mod tests;
