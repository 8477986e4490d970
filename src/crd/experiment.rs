use k8s_openapi::api::core::v1::PodTemplateSpec;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Experiment runs one or more short-lived ReplicaSets side by side,
/// usually on behalf of a Rollout.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "argoproj.io",
    version = "v1alpha1",
    kind = "Experiment",
    namespaced,
    status = "ExperimentStatus",
    shortname = "exp",
    printcolumn = r#"{"name":"Status", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
pub struct ExperimentSpec {
    /// How long the experiment runs once all templates are available (e.g. "30m")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,

    /// Workloads started by the experiment
    #[serde(default)]
    pub templates: Vec<TemplateSpec>,
}

/// One workload of an Experiment
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
pub struct TemplateSpec {
    /// Unique name within the experiment
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    #[serde(default)]
    pub selector: LabelSelector,

    #[serde(default)]
    pub template: PodTemplateSpec,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
pub enum ExperimentPhase {
    Pending,
    Running,
    Successful,
    Failed,
    Error,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct ExperimentStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<ExperimentPhase>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}
