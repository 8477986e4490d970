//! Default Experiment reconciler
//!
//! Validates Experiments and initialises their status. Running the templates
//! is left to the strategy logic.

use super::client::ObjectUpdater;
use super::error::ReconcileError;
use super::key::ObjectKey;
use super::rollout::parse_duration;
use super::worker::Reconciler;
use crate::crd::experiment::{Experiment, ExperimentPhase, ExperimentStatus};
use async_trait::async_trait;
use kube::runtime::reflector::Store;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct Context {
    pub experiments: Store<Experiment>,
    pub updater: Arc<dyn ObjectUpdater<Experiment>>,
}

pub struct ExperimentReconciler {
    ctx: Arc<Context>,
}

impl ExperimentReconciler {
    pub fn new(ctx: Arc<Context>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Reconciler for ExperimentReconciler {
    async fn reconcile(&self, key: &ObjectKey) -> Result<(), ReconcileError> {
        reconcile(key, &self.ctx).await
    }
}

/// Validate Experiment specification
///
/// # Validation Rules
/// - at least one template
/// - template names are non-empty and unique
/// - `spec.duration`, when set, is `<n>s`, `<n>m` or `<n>h`
pub fn validate_experiment(experiment: &Experiment) -> Result<(), String> {
    if experiment.spec.templates.is_empty() {
        return Err("spec.templates must contain at least one template".to_string());
    }

    let mut seen = HashSet::new();
    for (i, template) in experiment.spec.templates.iter().enumerate() {
        if template.name.is_empty() {
            return Err(format!("spec.templates[{}].name must not be empty", i));
        }
        if !seen.insert(template.name.as_str()) {
            return Err(format!(
                "spec.templates[{}].name '{}' is not unique",
                i, template.name
            ));
        }
    }

    if let Some(duration) = &experiment.spec.duration {
        if parse_duration(duration).is_none() {
            return Err(format!(
                "spec.duration '{}' is invalid (expected e.g. 30s, 5m, 2h)",
                duration
            ));
        }
    }

    Ok(())
}

pub async fn reconcile(key: &ObjectKey, ctx: &Context) -> Result<(), ReconcileError> {
    let Some(experiment) = ctx.experiments.get(&key.object_ref()) else {
        debug!(experiment = %key, "Experiment not in cache, skipping");
        return Ok(());
    };

    let current = experiment.status.clone().unwrap_or_default();

    if let Err(message) = validate_experiment(&experiment) {
        warn!(experiment = %key, error = %message, "Invalid Experiment spec");
        let desired = ExperimentStatus {
            phase: Some(ExperimentPhase::Error),
            message: Some(message.clone()),
        };
        if current != desired {
            let mut updated = (*experiment).clone();
            updated.status = Some(desired);
            if let Err(e) = ctx.updater.update_status(&updated).await {
                warn!(experiment = %key, error = %e, "Failed to report invalid spec");
            }
        }
        return Err(ReconcileError::ValidationError(message));
    }

    // New experiments, and ones whose spec was fixed, start over as Pending
    if matches!(current.phase, None | Some(ExperimentPhase::Error)) {
        info!(experiment = %key, "Experiment accepted");
        let mut updated = (*experiment).clone();
        updated.status = Some(ExperimentStatus {
            phase: Some(ExperimentPhase::Pending),
            message: None,
        });
        ctx.updater.update_status(&updated).await?;
    }

    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[path = "experiment_test.rs"]
mod tests;
