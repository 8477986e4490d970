use super::*;
use crate::controller::client::MockUpdater;
use crate::controller::error::ReconcileError;
use crate::controller::fixtures::{
    blue_green_rollout, canary_rollout, managed_service, service, store_with,
    strategyless_rollout,
};
use crate::controller::key::ObjectKey;
use crate::crd::rollout::{
    Rollout, RolloutStatus, DEFAULT_ROLLOUT_UNIQUE_LABEL_KEY, MANAGED_BY_ROLLOUTS_ANNOTATION,
};
use k8s_openapi::api::core::v1::Service;
use kube::runtime::reflector::store::Writer;
use kube::ResourceExt;
use std::sync::Arc;

struct Harness {
    ctx: Context,
    rollout_updater: Arc<MockUpdater<Rollout>>,
    service_updater: Arc<MockUpdater<Service>>,
    // Keep the writers alive for the lifetime of the stores
    _writers: (Writer<Rollout>, Writer<Service>),
}

fn harness(rollouts: Vec<Rollout>, services: Vec<Service>) -> Harness {
    harness_with(rollouts, services, MockUpdater::new())
}

fn harness_with(
    rollouts: Vec<Rollout>,
    services: Vec<Service>,
    rollout_updater: MockUpdater<Rollout>,
) -> Harness {
    let (rollout_store, rollout_writer) = store_with(rollouts);
    let (service_store, service_writer) = store_with(services);
    let rollout_updater = Arc::new(rollout_updater);
    let service_updater = Arc::new(MockUpdater::new());
    Harness {
        ctx: Context {
            rollouts: rollout_store,
            services: service_store,
            rollout_updater: rollout_updater.clone(),
            service_updater: service_updater.clone(),
        },
        rollout_updater,
        service_updater,
        _writers: (rollout_writer, service_writer),
    }
}

fn hash(value: &str) -> [(&'static str, &str); 1] {
    [(DEFAULT_ROLLOUT_UNIQUE_LABEL_KEY, value)]
}

/// Test: blue-green rollout prod/r1 claims both services and reports the live revision
#[tokio::test]
async fn test_blue_green_rollout_end_to_end() {
    let h = harness(
        vec![blue_green_rollout("prod", "r1", "svc-active", "svc-preview")],
        vec![
            service("prod", "svc-active", &hash("r1-abc")),
            service("prod", "svc-preview", &[("app", "web")]),
        ],
    );

    reconcile(&ObjectKey::new("prod", "r1"), &h.ctx).await.unwrap();

    // Both services claimed
    let claimed: Vec<String> = h
        .service_updater
        .updates()
        .iter()
        .map(|svc| {
            assert_eq!(
                svc.annotations().get(MANAGED_BY_ROLLOUTS_ANNOTATION),
                Some(&"r1".to_string())
            );
            svc.name_any()
        })
        .collect();
    assert_eq!(claimed, vec!["svc-active", "svc-preview"]);

    // Status mirrors the active selector
    let statuses = h.rollout_updater.status_updates();
    assert_eq!(statuses.len(), 1);
    let status = statuses[0].status.as_ref().unwrap();
    assert_eq!(status.active_selector.as_deref(), Some("r1-abc"));
    assert_eq!(status.preview_selector, None);
    assert_eq!(status.message, None);
}

/// Test: nothing is written when cluster state already matches
#[tokio::test]
async fn test_reconcile_is_idempotent() {
    let mut rollout = blue_green_rollout("prod", "r1", "svc-active", "");
    rollout.status = Some(RolloutStatus {
        active_selector: Some("r1-abc".to_string()),
        ..Default::default()
    });
    let h = harness(
        vec![rollout],
        vec![managed_service("prod", "svc-active", "r1", &hash("r1-abc"))],
    );

    reconcile(&ObjectKey::new("prod", "r1"), &h.ctx).await.unwrap();
    reconcile(&ObjectKey::new("prod", "r1"), &h.ctx).await.unwrap();

    assert!(h.service_updater.updates().is_empty());
    assert!(h.rollout_updater.status_updates().is_empty());
}

#[tokio::test]
async fn test_deleted_rollout_is_a_no_op() {
    let h = harness(vec![], vec![]);

    reconcile(&ObjectKey::new("prod", "gone"), &h.ctx).await.unwrap();

    assert!(h.rollout_updater.status_updates().is_empty());
}

#[tokio::test]
async fn test_rollout_without_services_only_updates_generation() {
    let mut rollout = blue_green_rollout("prod", "r1", "", "");
    rollout.metadata.generation = Some(3);
    let h = harness(vec![rollout], vec![]);

    reconcile(&ObjectKey::new("prod", "r1"), &h.ctx).await.unwrap();

    let statuses = h.rollout_updater.status_updates();
    assert_eq!(statuses.len(), 1);
    assert_eq!(
        statuses[0].status,
        Some(RolloutStatus {
            observed_generation: Some(3),
            ..Default::default()
        })
    );
}

/// Test: a referenced service missing from the cache is retried
#[tokio::test]
async fn test_missing_service_is_retryable() {
    let h = harness(
        vec![blue_green_rollout("prod", "r1", "svc-active", "svc-preview")],
        vec![service("prod", "svc-active", &hash("r1-abc"))],
    );

    let err = reconcile(&ObjectKey::new("prod", "r1"), &h.ctx)
        .await
        .unwrap_err();

    assert!(
        matches!(&err, ReconcileError::ServiceNotFound(key) if key.to_string() == "prod/svc-preview")
    );
    assert!(err.is_retryable());
}

/// Test: invalid strategy is terminal and reported on the status
#[tokio::test]
async fn test_invalid_strategy_is_terminal_and_reported() {
    let h = harness(vec![strategyless_rollout("prod", "broken")], vec![]);

    let err = reconcile(&ObjectKey::new("prod", "broken"), &h.ctx)
        .await
        .unwrap_err();

    assert!(matches!(err, ReconcileError::ValidationError(_)));
    assert!(!err.is_retryable());

    let statuses = h.rollout_updater.status_updates();
    assert_eq!(statuses.len(), 1);
    let message = statuses[0].status.as_ref().unwrap().message.clone().unwrap();
    assert!(message.contains("blueGreen or canary"));
}

#[tokio::test]
async fn test_both_strategies_is_terminal() {
    let mut rollout = blue_green_rollout("prod", "r1", "a", "b");
    rollout.spec.strategy.canary = canary_rollout("prod", "r1", "c", None)
        .spec
        .strategy
        .canary;
    let h = harness(vec![rollout], vec![]);

    let err = reconcile(&ObjectKey::new("prod", "r1"), &h.ctx)
        .await
        .unwrap_err();

    assert!(matches!(err, ReconcileError::ValidationError(ref m) if m.contains("mutually exclusive")));
    assert!(h.service_updater.updates().is_empty());
}

#[tokio::test]
async fn test_invalid_spec_already_reported_is_not_rewritten() {
    let mut rollout = strategyless_rollout("prod", "broken");
    rollout.status = Some(RolloutStatus {
        message: Some("spec.strategy must set one of blueGreen or canary".to_string()),
        ..Default::default()
    });
    let h = harness(vec![rollout], vec![]);

    let result = reconcile(&ObjectKey::new("prod", "broken"), &h.ctx).await;

    assert!(result.is_err());
    assert!(h.rollout_updater.status_updates().is_empty());
}

#[tokio::test]
async fn test_failed_report_still_returns_validation_error() {
    let h = harness_with(
        vec![strategyless_rollout("prod", "broken")],
        vec![],
        MockUpdater::failing(),
    );

    let err = reconcile(&ObjectKey::new("prod", "broken"), &h.ctx)
        .await
        .unwrap_err();

    assert!(matches!(err, ReconcileError::ValidationError(_)));
}

/// Test: a service claimed by another rollout is a terminal conflict
#[tokio::test]
async fn test_service_claimed_by_other_rollout_conflicts() {
    let h = harness(
        vec![canary_rollout("prod", "r2", "shared", None)],
        vec![managed_service("prod", "shared", "r1", &hash("r1-abc"))],
    );

    let err = reconcile(&ObjectKey::new("prod", "r2"), &h.ctx)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ReconcileError::ServiceConflict { ref owner, .. } if owner == "r1"
    ));
    assert!(!err.is_retryable());
    assert!(h.service_updater.updates().is_empty());
}

#[tokio::test]
async fn test_canary_status_reports_canary_and_stable() {
    let h = harness(
        vec![canary_rollout("ns", "r1", "svc-canary", Some("svc-stable"))],
        vec![
            service("ns", "svc-canary", &hash("new")),
            service("ns", "svc-stable", &hash("old")),
        ],
    );

    reconcile(&ObjectKey::new("ns", "r1"), &h.ctx).await.unwrap();

    // Only the canary service is a traffic target
    let claimed: Vec<String> = h
        .service_updater
        .updates()
        .iter()
        .map(|svc| svc.name_any())
        .collect();
    assert_eq!(claimed, vec!["svc-canary"]);

    let status = h.rollout_updater.status_updates()[0].status.clone().unwrap();
    assert_eq!(status.canary_selector.as_deref(), Some("new"));
    assert_eq!(status.stable_selector.as_deref(), Some("old"));
}

#[tokio::test]
async fn test_status_write_failure_is_retryable() {
    let h = harness_with(
        vec![blue_green_rollout("prod", "r1", "", "")],
        vec![],
        MockUpdater::failing(),
    );

    let err = reconcile(&ObjectKey::new("prod", "r1"), &h.ctx)
        .await
        .unwrap_err();

    assert!(err.is_retryable());
}

/// Test: a service the rollout stopped referencing is released before the new one is claimed
#[tokio::test]
async fn test_dropped_service_is_released() {
    let h = harness(
        vec![blue_green_rollout("prod", "r1", "svc-new", "")],
        vec![
            managed_service("prod", "svc-old", "r1", &hash("r1-abc")),
            managed_service("prod", "svc-other", "r2", &hash("r2-abc")),
            managed_service("staging", "svc-old", "r1", &hash("r1-abc")),
            service("prod", "svc-new", &[]),
        ],
    );

    reconcile(&ObjectKey::new("prod", "r1"), &h.ctx).await.unwrap();

    let updates = h.service_updater.updates();
    assert_eq!(updates.len(), 2);
    let released = &updates[0];
    assert_eq!(ObjectKey::from_obj(released), ObjectKey::new("prod", "svc-old"));
    assert!(released
        .annotations()
        .get(MANAGED_BY_ROLLOUTS_ANNOTATION)
        .is_none());
    let selector = released.spec.as_ref().unwrap().selector.as_ref().unwrap();
    assert!(!selector.contains_key(DEFAULT_ROLLOUT_UNIQUE_LABEL_KEY));
    assert_eq!(updates[1].name_any(), "svc-new");
}
