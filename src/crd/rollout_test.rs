#![allow(clippy::unwrap_used)] // Tests can use unwrap for brevity
#![allow(clippy::expect_used)] // Tests can use expect for better error messages

use super::*;
use kube::CustomResourceExt;

#[test]
fn test_blue_green_strategy_deserialize_from_yaml() {
    let yaml = r#"
apiVersion: argoproj.io/v1alpha1
kind: Rollout
metadata:
  name: blue-green-rollout
  namespace: prod
spec:
  replicas: 3
  selector:
    matchLabels:
      app: test-app
  template:
    metadata:
      labels:
        app: test-app
    spec:
      containers:
      - name: app
        image: nginx:2.0
  strategy:
    blueGreen:
      activeService: my-app-active
      previewService: my-app-preview
"#;

    let rollout: Rollout = serde_yaml::from_str(yaml).expect("rollout should parse");

    assert_eq!(rollout.spec.replicas, 3);
    let bg = rollout
        .spec
        .strategy
        .blue_green
        .as_ref()
        .expect("blueGreen should exist");
    assert_eq!(bg.active_service, "my-app-active");
    assert_eq!(bg.preview_service, "my-app-preview");
    assert!(rollout.spec.strategy.canary.is_none());
}

#[test]
fn test_canary_strategy_without_stable_service() {
    let yaml = r#"
apiVersion: argoproj.io/v1alpha1
kind: Rollout
metadata:
  name: canary-rollout
spec:
  strategy:
    canary:
      canaryService: my-app-canary
"#;

    let rollout: Rollout = serde_yaml::from_str(yaml).unwrap();

    // replicas falls back to the default
    assert_eq!(rollout.spec.replicas, 1);
    let canary = rollout.spec.strategy.canary.as_ref().unwrap();
    assert_eq!(canary.canary_service, "my-app-canary");
    assert_eq!(canary.stable_service, None);
}

#[test]
fn test_preview_service_is_optional() {
    let yaml = r#"
apiVersion: argoproj.io/v1alpha1
kind: Rollout
metadata:
  name: active-only
spec:
  strategy:
    blueGreen:
      activeService: only-active
"#;

    let rollout: Rollout = serde_yaml::from_str(yaml).unwrap();
    let bg = rollout.spec.strategy.blue_green.unwrap();

    assert_eq!(bg.active_service, "only-active");
    assert_eq!(bg.preview_service, "");
}

#[test]
fn test_variant_blue_green() {
    let strategy = RolloutStrategy {
        blue_green: Some(BlueGreenStrategy {
            active_service: "a".to_string(),
            preview_service: "p".to_string(),
        }),
        canary: None,
    };

    let variant = strategy.variant().unwrap();
    assert!(matches!(variant, StrategyVariant::BlueGreen(bg) if bg.active_service == "a"));
    assert_eq!(variant.name(), "blue_green");
}

#[test]
fn test_variant_canary() {
    let strategy = RolloutStrategy {
        blue_green: None,
        canary: Some(CanaryStrategy {
            canary_service: "c".to_string(),
            stable_service: Some("s".to_string()),
        }),
    };

    assert_eq!(strategy.variant().unwrap().name(), "canary");
}

#[test]
fn test_variant_rejects_missing_strategy() {
    let strategy = RolloutStrategy::default();

    assert_eq!(strategy.variant(), Err(InvalidStrategy::Missing));
}

#[test]
fn test_variant_rejects_both_strategies() {
    let strategy = RolloutStrategy {
        blue_green: Some(BlueGreenStrategy::default()),
        canary: Some(CanaryStrategy::default()),
    };

    assert_eq!(strategy.variant(), Err(InvalidStrategy::Ambiguous));
}

#[test]
fn test_status_serializes_camel_case_and_skips_empty() {
    let status = RolloutStatus {
        active_selector: Some("abc123".to_string()),
        ..Default::default()
    };

    let json = serde_json::to_value(&status).unwrap();

    assert_eq!(json, serde_json::json!({ "activeSelector": "abc123" }));
}

#[test]
fn test_rollout_crd_metadata() {
    let crd = Rollout::crd();

    assert_eq!(crd.spec.group, "argoproj.io");
    assert_eq!(crd.spec.names.kind, "Rollout");
    assert_eq!(crd.spec.scope, "Namespaced");
    assert_eq!(crd.spec.versions[0].name, "v1alpha1");
}
