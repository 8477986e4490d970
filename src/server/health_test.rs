//! Tests for health and metrics endpoints

use super::*;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

struct TestServer {
    base: String,
    controller: ShutdownController,
    handle: JoinHandle<Result<(), std::io::Error>>,
}

/// Serve on an ephemeral port so tests never collide
async fn start_server(readiness: ReadinessState, metrics: SharedMetrics) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let (controller, signal) = shutdown_channel();
    let handle = tokio::spawn(serve_health(listener, readiness, metrics, signal));
    TestServer {
        base,
        controller,
        handle,
    }
}

async fn get(server: &TestServer, path: &str) -> reqwest::Response {
    reqwest::Client::new()
        .get(format!("{}{}", server.base, path))
        .timeout(Duration::from_secs(5))
        .send()
        .await
        .expect("Failed to connect to health server")
}

#[tokio::test]
async fn test_healthz_returns_200() {
    let server = start_server(ReadinessState::new(), create_metrics().unwrap()).await;

    let response = get(&server, "/healthz").await;

    assert_eq!(response.status(), 200, "Liveness probe should return 200");
}

/// Test: /readyz follows the readiness state
#[tokio::test]
async fn test_readyz_follows_readiness() {
    let readiness = ReadinessState::new();
    let server = start_server(readiness.clone(), create_metrics().unwrap()).await;

    assert_eq!(get(&server, "/readyz").await.status(), 503);

    readiness.set_ready();
    assert_eq!(get(&server, "/readyz").await.status(), 200);

    readiness.set_not_ready();
    assert_eq!(get(&server, "/readyz").await.status(), 503);
}

#[tokio::test]
async fn test_metrics_exposes_reconcile_counters() {
    let metrics = create_metrics().unwrap();
    metrics.record_reconcile("rollout", "success", 0.01);
    let server = start_server(ReadinessState::new(), metrics).await;

    let response = get(&server, "/metrics").await;
    assert_eq!(response.status(), 200);
    let body = response.text().await.unwrap();

    assert!(body.contains("rollouts_controller_reconcile_total"));
    assert!(body.contains("kind=\"rollout\""));
}

/// Test: the server exits once shutdown is signalled
#[tokio::test]
async fn test_server_stops_on_shutdown() {
    let server = start_server(ReadinessState::new(), create_metrics().unwrap()).await;
    assert_eq!(get(&server, "/healthz").await.status(), 200);

    server.controller.shutdown();

    let result = tokio::time::timeout(Duration::from_secs(5), server.handle)
        .await
        .expect("server should stop after shutdown")
        .unwrap();
    assert!(result.is_ok());
}

#[test]
fn test_readiness_state_transitions() {
    let state = ReadinessState::new();
    assert!(!state.is_ready());

    state.set_ready();
    assert!(state.is_ready());

    // Clone should share state
    let cloned = state.clone();
    assert!(cloned.is_ready());
}
