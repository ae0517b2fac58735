// Integration tests for the internal HTTP surface
mod common;

use axum_test::TestServer;
use common::{create_static_machine, create_test_fleet, test_config, TestFleet};
use sandfleet_orchestrator::http::router;
use sandfleet_orchestrator::Machinery;
use sandfleet_providers::inventory::InstanceState;
use serde_json::json;

async fn create_test_server() -> (TestFleet, TestServer, String) {
    let fleet = create_test_fleet(test_config());
    let label = create_static_machine(&fleet, "win10-1", InstanceState::Stopped).await;
    fleet.controller.initialize().await.unwrap();
    let server = TestServer::new(router(fleet.controller.clone())).unwrap();
    (fleet, server, label)
}

#[tokio::test]
async fn test_root_and_admin_status() {
    let (_fleet, server, label) = create_test_server().await;

    let response = server.get("/").await;
    assert_eq!(response.status_code(), 200);
    assert!(response.text().contains("Sandfleet"));

    let response = server.get("/admin/status").await;
    assert_eq!(response.status_code(), 200);
    let body: serde_json::Value = response.json();
    assert_eq!(body["dynamic_machines_count"], 0);
    assert_eq!(body["machines"][0]["label"], label);
    assert_eq!(body["machines"][0]["state"], "poweroff");
    assert_eq!(body["machines"][0]["elastic"], false);
}

#[tokio::test]
async fn test_acquire_then_nothing_left() {
    let (_fleet, server, label) = create_test_server().await;

    let response = server
        .post("/machines/acquire")
        .json(&json!({"platform": "windows"}))
        .await;
    assert_eq!(response.status_code(), 200);
    let body: serde_json::Value = response.json();
    assert_eq!(body["label"], label);
    assert_eq!(body["locked"], true);

    let response = server.post("/machines/acquire").json(&json!({})).await;
    assert_eq!(response.status_code(), 204);

    let response = server.post(&format!("/machines/{}/release", label)).await;
    assert_eq!(response.status_code(), 200);
}

#[tokio::test]
async fn test_error_statuses() {
    let (_fleet, server, label) = create_test_server().await;

    let response = server.post("/machines/i-unknown/release").await;
    assert_eq!(response.status_code(), 404);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "not_found");

    let response = server.post(&format!("/machines/{}/stop", label)).await;
    assert_eq!(response.status_code(), 409);

    let response = server.get("/machines/i-unknown/status").await;
    assert_eq!(response.status_code(), 200);
    let body: serde_json::Value = response.json();
    assert_eq!(body["state"], "error");
}

#[tokio::test]
async fn test_start_stop_roundtrip() {
    let (fleet, server, label) = create_test_server().await;

    let response = server.post(&format!("/machines/{}/start", label)).await;
    assert_eq!(response.status_code(), 200);
    let body: serde_json::Value = server
        .get(&format!("/machines/{}/status", label))
        .await
        .json();
    assert_eq!(body["state"], "running");

    let response = server.post(&format!("/machines/{}/stop", label)).await;
    assert_eq!(response.status_code(), 200);
    assert_eq!(
        fleet.controller.status(&label).await,
        sandfleet_common::MachineState::Poweroff
    );
}
