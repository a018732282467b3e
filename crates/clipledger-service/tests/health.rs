//! Health check and authentication integration tests.

mod common;

use common::TestHarness;

#[tokio::test]
async fn health_check_returns_ok() {
    let harness = TestHarness::new();

    let response = harness.server.get("/health").await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "clipledger");
    assert!(body["version"].as_str().is_some());
    assert_eq!(body["integrations"]["dispatch"], true);
    assert_eq!(body["integrations"]["signed_webhooks"], true);
}

#[tokio::test]
async fn protected_routes_require_a_token() {
    let harness = TestHarness::new();

    harness
        .server
        .get("/v1/credits/balance")
        .await
        .assert_status_unauthorized();

    harness
        .server
        .get("/v1/jobs")
        .add_header("authorization", "Basic abc")
        .await
        .assert_status_unauthorized();
}

#[tokio::test]
async fn invalid_jwt_is_rejected() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .get("/v1/credits/balance")
        .add_header("authorization", "Bearer not.a.jwt")
        .await;

    response.assert_status_unauthorized();
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"]["code"], "unauthorized");
}

#[tokio::test]
async fn pack_catalog_is_public() {
    let harness = TestHarness::new();

    let response = harness.server.get("/v1/packs").await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    let packs = body.as_array().unwrap();
    assert_eq!(packs.len(), 3);
    assert_eq!(packs[1]["pack"], "pro");
    assert_eq!(packs[1]["credits"], 50);
    assert_eq!(packs[1]["price_cents"], 1999);
}
