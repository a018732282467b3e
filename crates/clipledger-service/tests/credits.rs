//! Balance and redemption code integration tests.

mod common;

use common::TestHarness;
use serde_json::{json, Value};

async fn mint_code(harness: &TestHarness, credits: i64) -> String {
    let response = harness
        .server
        .post("/v1/admin/codes")
        .add_header("authorization", TestHarness::admin_auth_header())
        .json(&json!({ "credits": credits }))
        .await;
    response.assert_status_ok();
    response.json::<Value>()["codes"][0]["code"]
        .as_str()
        .unwrap()
        .to_string()
}

// ============================================================================
// Balance
// ============================================================================

#[tokio::test]
async fn first_contact_grants_starting_balance() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .get("/v1/credits/balance")
        .add_header("authorization", harness.user_auth_header())
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["balance"], 3);
    assert_eq!(body["user_id"], harness.test_user_id.to_string());

    // Looking again grants nothing more
    assert_eq!(harness.balance().await, 3);
}

// ============================================================================
// Redemption
// ============================================================================

#[tokio::test]
async fn redeem_code_adds_credits() {
    let harness = TestHarness::new();
    let code = mint_code(&harness, 10).await;

    let response = harness
        .server
        .post("/v1/codes/redeem")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({ "code": format!("  {} ", code.to_lowercase()) }))
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["credits_added"], 10);
    assert_eq!(body["new_balance"], 13);
}

#[tokio::test]
async fn redeemed_code_cannot_be_reused() {
    let harness = TestHarness::new();
    let code = mint_code(&harness, 5).await;

    harness
        .server
        .post("/v1/codes/redeem")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({ "code": code }))
        .await
        .assert_status_ok();

    let response = harness
        .server
        .post("/v1/codes/redeem")
        .add_header("authorization", TestHarness::auth_header_for("someone-else"))
        .json(&json!({ "code": code }))
        .await;

    response.assert_status(axum::http::StatusCode::CONFLICT);
    let body: Value = response.json();
    assert_eq!(body["error"]["code"], "conflict");
    assert_eq!(harness.balance().await, 8);
}

#[tokio::test]
async fn unknown_code_is_not_found() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .post("/v1/codes/redeem")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({ "code": "NOSUCH01" }))
        .await;

    response.assert_status_not_found();
    assert_eq!(harness.balance().await, 3);
}

#[tokio::test]
async fn redeem_then_spend_from_zero() {
    let harness = TestHarness::new();

    // Spend the starting balance down to zero
    harness.create_job("lama").await;
    harness.create_job("e2fgvi_hq").await;
    assert_eq!(harness.balance().await, 0);

    let code = mint_code(&harness, 10).await;
    let response = harness
        .server
        .post("/v1/codes/redeem")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({ "code": code }))
        .await;
    response.assert_status_ok();
    assert_eq!(response.json::<Value>()["new_balance"], 10);

    let job = harness.create_job("e2fgvi_hq").await;
    assert_eq!(job["cost"], 2);
    assert_eq!(harness.balance().await, 8);
}
