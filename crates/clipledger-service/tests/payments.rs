//! Checkout and payment webhook integration tests.

mod common;

use axum::http::StatusCode;
use common::{checkout_completed, TestHarness};
use serde_json::{json, Value};

use clipledger_core::{TransactionId, TransactionStatus};
use clipledger_store::Store;

async fn start_checkout(harness: &TestHarness, pack: &str) -> Value {
    let response = harness
        .server
        .post("/v1/checkout")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({ "pack": pack }))
        .await;
    response.assert_status_ok();
    response.json()
}

// ============================================================================
// Checkout
// ============================================================================

#[tokio::test]
async fn checkout_creates_pending_transaction() {
    let harness = TestHarness::new();

    let body = start_checkout(&harness, "pro").await;

    assert!(body["checkout_url"]
        .as_str()
        .unwrap()
        .starts_with("https://pay.test/checkout/"));
    let tx_id: TransactionId = body["transaction_id"].as_str().unwrap().parse().unwrap();

    let tx = harness.store.get_transaction(&tx_id).await.unwrap().unwrap();
    assert_eq!(tx.status, TransactionStatus::Pending);
    assert_eq!(tx.credits, 50);
    assert_eq!(tx.amount_cents, 1999);
    assert_eq!(tx.user_id, harness.test_user_id);

    let requests = harness.payments.requests.lock().unwrap().clone();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].product_id, "prod_pro");
    assert_eq!(requests[0].metadata.transaction_id, tx_id.to_string());
    assert_eq!(requests[0].metadata.credits, 50);
    assert_eq!(
        requests[0].success_url,
        "http://localhost:3000/en/dashboard?payment=success&credits=50"
    );
}

#[tokio::test]
async fn unknown_pack_is_rejected() {
    let harness = TestHarness::new();

    harness
        .server
        .post("/v1/checkout")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({ "pack": "platinum" }))
        .await
        .assert_status_bad_request();
}

#[tokio::test]
async fn provider_failure_marks_transaction_failed() {
    let harness = TestHarness::with_failing_payments();

    let response = harness
        .server
        .post("/v1/checkout")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({ "pack": "starter" }))
        .await;

    response.assert_status(StatusCode::BAD_GATEWAY);

    let transactions = harness
        .store
        .list_transactions_by_user(&harness.test_user_id, 10, 0)
        .await
        .unwrap();
    assert_eq!(transactions.len(), 1);
    assert_eq!(transactions[0].status, TransactionStatus::Failed);
}

// ============================================================================
// Webhooks
// ============================================================================

#[tokio::test]
async fn completed_checkout_credits_once() {
    let harness = TestHarness::new();
    let checkout = start_checkout(&harness, "pro").await;
    let tx_id = checkout["transaction_id"].as_str().unwrap();

    let event = checkout_completed(tx_id, 50);
    for _ in 0..2 {
        let response = harness.post_signed_webhook(&event).await;
        response.assert_status_ok();
        assert_eq!(response.json::<Value>()["received"], true);
    }

    assert_eq!(harness.balance().await, 53);

    let payments = harness
        .server
        .get("/v1/payments")
        .add_header("authorization", harness.user_auth_header())
        .await;
    payments.assert_status_ok();
    let body: Value = payments.json();
    assert_eq!(body["payments"][0]["status"], "succeeded");
    assert_eq!(body["payments"][0]["credits"], 50);

    let account = harness
        .store
        .get_account(&harness.test_user_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(account.payment_customer_id.as_deref(), Some("cus_42"));
}

#[tokio::test]
async fn order_paid_event_credits() {
    let harness = TestHarness::new();
    let checkout = start_checkout(&harness, "starter").await;

    let mut event = checkout_completed(checkout["transaction_id"].as_str().unwrap(), 10);
    event["eventType"] = json!("order.paid");
    harness.post_signed_webhook(&event).await.assert_status_ok();

    assert_eq!(harness.balance().await, 13);
}

#[tokio::test]
async fn bad_signature_is_rejected_without_credit() {
    let harness = TestHarness::new();
    let checkout = start_checkout(&harness, "pro").await;
    let event = checkout_completed(checkout["transaction_id"].as_str().unwrap(), 50);

    let response = harness
        .server
        .post("/webhooks/payments")
        .add_header("creem-signature", "00ff")
        .json(&event)
        .await;
    response.assert_status_bad_request();

    harness
        .server
        .post("/webhooks/payments")
        .json(&event)
        .await
        .assert_status_bad_request();

    assert_eq!(harness.balance().await, 3);
}

#[tokio::test]
async fn unknown_transaction_is_acknowledged() {
    let harness = TestHarness::new();

    let event = checkout_completed(&TransactionId::generate().to_string(), 50);
    let response = harness.post_signed_webhook(&event).await;

    response.assert_status_ok();
    assert_eq!(harness.balance().await, 3);
}

#[tokio::test]
async fn unhandled_event_types_are_acknowledged() {
    let harness = TestHarness::new();

    let response = harness
        .post_signed_webhook(&json!({ "eventType": "refund.created", "object": {} }))
        .await;

    response.assert_status_ok();
}
