//! Common test utilities for clipledger integration tests.

#![allow(dead_code)] // Some utilities are used by different test files

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::Router;
use axum_test::TestServer;
use serde_json::Value;
use tempfile::TempDir;

use clipledger_core::UserId;
use clipledger_service::config::ProductIds;
use clipledger_service::crypto::hmac_sha256_hex;
use clipledger_service::dispatch::{DispatchError, DispatchOutcome, DispatchRequest, Dispatcher};
use clipledger_service::objects::{FsObjectStore, ObjectStore};
use clipledger_service::payments::{
    CheckoutRequest, CheckoutSession, PaymentError, PaymentProvider,
};
use clipledger_service::{create_router, AppState, Collaborators, ServiceConfig};
use clipledger_store::{MemoryStore, Store};

/// Webhook secret configured in every harness.
pub const WEBHOOK_SECRET: &str = "whsec_integration";

/// How the fake compute provider answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerMode {
    /// No dispatcher configured.
    Absent,
    /// Every job is accepted.
    Accept,
    /// Every job is refused.
    Reject,
    /// Every submission fails transiently.
    Down,
}

/// Dispatcher that answers according to a fixed mode and records requests.
pub struct FakeDispatcher {
    mode: WorkerMode,
    pub submitted: Mutex<Vec<DispatchRequest>>,
}

#[async_trait]
impl Dispatcher for FakeDispatcher {
    async fn submit(&self, request: &DispatchRequest) -> Result<DispatchOutcome, DispatchError> {
        self.submitted.lock().unwrap().push(request.clone());
        match self.mode {
            WorkerMode::Accept | WorkerMode::Absent => Ok(DispatchOutcome::Accepted {
                handle: format!("rp-{}", request.job_id),
            }),
            WorkerMode::Reject => Ok(DispatchOutcome::Rejected {
                reason: "unsupported codec".into(),
            }),
            WorkerMode::Down => Err(DispatchError::InvalidResponse("worker pool offline".into())),
        }
    }
}

/// Payment provider that hands out predictable checkouts.
#[derive(Default)]
pub struct FakePayments {
    pub fail: bool,
    pub requests: Mutex<Vec<CheckoutRequest>>,
}

#[async_trait]
impl PaymentProvider for FakePayments {
    async fn create_checkout(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, PaymentError> {
        self.requests.lock().unwrap().push(request.clone());
        if self.fail {
            return Err(PaymentError::Api {
                status: 500,
                message: "provider down".into(),
            });
        }
        let n = self.requests.lock().unwrap().len();
        Ok(CheckoutSession {
            id: format!("ch_{n}"),
            checkout_url: format!("https://pay.test/checkout/ch_{n}"),
        })
    }
}

/// Test harness containing everything needed for integration tests.
pub struct TestHarness {
    /// The test server for making HTTP requests.
    pub server: TestServer,
    /// The store behind the server.
    pub store: Arc<MemoryStore>,
    /// The object store behind the server.
    pub objects: Arc<FsObjectStore>,
    /// The fake compute provider, if configured.
    pub dispatcher: Option<Arc<FakeDispatcher>>,
    /// The fake payment provider.
    pub payments: Arc<FakePayments>,
    /// Temporary directory for objects (kept alive for test duration).
    pub _temp_dir: TempDir,
    /// A test user ID for authenticated requests.
    pub test_user_id: UserId,
    /// The service API key for worker requests.
    pub service_api_key: String,
}

impl TestHarness {
    /// Create a harness whose compute provider accepts every job.
    pub fn new() -> Self {
        Self::with_worker(WorkerMode::Accept)
    }

    /// Create a harness with the given compute provider behavior.
    pub fn with_worker(mode: WorkerMode) -> Self {
        Self::build(mode, FakePayments::default())
    }

    /// Create a harness whose payment provider refuses checkouts.
    pub fn with_failing_payments() -> Self {
        Self::build(
            WorkerMode::Accept,
            FakePayments {
                fail: true,
                ..FakePayments::default()
            },
        )
    }

    fn build(mode: WorkerMode, payments: FakePayments) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let store = Arc::new(MemoryStore::new());
        let objects = Arc::new(FsObjectStore::new(temp_dir.path(), "http://cdn.test"));
        let payments = Arc::new(payments);

        let dispatcher = (mode != WorkerMode::Absent).then(|| {
            Arc::new(FakeDispatcher {
                mode,
                submitted: Mutex::new(Vec::new()),
            })
        });

        let service_api_key = "test-service-key".to_string();

        let config = ServiceConfig {
            listen_addr: "127.0.0.1:0".into(),
            object_store_root: temp_dir.path().to_string_lossy().to_string(),
            public_url_base: "http://cdn.test".into(),
            auth_base_url: "http://localhost".into(),
            auth_audience: "clipledger".into(),
            service_api_key: Some(service_api_key.clone()),
            creem_webhook_secret: Some(WEBHOOK_SECRET.into()),
            products: ProductIds {
                starter: Some("prod_starter".into()),
                pro: Some("prod_pro".into()),
                business: Some("prod_business".into()),
            },
            frontend_url: "http://localhost:3000".into(),
            cors_origins: vec!["*".into()],
            starting_balance: 3,
            max_dispatch_attempts: 2,
            sweep_interval_seconds: 0,
            ..ServiceConfig::default()
        };

        let collaborators = Collaborators {
            dispatcher: dispatcher
                .clone()
                .map(|d| d as Arc<dyn Dispatcher>),
            objects: objects.clone() as Arc<dyn ObjectStore>,
            payments: Some(payments.clone() as Arc<dyn PaymentProvider>),
        };

        let state = AppState::from_parts(store.clone() as Arc<dyn Store>, config, collaborators);
        let router: Router = create_router(state);

        let server = TestServer::new(router).expect("Failed to create test server");
        let test_user_id = UserId::new(format!("user-{}", uuid::Uuid::new_v4())).unwrap();

        Self {
            server,
            store,
            objects,
            dispatcher,
            payments,
            _temp_dir: temp_dir,
            test_user_id,
            service_api_key,
        }
    }

    /// Get the authorization header for user authentication.
    pub fn user_auth_header(&self) -> String {
        format!("Bearer test-token:{}", self.test_user_id)
    }

    /// Authorization header for an arbitrary user.
    pub fn auth_header_for(user_id: &str) -> String {
        format!("Bearer test-token:{user_id}")
    }

    /// Authorization header carrying the admin role.
    pub fn admin_auth_header() -> String {
        "Bearer test-admin:ops".to_string()
    }

    /// Current balance of the test user, via the API.
    pub async fn balance(&self) -> i64 {
        let response = self
            .server
            .get("/v1/credits/balance")
            .add_header("authorization", self.user_auth_header())
            .await;
        response.assert_status_ok();
        response.json::<Value>()["balance"].as_i64().unwrap()
    }

    /// Upload a small input for the test user and return its key.
    pub async fn upload_input(&self) -> String {
        let response = self
            .server
            .post("/v1/uploads")
            .add_query_param("filename", "clip.mp4")
            .add_header("authorization", self.user_auth_header())
            .add_header("content-type", "video/mp4")
            .bytes(b"not really a video".to_vec().into())
            .await;
        response.assert_status_ok();
        response.json::<Value>()["key"].as_str().unwrap().to_string()
    }

    /// Upload an input and create a job for it.
    pub async fn create_job(&self, quality: &str) -> Value {
        let input_key = self.upload_input().await;
        let response = self
            .server
            .post("/v1/jobs")
            .add_header("authorization", self.user_auth_header())
            .json(&serde_json::json!({ "quality": quality, "input_key": input_key }))
            .await;
        response.assert_status_ok();
        response.json::<Value>()
    }

    /// Give the test user credits through the admin API.
    pub async fn grant(&self, amount: i64) {
        self.server
            .post(&format!("/v1/admin/users/{}/credits", self.test_user_id))
            .add_header("authorization", Self::admin_auth_header())
            .json(&serde_json::json!({ "amount": amount }))
            .await
            .assert_status_ok();
    }

    /// Post a webhook body signed with the configured secret.
    pub async fn post_signed_webhook(&self, body: &Value) -> axum_test::TestResponse {
        let raw = serde_json::to_vec(body).unwrap();
        let signature = hmac_sha256_hex(WEBHOOK_SECRET.as_bytes(), &raw).unwrap();
        self.server
            .post("/webhooks/payments")
            .add_header("creem-signature", signature)
            .add_header("content-type", "application/json")
            .bytes(raw.into())
            .await
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// A `checkout.completed` event for `transaction_id`.
pub fn checkout_completed(transaction_id: &str, credits: i64) -> Value {
    serde_json::json!({
        "id": "evt_1",
        "eventType": "checkout.completed",
        "object": {
            "id": "ch_1",
            "customer": "cus_42",
            "metadata": {
                "transaction_id": transaction_id,
                "credits": credits
            }
        }
    })
}
