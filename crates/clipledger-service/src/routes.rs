//! Router configuration.
//!
//! This module sets up the Axum router with all routes and middleware.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{
    admin, checkout, codes, credits, health, internal, jobs, uploads, webhooks,
};
use crate::state::AppState;

/// Maximum concurrent requests for general API endpoints.
const API_MAX_CONCURRENT_REQUESTS: usize = 50;

/// Create the service router with all routes and middleware.
///
/// # Routes
///
/// ## Public
/// - `GET /health` - Health check
/// - `GET /v1/packs` - Credit pack catalog
///
/// ## Users (JWT auth)
/// - `GET /v1/credits/balance` - Current balance
/// - `POST /v1/uploads?filename=` - Upload an input video
/// - `POST /v1/jobs` - Reserve credits and create a job
/// - `GET /v1/jobs` - List own jobs
/// - `GET /v1/jobs/:job_id` - Job status (reconciled)
/// - `POST /v1/codes/redeem` - Redeem a code
/// - `POST /v1/checkout` - Start a credit pack checkout
/// - `GET /v1/payments` - Purchase history
///
/// ## Admin (JWT auth, `admin` role)
/// - `POST /v1/admin/codes` - Generate codes
/// - `GET /v1/admin/codes` - List codes
/// - `GET /v1/admin/users` - List accounts
/// - `POST /v1/admin/users/:user_id/credits` - Grant credits
/// - `GET /v1/admin/jobs` - List jobs
/// - `GET /v1/admin/stats` - Dashboard counters
///
/// ## Workers (Service API key auth)
/// - `POST /internal/jobs/:job_id/report` - Report a job outcome
///
/// ## Webhooks (Signature verification)
/// - `POST /webhooks/payments` - Payment provider events
pub fn create_router(state: AppState) -> Router {
    // Extract config values before moving state
    let cors_origins = state.config.cors_origins.clone();
    let max_body_bytes = state.config.max_body_bytes;
    let max_upload_bytes = state.config.max_upload_bytes;
    let request_timeout_seconds = state.config.request_timeout_seconds;

    let cors = build_cors_layer(&cors_origins);

    let state = Arc::new(state);

    let admin_routes = Router::new()
        .route(
            "/codes",
            post(admin::generate_codes).get(admin::list_codes),
        )
        .route("/users", get(admin::list_users))
        .route("/users/:user_id/credits", post(admin::grant_credits))
        .route("/jobs", get(admin::list_jobs))
        .route("/stats", get(admin::stats));

    let upload_routes = Router::new()
        .route("/uploads", post(uploads::upload))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(RequestBodyLimitLayer::new(max_upload_bytes));

    // Create concurrency-limited API routes
    let api_routes = Router::new()
        .route("/packs", get(checkout::list_packs))
        // Credits
        .route("/credits/balance", get(credits::get_balance))
        // Jobs
        .route("/jobs", post(jobs::create_job).get(jobs::list_jobs))
        .route("/jobs/:job_id", get(jobs::get_job))
        // Codes
        .route("/codes/redeem", post(codes::redeem_code))
        // Payments
        .route("/checkout", post(checkout::create_checkout))
        .route("/payments", get(checkout::list_payments))
        .nest("/admin", admin_routes)
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        // Uploads carry their own, larger limit
        .merge(upload_routes)
        .layer(ConcurrencyLimitLayer::new(API_MAX_CONCURRENT_REQUESTS));

    Router::new()
        // Health (public, no rate limit)
        .route("/health", get(health::health))
        // API v1 routes (rate limited)
        .nest("/v1", api_routes)
        // Worker callbacks
        .route(
            "/internal/jobs/:job_id/report",
            post(internal::report_job).layer(RequestBodyLimitLayer::new(max_body_bytes)),
        )
        // Webhooks (no rate limit - controlled by the payment provider)
        .route(
            "/webhooks/payments",
            post(webhooks::payment_webhook).layer(RequestBodyLimitLayer::new(max_body_bytes)),
        )
        // Global middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(TimeoutLayer::new(Duration::from_secs(
            request_timeout_seconds,
        )))
        .with_state(state)
}

/// Build the CORS layer from configured origins.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
