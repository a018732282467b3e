//! Liveness probe.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::state::AppState;

/// Liveness response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Always `ok` while the process serves requests.
    pub status: &'static str,
    /// Service name.
    pub service: &'static str,
    /// Crate version.
    pub version: &'static str,
    /// Which optional collaborators are wired in.
    pub integrations: Integrations,
}

/// Optional collaborator status.
#[derive(Debug, Serialize)]
pub struct Integrations {
    /// Jobs are submitted to a compute provider.
    pub dispatch: bool,
    /// Webhook signatures are checked.
    pub signed_webhooks: bool,
}

/// `GET /health`.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: "clipledger",
        version: env!("CARGO_PKG_VERSION"),
        integrations: Integrations {
            dispatch: state.has_dispatcher(),
            signed_webhooks: state.config.creem_webhook_secret.is_some(),
        },
    })
}
