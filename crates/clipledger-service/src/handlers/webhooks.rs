//! Payment webhook handler.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::Serialize;

use crate::error::ApiError;
use crate::ingest::{EventOutcome, SIGNATURE_HEADER};
use crate::state::AppState;

/// Webhook response.
#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    /// Whether the webhook was accepted.
    pub received: bool,
}

/// Handle payment provider webhooks.
///
/// Verified events always answer 200, including duplicates and events for
/// unknown transactions, so the provider stops redelivering them.
pub async fn payment_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>, ApiError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    let outcome = state.ingest.apply_event(&body, signature).await?;

    match outcome {
        EventOutcome::Credited { .. } | EventOutcome::Ignored => {}
        EventOutcome::Duplicate { status } => {
            tracing::debug!(status = %status, "Webhook acknowledged as duplicate");
        }
        EventOutcome::UnknownTransaction => {
            tracing::debug!("Webhook acknowledged without a matching transaction");
        }
    }

    Ok(Json(WebhookResponse { received: true }))
}
