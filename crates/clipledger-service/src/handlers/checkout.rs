//! Credit pack checkout and payment history handlers.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use clipledger_core::{CreditPack, PaymentTransaction, TransactionStatus};
use clipledger_store::Store;

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::AppState;

/// Checkout request.
#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    /// Pack to buy: `starter`, `pro` or `business`.
    pub pack: String,
}

/// Checkout response.
#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    /// Hosted checkout page.
    pub checkout_url: String,
    /// Provider checkout id.
    pub session_id: String,
    /// Pending transaction backing the checkout.
    pub transaction_id: String,
}

/// Start buying a credit pack.
pub async fn create_checkout(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(body): Json<CheckoutRequest>,
) -> Result<Json<CheckoutResponse>, ApiError> {
    let pack: CreditPack = body
        .pack
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("unknown pack: {}", body.pack)))?;

    tracing::info!(user_id = %auth.user_id, pack = %pack, "Initiating credit purchase");

    let checkout = state.ingest.checkout(&auth.user_id, pack).await?;

    Ok(Json(CheckoutResponse {
        checkout_url: checkout.checkout_url,
        session_id: checkout.session_id,
        transaction_id: checkout.transaction.id.to_string(),
    }))
}

/// Credit pack catalog entry.
#[derive(Debug, Serialize)]
pub struct PackResponse {
    /// Pack name.
    pub pack: CreditPack,
    /// Credits granted.
    pub credits: i64,
    /// Price in cents.
    pub price_cents: i64,
}

/// List the credit packs on sale.
pub async fn list_packs() -> Json<Vec<PackResponse>> {
    Json(
        CreditPack::ALL
            .iter()
            .map(|&pack| PackResponse {
                pack,
                credits: pack.credits(),
                price_cents: pack.price_cents(),
            })
            .collect(),
    )
}

/// Payment list query parameters.
#[derive(Debug, Deserialize)]
pub struct ListPaymentsQuery {
    /// Maximum number of payments to return (default: 50).
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Offset for pagination (default: 0).
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    50
}

/// Payment response.
#[derive(Debug, Serialize)]
pub struct PaymentResponse {
    /// Transaction ID.
    pub id: String,
    /// Pack bought.
    pub pack: String,
    /// Credits bought.
    pub credits: i64,
    /// Price in cents.
    pub amount_cents: i64,
    /// Settlement status.
    pub status: TransactionStatus,
    /// Timestamp.
    pub created_at: String,
}

impl From<&PaymentTransaction> for PaymentResponse {
    fn from(tx: &PaymentTransaction) -> Self {
        Self {
            id: tx.id.to_string(),
            pack: tx.pack.clone(),
            credits: tx.credits,
            amount_cents: tx.amount_cents,
            status: tx.status,
            created_at: tx.created_at.to_rfc3339(),
        }
    }
}

/// List payments response.
#[derive(Debug, Serialize)]
pub struct ListPaymentsResponse {
    /// Payments (newest first).
    pub payments: Vec<PaymentResponse>,
    /// Whether there are more payments.
    pub has_more: bool,
}

/// List the caller's purchases.
pub async fn list_payments(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(query): Query<ListPaymentsQuery>,
) -> Result<Json<ListPaymentsResponse>, ApiError> {
    let limit = query.limit.min(100);
    let transactions = state
        .store
        .list_transactions_by_user(&auth.user_id, limit + 1, query.offset)
        .await?;

    let has_more = transactions.len() > limit;
    let payments = transactions
        .iter()
        .take(limit)
        .map(PaymentResponse::from)
        .collect();

    Ok(Json(ListPaymentsResponse { payments, has_more }))
}
