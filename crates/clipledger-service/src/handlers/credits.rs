//! Credit balance handler.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::AppState;

/// Balance response.
#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    /// Account owner.
    pub user_id: String,
    /// Credits available.
    pub balance: i64,
}

/// Get current credit balance. First contact creates the account.
pub async fn get_balance(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<BalanceResponse>, ApiError> {
    let balance = state.ledger.balance(&auth.user_id).await?;

    Ok(Json(BalanceResponse {
        user_id: auth.user_id.to_string(),
        balance,
    }))
}
