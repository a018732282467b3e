//! Redemption code handler.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::AppState;

/// Redeem request.
#[derive(Debug, Deserialize)]
pub struct RedeemRequest {
    /// Code as typed by the user.
    pub code: String,
}

/// Redeem response.
#[derive(Debug, Serialize)]
pub struct RedeemResponse {
    /// Credits the code added.
    pub credits_added: i64,
    /// Balance afterwards.
    pub new_balance: i64,
}

/// Claim a code for the caller.
pub async fn redeem_code(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(body): Json<RedeemRequest>,
) -> Result<Json<RedeemResponse>, ApiError> {
    let redemption = state.codes.claim(&body.code, &auth.user_id).await?;

    Ok(Json(RedeemResponse {
        credits_added: redemption.credits,
        new_balance: redemption.balance,
    }))
}
