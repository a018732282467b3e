//! Admin handlers. Every route requires the `admin` role.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use clipledger_core::{Account, JobStatus, RedemptionCode, UserId};
use clipledger_store::{CodeFilter, CodeState, JobCounts, LedgerStats, Store};

use crate::auth::AdminUser;
use crate::error::ApiError;
use crate::handlers::jobs::JobResponse;
use crate::handlers::{PageQuery, Paged};
use crate::state::AppState;

// ============================================================================
// Codes
// ============================================================================

/// Generate codes request.
#[derive(Debug, Deserialize)]
pub struct GenerateCodesRequest {
    /// Credits each code is worth.
    pub credits: i64,
    /// Number of codes (default: 1).
    #[serde(default = "default_count")]
    pub count: u32,
    /// Optional prefix, uppercased.
    #[serde(default)]
    pub prefix: Option<String>,
}

fn default_count() -> u32 {
    1
}

/// Code response.
#[derive(Debug, Serialize)]
pub struct CodeResponse {
    /// The code.
    pub code: String,
    /// Credits granted on redemption.
    pub credits: i64,
    /// Whether the code was redeemed.
    pub redeemed: bool,
    /// Redeeming user.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redeemed_by: Option<String>,
    /// Redemption timestamp.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redeemed_at: Option<String>,
    /// Creation timestamp.
    pub created_at: String,
}

impl From<&RedemptionCode> for CodeResponse {
    fn from(code: &RedemptionCode) -> Self {
        Self {
            code: code.code.clone(),
            credits: code.credits,
            redeemed: code.is_claimed(),
            redeemed_by: code.claimed_by.as_ref().map(ToString::to_string),
            redeemed_at: code.claimed_at.map(|t| t.to_rfc3339()),
            created_at: code.created_at.to_rfc3339(),
        }
    }
}

/// Generate codes response.
#[derive(Debug, Serialize)]
pub struct GenerateCodesResponse {
    /// Codes created.
    pub codes: Vec<CodeResponse>,
    /// Number of codes created.
    pub count: usize,
}

/// Mint a batch of redemption codes.
pub async fn generate_codes(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Json(body): Json<GenerateCodesRequest>,
) -> Result<Json<GenerateCodesResponse>, ApiError> {
    let prefix = body.prefix.as_deref().filter(|p| !p.trim().is_empty());
    let codes = state
        .codes
        .generate(prefix, body.count, body.credits)
        .await?;

    tracing::info!(
        admin = %admin.user_id,
        count = codes.len(),
        credits = body.credits,
        "Admin generated codes"
    );

    let codes: Vec<CodeResponse> = codes.iter().map(CodeResponse::from).collect();
    Ok(Json(GenerateCodesResponse {
        count: codes.len(),
        codes,
    }))
}

/// Code list query parameters.
#[derive(Debug, Deserialize)]
pub struct ListCodesQuery {
    /// Page number (default: 1).
    #[serde(default)]
    pub page: Option<usize>,
    /// Items per page (default: 20).
    #[serde(default)]
    pub page_size: Option<usize>,
    /// `pending` or `redeemed`.
    #[serde(default)]
    pub status: Option<CodeState>,
    /// Only codes worth this many credits.
    #[serde(default)]
    pub credits: Option<i64>,
    /// Substring of the code.
    #[serde(default)]
    pub search: Option<String>,
}

/// List codes with filters.
pub async fn list_codes(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Query(query): Query<ListCodesQuery>,
) -> Result<Json<Paged<CodeResponse>>, ApiError> {
    let page = page_query(query.page, query.page_size);
    let filter = CodeFilter {
        state: query.status,
        credits: query.credits,
        search: query.search.filter(|s| !s.trim().is_empty()),
    };

    let result = state
        .codes
        .list(&filter, page.limit(), page.offset())
        .await?;

    let items = result.items.iter().map(CodeResponse::from).collect();
    Ok(Json(Paged::new(items, result.total, &page)))
}

// ============================================================================
// Users
// ============================================================================

/// Account response.
#[derive(Debug, Serialize)]
pub struct AccountResponse {
    /// User ID.
    pub user_id: String,
    /// Credits available.
    pub balance: i64,
    /// Linked payment customer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_customer_id: Option<String>,
    /// Jobs the user created.
    pub total_jobs: u64,
    /// Of those, jobs that completed.
    pub completed_jobs: u64,
    /// Creation timestamp.
    pub created_at: String,
}

impl AccountResponse {
    fn new(account: &Account, jobs: JobCounts) -> Self {
        Self {
            user_id: account.user_id.to_string(),
            balance: account.balance,
            payment_customer_id: account.payment_customer_id.clone(),
            total_jobs: jobs.total,
            completed_jobs: jobs.completed,
            created_at: account.created_at.to_rfc3339(),
        }
    }
}

/// Plain pagination query.
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    /// Page number (default: 1).
    #[serde(default)]
    pub page: Option<usize>,
    /// Items per page (default: 20).
    #[serde(default)]
    pub page_size: Option<usize>,
}

/// List accounts.
pub async fn list_users(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Query(query): Query<ListQuery>,
) -> Result<Json<Paged<AccountResponse>>, ApiError> {
    let page = page_query(query.page, query.page_size);
    let result = state
        .store
        .list_accounts(page.limit(), page.offset())
        .await?;

    let user_ids: Vec<UserId> = result.items.iter().map(|a| a.user_id.clone()).collect();
    let counts = state.store.job_counts(&user_ids).await?;

    let items = result
        .items
        .iter()
        .map(|account| {
            let jobs = counts.get(&account.user_id).copied().unwrap_or_default();
            AccountResponse::new(account, jobs)
        })
        .collect();
    Ok(Json(Paged::new(items, result.total, &page)))
}

/// Grant credits request.
#[derive(Debug, Deserialize)]
pub struct GrantCreditsRequest {
    /// Credits to add; must be positive.
    pub amount: i64,
}

/// Grant credits response.
#[derive(Debug, Serialize)]
pub struct GrantCreditsResponse {
    /// Credited user.
    pub user_id: String,
    /// Credits added.
    pub credits_added: i64,
    /// Balance afterwards.
    pub new_balance: i64,
}

/// Add credits to an account through the ledger.
pub async fn grant_credits(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Path(user_id): Path<String>,
    Json(body): Json<GrantCreditsRequest>,
) -> Result<Json<GrantCreditsResponse>, ApiError> {
    let user_id: UserId = user_id
        .parse()
        .map_err(|e| ApiError::BadRequest(format!("invalid user id: {e}")))?;

    let new_balance = state.ledger.credit(&user_id, body.amount).await?;

    tracing::info!(
        admin = %admin.user_id,
        user_id = %user_id,
        amount = body.amount,
        new_balance,
        "Admin granted credits"
    );

    Ok(Json(GrantCreditsResponse {
        user_id: user_id.to_string(),
        credits_added: body.amount,
        new_balance,
    }))
}

// ============================================================================
// Jobs and stats
// ============================================================================

/// Job list query parameters.
#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    /// Page number (default: 1).
    #[serde(default)]
    pub page: Option<usize>,
    /// Items per page (default: 20).
    #[serde(default)]
    pub page_size: Option<usize>,
    /// Only jobs in this status.
    #[serde(default)]
    pub status: Option<JobStatus>,
}

/// Job with its owner.
#[derive(Debug, Serialize)]
pub struct AdminJobResponse {
    /// Owner.
    pub user_id: String,
    /// The job.
    #[serde(flatten)]
    pub job: JobResponse,
}

/// List jobs across all users.
pub async fn list_jobs(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Query(query): Query<ListJobsQuery>,
) -> Result<Json<Paged<AdminJobResponse>>, ApiError> {
    let page = page_query(query.page, query.page_size);
    let result = state
        .store
        .list_jobs(query.status, page.limit(), page.offset())
        .await?;

    let items = result
        .items
        .iter()
        .map(|job| AdminJobResponse {
            user_id: job.user_id.to_string(),
            job: JobResponse::new(job, state.objects.as_ref()),
        })
        .collect();
    Ok(Json(Paged::new(items, result.total, &page)))
}

/// Dashboard counters.
pub async fn stats(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
) -> Result<Json<LedgerStats>, ApiError> {
    Ok(Json(state.store.stats().await?))
}

fn page_query(page: Option<usize>, page_size: Option<usize>) -> PageQuery {
    let defaults = PageQuery::default();
    PageQuery {
        page: page.unwrap_or(defaults.page),
        page_size: page_size.unwrap_or(defaults.page_size),
    }
}
