//! PostgreSQL storage implementation.
//!
//! Guarded writes are single `UPDATE ... WHERE <precondition> RETURNING`
//! statements; under READ COMMITTED a concurrent writer re-evaluates the
//! predicate against the committed row, so a lost race matches zero rows.
//! Compound operations run inside one transaction.

use std::collections::HashMap;
use std::fmt::Display;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{FromRow, PgConnection};

use clipledger_core::{
    Account, Job, JobId, JobStatus, PaymentTransaction, RedemptionCode, TransactionId,
    TransactionStatus, UserId,
};

use crate::error::{Result, StoreError};
use crate::{
    ClaimOutcome, CodeFilter, CodeState, DebitOutcome, JobCounts, LedgerStats, Page, SettleOutcome,
    Store,
};

/// Column list for `accounts` queries.
const ACCOUNT_COLUMNS: &str = "user_id, balance, payment_customer_id, created_at, updated_at";

/// Column list for `jobs` queries.
const JOB_COLUMNS: &str = "id, user_id, status, input_key, output_key, quality, cost, \
    dispatch_attempts, last_dispatch_error, dispatch_handle, failure_reason, created_at, updated_at";

/// Column list for `payment_transactions` queries.
const TRANSACTION_COLUMNS: &str = "id, user_id, amount_cents, credits, pack, status, \
    external_ref, created_at, updated_at";

/// Column list for `redemption_codes` queries.
const CODE_COLUMNS: &str = "code, credits, claimed_by, claimed_at, created_at";

/// Shared predicate for code listings. Binds: `$1` redeemed flag, `$2`
/// credits, `$3` search text.
const CODE_FILTER: &str = "($1::boolean IS NULL OR (claimed_by IS NOT NULL) = $1) \
    AND ($2::bigint IS NULL OR credits = $2) \
    AND ($3::text IS NULL OR code LIKE '%' || upper($3) || '%')";

fn corrupt(err: impl Display) -> StoreError {
    StoreError::Serialization(err.to_string())
}

fn sql_limit(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn count(n: i64) -> u64 {
    u64::try_from(n).unwrap_or(0)
}

// =============================================================================
// Row types
// =============================================================================

#[derive(FromRow)]
struct AccountRow {
    user_id: String,
    balance: i64,
    payment_customer_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<AccountRow> for Account {
    type Error = StoreError;

    fn try_from(row: AccountRow) -> Result<Self> {
        Ok(Self {
            user_id: UserId::new(row.user_id).map_err(corrupt)?,
            balance: row.balance,
            payment_customer_id: row.payment_customer_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(FromRow)]
struct JobRow {
    id: String,
    user_id: String,
    status: String,
    input_key: String,
    output_key: String,
    quality: String,
    cost: i64,
    dispatch_attempts: i32,
    last_dispatch_error: Option<String>,
    dispatch_handle: Option<String>,
    failure_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<JobRow> for Job {
    type Error = StoreError;

    fn try_from(row: JobRow) -> Result<Self> {
        Ok(Self {
            id: row.id.parse().map_err(corrupt)?,
            user_id: UserId::new(row.user_id).map_err(corrupt)?,
            status: row.status.parse().map_err(corrupt)?,
            input_key: row.input_key,
            output_key: row.output_key,
            quality: row.quality.parse().map_err(corrupt)?,
            cost: row.cost,
            dispatch_attempts: u32::try_from(row.dispatch_attempts).map_err(corrupt)?,
            last_dispatch_error: row.last_dispatch_error,
            dispatch_handle: row.dispatch_handle,
            failure_reason: row.failure_reason,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(FromRow)]
struct TransactionRow {
    id: String,
    user_id: String,
    amount_cents: i64,
    credits: i64,
    pack: String,
    status: String,
    external_ref: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<TransactionRow> for PaymentTransaction {
    type Error = StoreError;

    fn try_from(row: TransactionRow) -> Result<Self> {
        Ok(Self {
            id: row.id.parse().map_err(corrupt)?,
            user_id: UserId::new(row.user_id).map_err(corrupt)?,
            amount_cents: row.amount_cents,
            credits: row.credits,
            pack: row.pack,
            status: row.status.parse().map_err(corrupt)?,
            external_ref: row.external_ref,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(FromRow)]
struct CodeRow {
    code: String,
    credits: i64,
    claimed_by: Option<String>,
    claimed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<CodeRow> for RedemptionCode {
    type Error = StoreError;

    fn try_from(row: CodeRow) -> Result<Self> {
        Ok(Self {
            code: row.code,
            credits: row.credits,
            claimed_by: row.claimed_by.map(UserId::new).transpose().map_err(corrupt)?,
            claimed_at: row.claimed_at,
            created_at: row.created_at,
        })
    }
}

#[derive(FromRow)]
struct JobCountRow {
    user_id: String,
    total: i64,
    completed: i64,
}

#[derive(FromRow)]
struct StatsRow {
    total_users: i64,
    total_jobs: i64,
    completed_jobs: i64,
    pending_codes: i64,
    redeemed_codes: i64,
}

fn convert<R, T>(rows: Vec<R>) -> Result<Vec<T>>
where
    T: TryFrom<R, Error = StoreError>,
{
    rows.into_iter().map(T::try_from).collect()
}

// =============================================================================
// Guarded primitives shared by plain and compound operations
// =============================================================================

async fn debit_in(conn: &mut PgConnection, user_id: &UserId, amount: i64) -> Result<DebitOutcome> {
    let updated: Option<i64> = sqlx::query_scalar(
        "UPDATE accounts SET balance = balance - $2, updated_at = now()
         WHERE user_id = $1 AND balance >= $2
         RETURNING balance",
    )
    .bind(user_id.as_str())
    .bind(amount)
    .fetch_optional(&mut *conn)
    .await?;

    if let Some(balance) = updated {
        return Ok(DebitOutcome::Debited { balance });
    }

    let current: Option<i64> = sqlx::query_scalar("SELECT balance FROM accounts WHERE user_id = $1")
        .bind(user_id.as_str())
        .fetch_optional(&mut *conn)
        .await?;
    current
        .map(|balance| DebitOutcome::Insufficient { balance })
        .ok_or(StoreError::NotFound)
}

async fn credit_in(conn: &mut PgConnection, user_id: &UserId, amount: i64) -> Result<i64> {
    let balance: Option<i64> = sqlx::query_scalar(
        "UPDATE accounts SET balance = balance + $2, updated_at = now()
         WHERE user_id = $1
         RETURNING balance",
    )
    .bind(user_id.as_str())
    .bind(amount)
    .fetch_optional(&mut *conn)
    .await?;
    balance.ok_or(StoreError::NotFound)
}

/// PostgreSQL-backed storage implementation.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect a pool to `database_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be reached.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    #[must_use]
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply the embedded schema migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if a migration fails.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        tracing::info!("database migrations applied");
        Ok(())
    }
}

#[async_trait]
impl Store for PgStore {
    // =========================================================================
    // Account Operations
    // =========================================================================

    async fn ensure_account(&self, user_id: &UserId, starting_balance: i64) -> Result<Account> {
        sqlx::query(
            "INSERT INTO accounts (user_id, balance) VALUES ($1, $2)
             ON CONFLICT (user_id) DO NOTHING",
        )
        .bind(user_id.as_str())
        .bind(starting_balance)
        .execute(&self.pool)
        .await?;

        self.get_account(user_id).await?.ok_or(StoreError::NotFound)
    }

    async fn get_account(&self, user_id: &UserId) -> Result<Option<Account>> {
        let query = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE user_id = $1");
        sqlx::query_as::<_, AccountRow>(&query)
            .bind(user_id.as_str())
            .fetch_optional(&self.pool)
            .await?
            .map(Account::try_from)
            .transpose()
    }

    async fn list_accounts(&self, limit: usize, offset: usize) -> Result<Page<Account>> {
        let query = format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts
             ORDER BY created_at DESC, user_id
             LIMIT $1 OFFSET $2"
        );
        let rows = sqlx::query_as::<_, AccountRow>(&query)
            .bind(sql_limit(limit))
            .bind(sql_limit(offset))
            .fetch_all(&self.pool)
            .await?;
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM accounts")
            .fetch_one(&self.pool)
            .await?;

        Ok(Page {
            items: convert(rows)?,
            total: count(total),
        })
    }

    async fn debit(&self, user_id: &UserId, amount: i64) -> Result<DebitOutcome> {
        let mut conn = self.pool.acquire().await?;
        debit_in(&mut conn, user_id, amount).await
    }

    async fn credit(&self, user_id: &UserId, amount: i64) -> Result<i64> {
        let mut conn = self.pool.acquire().await?;
        credit_in(&mut conn, user_id, amount).await
    }

    async fn set_payment_customer(&self, user_id: &UserId, customer_id: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE accounts SET payment_customer_id = $2, updated_at = now() WHERE user_id = $1",
        )
        .bind(user_id.as_str())
        .bind(customer_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    // =========================================================================
    // Job Operations
    // =========================================================================

    async fn create_job(&self, job: &Job) -> Result<DebitOutcome> {
        let mut tx = self.pool.begin().await?;

        let outcome = debit_in(&mut tx, &job.user_id, job.cost).await?;
        if matches!(outcome, DebitOutcome::Insufficient { .. }) {
            tx.rollback().await?;
            return Ok(outcome);
        }

        sqlx::query(
            "INSERT INTO jobs
                (id, user_id, status, input_key, output_key, quality, cost,
                 dispatch_attempts, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(job.id.to_string())
        .bind(job.user_id.as_str())
        .bind(job.status.as_str())
        .bind(&job.input_key)
        .bind(&job.output_key)
        .bind(job.quality.as_str())
        .bind(job.cost)
        .bind(i32::try_from(job.dispatch_attempts).unwrap_or(i32::MAX))
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(outcome)
    }

    async fn get_job(&self, job_id: &JobId) -> Result<Option<Job>> {
        let query = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1");
        sqlx::query_as::<_, JobRow>(&query)
            .bind(job_id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .map(Job::try_from)
            .transpose()
    }

    async fn list_jobs_by_user(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Job>> {
        let query = format!(
            "SELECT {JOB_COLUMNS} FROM jobs
             WHERE user_id = $1
             ORDER BY created_at DESC, id DESC
             LIMIT $2 OFFSET $3"
        );
        let rows = sqlx::query_as::<_, JobRow>(&query)
            .bind(user_id.as_str())
            .bind(sql_limit(limit))
            .bind(sql_limit(offset))
            .fetch_all(&self.pool)
            .await?;
        convert(rows)
    }

    async fn list_jobs(
        &self,
        status: Option<JobStatus>,
        limit: usize,
        offset: usize,
    ) -> Result<Page<Job>> {
        let status = status.map(JobStatus::as_str);
        let query = format!(
            "SELECT {JOB_COLUMNS} FROM jobs
             WHERE ($1::text IS NULL OR status = $1)
             ORDER BY created_at DESC, id DESC
             LIMIT $2 OFFSET $3"
        );
        let rows = sqlx::query_as::<_, JobRow>(&query)
            .bind(status)
            .bind(sql_limit(limit))
            .bind(sql_limit(offset))
            .fetch_all(&self.pool)
            .await?;
        let total: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE ($1::text IS NULL OR status = $1)")
                .bind(status)
                .fetch_one(&self.pool)
                .await?;

        Ok(Page {
            items: convert(rows)?,
            total: count(total),
        })
    }

    async fn job_counts(&self, user_ids: &[UserId]) -> Result<HashMap<UserId, JobCounts>> {
        let ids: Vec<String> = user_ids.iter().map(ToString::to_string).collect();
        let rows = sqlx::query_as::<_, JobCountRow>(
            "SELECT user_id,
                    COUNT(*) AS total,
                    COUNT(*) FILTER (WHERE status = 'completed') AS completed
             FROM jobs
             WHERE user_id = ANY($1)
             GROUP BY user_id",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let counts = JobCounts {
                    total: count(row.total),
                    completed: count(row.completed),
                };
                Ok((UserId::new(row.user_id).map_err(corrupt)?, counts))
            })
            .collect()
    }

    async fn list_stale_jobs(
        &self,
        status: JobStatus,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Job>> {
        let query = format!(
            "SELECT {JOB_COLUMNS} FROM jobs
             WHERE status = $1 AND updated_at < $2
             ORDER BY updated_at
             LIMIT $3"
        );
        let rows = sqlx::query_as::<_, JobRow>(&query)
            .bind(status.as_str())
            .bind(before)
            .bind(sql_limit(limit))
            .fetch_all(&self.pool)
            .await?;
        convert(rows)
    }

    async fn claim_dispatch_attempt(&self, job_id: &JobId, seen_attempts: u32) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE jobs SET dispatch_attempts = dispatch_attempts + 1, updated_at = now()
             WHERE id = $1 AND status = 'pending' AND dispatch_attempts = $2",
        )
        .bind(job_id.to_string())
        .bind(i32::try_from(seen_attempts).unwrap_or(i32::MAX))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_dispatched(&self, job_id: &JobId, handle: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE jobs
             SET status = 'processing', dispatch_handle = $2, last_dispatch_error = NULL,
                 updated_at = now()
             WHERE id = $1 AND status = 'pending'",
        )
        .bind(job_id.to_string())
        .bind(handle)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn record_dispatch_error(&self, job_id: &JobId, error: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE jobs SET last_dispatch_error = $2, updated_at = now()
             WHERE id = $1 AND status = 'pending'",
        )
        .bind(job_id.to_string())
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn complete_job(&self, job_id: &JobId) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'completed', updated_at = now()
             WHERE id = $1 AND status IN ('pending', 'processing')",
        )
        .bind(job_id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn fail_job(
        &self,
        job_id: &JobId,
        from: &[JobStatus],
        reason: &str,
    ) -> Result<Option<i64>> {
        let from: Vec<&'static str> = from
            .iter()
            .filter(|status| status.can_transition_to(JobStatus::Failed))
            .map(|status| status.as_str())
            .collect();

        let mut tx = self.pool.begin().await?;
        let failed: Option<(String, i64)> = sqlx::query_as(
            "UPDATE jobs SET status = 'failed', failure_reason = $2, updated_at = now()
             WHERE id = $1 AND status = ANY($3)
             RETURNING user_id, cost",
        )
        .bind(job_id.to_string())
        .bind(reason)
        .bind(from)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((owner, cost)) = failed else {
            tx.rollback().await?;
            return Ok(None);
        };

        let owner = UserId::new(owner).map_err(corrupt)?;
        let balance = credit_in(&mut tx, &owner, cost).await?;
        tx.commit().await?;
        Ok(Some(balance))
    }

    // =========================================================================
    // Payment Transaction Operations
    // =========================================================================

    async fn insert_transaction(&self, transaction: &PaymentTransaction) -> Result<()> {
        sqlx::query(
            "INSERT INTO payment_transactions
                (id, user_id, amount_cents, credits, pack, status, external_ref,
                 created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(transaction.id.to_string())
        .bind(transaction.user_id.as_str())
        .bind(transaction.amount_cents)
        .bind(transaction.credits)
        .bind(&transaction.pack)
        .bind(transaction.status.as_str())
        .bind(&transaction.external_ref)
        .bind(transaction.created_at)
        .bind(transaction.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_transaction(
        &self,
        transaction_id: &TransactionId,
    ) -> Result<Option<PaymentTransaction>> {
        let query = format!("SELECT {TRANSACTION_COLUMNS} FROM payment_transactions WHERE id = $1");
        sqlx::query_as::<_, TransactionRow>(&query)
            .bind(transaction_id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .map(PaymentTransaction::try_from)
            .transpose()
    }

    async fn list_transactions_by_user(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<PaymentTransaction>> {
        let query = format!(
            "SELECT {TRANSACTION_COLUMNS} FROM payment_transactions
             WHERE user_id = $1
             ORDER BY created_at DESC, id DESC
             LIMIT $2 OFFSET $3"
        );
        let rows = sqlx::query_as::<_, TransactionRow>(&query)
            .bind(user_id.as_str())
            .bind(sql_limit(limit))
            .bind(sql_limit(offset))
            .fetch_all(&self.pool)
            .await?;
        convert(rows)
    }

    async fn settle_transaction(
        &self,
        transaction_id: &TransactionId,
        external_ref: Option<&str>,
    ) -> Result<SettleOutcome> {
        let mut tx = self.pool.begin().await?;
        let settled: Option<(String, i64)> = sqlx::query_as(
            "UPDATE payment_transactions
             SET status = 'succeeded', external_ref = COALESCE($2, external_ref),
                 updated_at = now()
             WHERE id = $1 AND status = 'pending'
             RETURNING user_id, credits",
        )
        .bind(transaction_id.to_string())
        .bind(external_ref)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((owner, credits)) = settled else {
            let status: Option<String> =
                sqlx::query_scalar("SELECT status FROM payment_transactions WHERE id = $1")
                    .bind(transaction_id.to_string())
                    .fetch_optional(&mut *tx)
                    .await?;
            tx.rollback().await?;

            return match status {
                None => Ok(SettleOutcome::Missing),
                Some(status) => Ok(SettleOutcome::AlreadyFinal {
                    status: status.parse::<TransactionStatus>().map_err(corrupt)?,
                }),
            };
        };

        let user_id = UserId::new(owner).map_err(corrupt)?;
        let balance = credit_in(&mut tx, &user_id, credits).await?;
        tx.commit().await?;

        Ok(SettleOutcome::Applied {
            user_id,
            credits,
            balance,
        })
    }

    async fn fail_transaction(&self, transaction_id: &TransactionId) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE payment_transactions SET status = 'failed', updated_at = now()
             WHERE id = $1 AND status = 'pending'",
        )
        .bind(transaction_id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    // =========================================================================
    // Redemption Code Operations
    // =========================================================================

    async fn insert_code(&self, code: &RedemptionCode) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO redemption_codes (code, credits, claimed_by, claimed_at, created_at)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (code) DO NOTHING",
        )
        .bind(&code.code)
        .bind(code.credits)
        .bind(code.claimed_by.as_ref().map(UserId::as_str))
        .bind(code.claimed_at)
        .bind(code.created_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_code(&self, code: &str) -> Result<Option<RedemptionCode>> {
        let query = format!("SELECT {CODE_COLUMNS} FROM redemption_codes WHERE code = $1");
        sqlx::query_as::<_, CodeRow>(&query)
            .bind(code)
            .fetch_optional(&self.pool)
            .await?
            .map(RedemptionCode::try_from)
            .transpose()
    }

    async fn list_codes(
        &self,
        filter: &CodeFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Page<RedemptionCode>> {
        let redeemed = filter.state.map(|state| state == CodeState::Redeemed);
        let search = filter.search.as_deref().map(str::trim);

        let query = format!(
            "SELECT {CODE_COLUMNS} FROM redemption_codes
             WHERE {CODE_FILTER}
             ORDER BY created_at DESC, code
             LIMIT $4 OFFSET $5"
        );
        let rows = sqlx::query_as::<_, CodeRow>(&query)
            .bind(redeemed)
            .bind(filter.credits)
            .bind(search)
            .bind(sql_limit(limit))
            .bind(sql_limit(offset))
            .fetch_all(&self.pool)
            .await?;

        let count_query = format!("SELECT COUNT(*) FROM redemption_codes WHERE {CODE_FILTER}");
        let total: i64 = sqlx::query_scalar(&count_query)
            .bind(redeemed)
            .bind(filter.credits)
            .bind(search)
            .fetch_one(&self.pool)
            .await?;

        Ok(Page {
            items: convert(rows)?,
            total: count(total),
        })
    }

    async fn claim_code(&self, code: &str, user_id: &UserId) -> Result<ClaimOutcome> {
        let mut tx = self.pool.begin().await?;
        let claimed: Option<i64> = sqlx::query_scalar(
            "UPDATE redemption_codes SET claimed_by = $2, claimed_at = now()
             WHERE code = $1 AND claimed_by IS NULL
             RETURNING credits",
        )
        .bind(code)
        .bind(user_id.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(credits) = claimed else {
            let exists: bool =
                sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM redemption_codes WHERE code = $1)")
                    .bind(code)
                    .fetch_one(&mut *tx)
                    .await?;
            tx.rollback().await?;
            return Ok(if exists {
                ClaimOutcome::AlreadyClaimed
            } else {
                ClaimOutcome::Missing
            });
        };

        let balance = credit_in(&mut tx, user_id, credits).await?;
        tx.commit().await?;
        Ok(ClaimOutcome::Claimed { credits, balance })
    }

    // =========================================================================
    // Reporting
    // =========================================================================

    async fn stats(&self) -> Result<LedgerStats> {
        let row = sqlx::query_as::<_, StatsRow>(
            "SELECT
                (SELECT COUNT(*) FROM accounts) AS total_users,
                (SELECT COUNT(*) FROM jobs) AS total_jobs,
                (SELECT COUNT(*) FROM jobs WHERE status = 'completed') AS completed_jobs,
                (SELECT COUNT(*) FROM redemption_codes WHERE claimed_by IS NULL) AS pending_codes,
                (SELECT COUNT(*) FROM redemption_codes WHERE claimed_by IS NOT NULL) AS redeemed_codes",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(LedgerStats {
            total_users: count(row.total_users),
            total_jobs: count(row.total_jobs),
            completed_jobs: count(row.completed_jobs),
            pending_codes: count(row.pending_codes),
            redeemed_codes: count(row.redeemed_codes),
        })
    }
}
