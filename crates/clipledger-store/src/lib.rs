//! Storage layer for clipledger.
//!
//! All mutual exclusion in clipledger lives here. Every state change is a
//! guarded write: it only applies while a precondition on the current row
//! still holds (`balance >= amount`, `status = 'pending'`,
//! `claimed_by IS NULL`, ...). A guarded write that matches nothing is a lost
//! race and comes back as an outcome value, never as an error.
//!
//! Compound operations (reserve + insert job, fail job + refund, settle
//! transaction + credit, claim code + credit) commit as one atomic unit.
//!
//! # Backends
//!
//! - [`MemoryStore`]: process-local, used by tests and single-node
//!   development.
//! - [`PgStore`]: PostgreSQL through `sqlx`, with embedded migrations.
//! - `RocksStore` (feature `rocksdb-backend`): `RocksDB` optimistic
//!   transactions with column families for the indexes.
//!
//! # Example
//!
//! ```no_run
//! use clipledger_core::{UserId, DEFAULT_STARTING_BALANCE};
//! use clipledger_store::{DebitOutcome, MemoryStore, Store};
//!
//! # async fn run() -> clipledger_store::Result<()> {
//! let store = MemoryStore::new();
//! let user = UserId::new("user_1").expect("valid id");
//!
//! store.ensure_account(&user, DEFAULT_STARTING_BALANCE).await?;
//! let outcome = store.debit(&user, 1).await?;
//! assert_eq!(outcome, DebitOutcome::Debited { balance: 2 });
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
#[cfg(feature = "rocksdb-backend")]
pub mod keys;
pub mod memory;
pub mod postgres;
#[cfg(feature = "rocksdb-backend")]
pub mod rocks;
#[cfg(feature = "rocksdb-backend")]
pub mod schema;

#[cfg(test)]
pub(crate) mod conformance;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use postgres::PgStore;
#[cfg(feature = "rocksdb-backend")]
pub use rocks::RocksStore;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use clipledger_core::{
    Account, Job, JobId, JobStatus, PaymentTransaction, RedemptionCode, TransactionId,
    TransactionStatus, UserId,
};

/// Result of a guarded balance decrement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebitOutcome {
    /// The amount was deducted.
    Debited {
        /// Balance after the deduction.
        balance: i64,
    },
    /// The balance could not cover the amount; nothing changed.
    Insufficient {
        /// Balance observed by the refused write.
        balance: i64,
    },
}

/// Result of settling a payment transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettleOutcome {
    /// The transaction flipped to `succeeded` and its credits were applied.
    Applied {
        /// Credited account.
        user_id: UserId,
        /// Credits applied.
        credits: i64,
        /// Balance after the credit.
        balance: i64,
    },
    /// The transaction was no longer pending; nothing changed.
    AlreadyFinal {
        /// Status found.
        status: TransactionStatus,
    },
    /// No transaction with this id exists.
    Missing,
}

/// Result of claiming a redemption code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// The code is now claimed by the caller and its credits were applied.
    Claimed {
        /// Credits applied.
        credits: i64,
        /// Balance after the credit.
        balance: i64,
    },
    /// Somebody already claimed the code.
    AlreadyClaimed,
    /// No such code.
    Missing,
}

/// Redemption status filter for code listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodeState {
    /// Not yet claimed.
    Pending,
    /// Claimed.
    Redeemed,
}

/// Filters for listing redemption codes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodeFilter {
    /// Only codes in this state.
    pub state: Option<CodeState>,
    /// Only codes worth exactly this many credits.
    pub credits: Option<i64>,
    /// Case-insensitive substring of the code.
    pub search: Option<String>,
}

impl CodeFilter {
    /// Whether a code passes the filter.
    #[must_use]
    pub fn matches(&self, code: &RedemptionCode) -> bool {
        let state_ok = match self.state {
            Some(CodeState::Pending) => !code.is_claimed(),
            Some(CodeState::Redeemed) => code.is_claimed(),
            None => true,
        };
        let credits_ok = self.credits.map_or(true, |c| code.credits == c);
        let search_ok = self
            .search
            .as_deref()
            .map_or(true, |s| code.code.contains(&s.trim().to_ascii_uppercase()));
        state_ok && credits_ok && search_ok
    }
}

/// One page of a listing plus the total number of matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page<T> {
    /// Items on this page.
    pub items: Vec<T>,
    /// Total matches across all pages.
    pub total: u64,
}

/// Aggregate counts for the admin dashboard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerStats {
    /// Accounts created.
    pub total_users: u64,
    /// Jobs created.
    pub total_jobs: u64,
    /// Jobs in `completed`.
    pub completed_jobs: u64,
    /// Unclaimed codes.
    pub pending_codes: u64,
    /// Claimed codes.
    pub redeemed_codes: u64,
}

/// Per-user job counts for account listings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounts {
    /// Jobs created by the user.
    pub total: u64,
    /// Of those, jobs in `completed`.
    pub completed: u64,
}

/// The storage trait defining all database operations.
///
/// This trait abstracts the storage layer, allowing for different implementations
/// (in-memory for tests, PostgreSQL, `RocksDB`).
#[async_trait]
pub trait Store: Send + Sync {
    // =========================================================================
    // Account Operations
    // =========================================================================

    /// Create the account with `starting_balance` if it does not exist, then
    /// read it. Concurrent callers all observe the same single account.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn ensure_account(&self, user_id: &UserId, starting_balance: i64) -> Result<Account>;

    /// Get an account by user ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_account(&self, user_id: &UserId) -> Result<Option<Account>>;

    /// List accounts, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_accounts(&self, limit: usize, offset: usize) -> Result<Page<Account>>;

    /// Guarded decrement: applies only while `balance >= amount`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the account doesn't exist.
    async fn debit(&self, user_id: &UserId, amount: i64) -> Result<DebitOutcome>;

    /// Atomic increment. Returns the new balance.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the account doesn't exist.
    async fn credit(&self, user_id: &UserId, amount: i64) -> Result<i64>;

    /// Link the payment provider's customer reference to an account.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the account doesn't exist.
    async fn set_payment_customer(&self, user_id: &UserId, customer_id: &str) -> Result<()>;

    // =========================================================================
    // Job Operations
    // =========================================================================

    /// Reserve `job.cost` from the owner's balance and insert the job, as one
    /// atomic unit. On `Insufficient` no job is stored.
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if the account doesn't exist.
    /// - `StoreError::AlreadyExists` if the job id is taken.
    async fn create_job(&self, job: &Job) -> Result<DebitOutcome>;

    /// Get a job by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_job(&self, job_id: &JobId) -> Result<Option<Job>>;

    /// List a user's jobs, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_jobs_by_user(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Job>>;

    /// List all jobs, optionally filtered by status, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_jobs(
        &self,
        status: Option<JobStatus>,
        limit: usize,
        offset: usize,
    ) -> Result<Page<Job>>;

    /// Job counts for each of `user_ids`. Users without jobs are absent
    /// from the map.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn job_counts(&self, user_ids: &[UserId]) -> Result<HashMap<UserId, JobCounts>>;

    /// List jobs in `status` whose last update is older than `before`,
    /// oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_stale_jobs(
        &self,
        status: JobStatus,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Job>>;

    /// Claim the next dispatch attempt: increments the attempt counter only
    /// while the job is `pending` and the counter still equals
    /// `seen_attempts`. Returns whether this caller won the claim.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn claim_dispatch_attempt(&self, job_id: &JobId, seen_attempts: u32) -> Result<bool>;

    /// Guarded `pending -> processing`, recording the provider's handle.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn mark_dispatched(&self, job_id: &JobId, handle: &str) -> Result<bool>;

    /// Record a transient dispatch failure on a job that is still `pending`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn record_dispatch_error(&self, job_id: &JobId, error: &str) -> Result<bool>;

    /// Guarded `pending | processing -> completed`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn complete_job(&self, job_id: &JobId) -> Result<bool>;

    /// Guarded transition into `failed` from one of `from`, refunding the
    /// job's cost in the same atomic unit. Returns the owner's new balance when
    /// this call performed the transition, `None` when it lost the race.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn fail_job(
        &self,
        job_id: &JobId,
        from: &[JobStatus],
        reason: &str,
    ) -> Result<Option<i64>>;

    // =========================================================================
    // Payment Transaction Operations
    // =========================================================================

    /// Insert a new payment transaction.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::AlreadyExists` if the id is taken.
    async fn insert_transaction(&self, transaction: &PaymentTransaction) -> Result<()>;

    /// Get a transaction by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_transaction(
        &self,
        transaction_id: &TransactionId,
    ) -> Result<Option<PaymentTransaction>>;

    /// List a user's transactions, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_transactions_by_user(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<PaymentTransaction>>;

    /// Guarded `pending -> succeeded` that gates the credit, as one atomic
    /// unit. At most one caller per transaction id ever sees `Applied`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the owning account doesn't exist.
    async fn settle_transaction(
        &self,
        transaction_id: &TransactionId,
        external_ref: Option<&str>,
    ) -> Result<SettleOutcome>;

    /// Guarded `pending -> failed`. Returns whether this call flipped it.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn fail_transaction(&self, transaction_id: &TransactionId) -> Result<bool>;

    // =========================================================================
    // Redemption Code Operations
    // =========================================================================

    /// Insert a code if no code with the same value exists. Returns whether it
    /// was inserted.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn insert_code(&self, code: &RedemptionCode) -> Result<bool>;

    /// Get a code by its normalized value.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_code(&self, code: &str) -> Result<Option<RedemptionCode>>;

    /// List codes matching `filter`, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_codes(
        &self,
        filter: &CodeFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Page<RedemptionCode>>;

    /// Guarded `claimed_by IS NULL -> user_id` that gates the credit, as one
    /// atomic unit.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the claiming account doesn't exist.
    async fn claim_code(&self, code: &str, user_id: &UserId) -> Result<ClaimOutcome>;

    // =========================================================================
    // Reporting
    // =========================================================================

    /// Dashboard counts.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn stats(&self) -> Result<LedgerStats>;
}
