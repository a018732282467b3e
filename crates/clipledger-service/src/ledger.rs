//! The ledger facade.
//!
//! Every balance change in the service goes through [`LedgerService`] or
//! through one of the compound store operations it shares primitives with
//! (job reservation, code claims, transaction settlement). Amounts are
//! validated here; exclusion is left to the store's guarded writes.

use std::sync::Arc;

use clipledger_core::{Account, Job, JobStatus, LedgerError, UserId, MAX_CREDIT_AMOUNT};
use clipledger_store::{DebitOutcome, Store};

use crate::error::Result;

/// Reservation, refund and credit operations on account balances.
#[derive(Clone)]
pub struct LedgerService {
    store: Arc<dyn Store>,
    starting_balance: i64,
}

impl LedgerService {
    /// Create a ledger over `store`, granting `starting_balance` to new accounts.
    pub fn new(store: Arc<dyn Store>, starting_balance: i64) -> Self {
        Self {
            store,
            starting_balance,
        }
    }

    /// Balance granted on first touch.
    #[must_use]
    pub fn starting_balance(&self) -> i64 {
        self.starting_balance
    }

    /// Create the account with the starting balance if absent, then read it.
    pub async fn ensure_account(&self, user_id: &UserId) -> Result<Account> {
        Ok(self
            .store
            .ensure_account(user_id, self.starting_balance)
            .await?)
    }

    /// Current balance, creating the account lazily.
    pub async fn balance(&self, user_id: &UserId) -> Result<i64> {
        Ok(self.ensure_account(user_id).await?.balance)
    }

    /// Deduct `amount` if the balance covers it. Returns the new balance.
    pub async fn reserve(&self, user_id: &UserId, amount: i64) -> Result<i64> {
        validate_amount(amount)?;
        self.ensure_account(user_id).await?;

        match self.store.debit(user_id, amount).await? {
            DebitOutcome::Debited { balance } => {
                tracing::info!(user_id = %user_id, amount, balance, "Credits reserved");
                Ok(balance)
            }
            DebitOutcome::Insufficient { balance } => {
                tracing::info!(
                    user_id = %user_id,
                    balance,
                    required = amount,
                    "Reservation refused"
                );
                Err(LedgerError::InsufficientCredit {
                    balance,
                    required: amount,
                }
                .into())
            }
        }
    }

    /// Add `amount`, creating the account first if needed. Returns the new balance.
    pub async fn credit(&self, user_id: &UserId, amount: i64) -> Result<i64> {
        validate_amount(amount)?;
        self.ensure_account(user_id).await?;

        let balance = self.store.credit(user_id, amount).await?;
        tracing::info!(user_id = %user_id, amount, balance, "Credits added");
        Ok(balance)
    }

    /// Move `job` into `failed` and credit its cost back, once.
    ///
    /// Returns the owner's new balance if this call performed the
    /// transition, `None` if the job was already terminal.
    pub async fn refund(&self, job: &Job, reason: &str) -> Result<Option<i64>> {
        self.refund_from(job, &JobStatus::ACTIVE, reason).await
    }

    /// Like [`refund`](Self::refund), but only while the job is still in one
    /// of `from`. A job that moved on since `job` was read is left alone.
    pub async fn refund_from(
        &self,
        job: &Job,
        from: &[JobStatus],
        reason: &str,
    ) -> Result<Option<i64>> {
        let refunded = self.store.fail_job(&job.id, from, reason).await?;

        match refunded {
            Some(balance) => tracing::info!(
                job_id = %job.id,
                user_id = %job.user_id,
                cost = job.cost,
                balance,
                reason = %reason,
                "Job failed and refunded"
            ),
            None => tracing::debug!(
                job_id = %job.id,
                from = ?from,
                "Refund skipped, job no longer in a refundable state"
            ),
        }
        Ok(refunded)
    }
}

fn validate_amount(amount: i64) -> Result<()> {
    if amount <= 0 {
        return Err(LedgerError::InvalidAmount(format!("{amount} must be positive")).into());
    }
    if amount > MAX_CREDIT_AMOUNT {
        return Err(LedgerError::InvalidAmount(format!(
            "{amount} exceeds the limit of {MAX_CREDIT_AMOUNT}"
        ))
        .into());
    }
    Ok(())
}
