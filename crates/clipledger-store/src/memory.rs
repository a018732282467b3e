//! In-memory storage implementation.
//!
//! One mutex guards every table, so each operation (including the compound
//! ones) is trivially atomic. The lock is never held across an `.await`.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use clipledger_core::{
    Account, Job, JobId, JobStatus, PaymentTransaction, RedemptionCode, TransactionId,
    TransactionStatus, UserId,
};

use crate::error::{Result, StoreError};
use crate::{
    ClaimOutcome, CodeFilter, CodeState, DebitOutcome, JobCounts, LedgerStats, Page, SettleOutcome,
    Store,
};

#[derive(Default)]
struct Tables {
    accounts: HashMap<UserId, Account>,
    jobs: HashMap<JobId, Job>,
    transactions: HashMap<TransactionId, PaymentTransaction>,
    codes: HashMap<String, RedemptionCode>,
}

impl Tables {
    fn account_mut(&mut self, user_id: &UserId) -> Result<&mut Account> {
        self.accounts.get_mut(user_id).ok_or(StoreError::NotFound)
    }

    fn debit(&mut self, user_id: &UserId, amount: i64) -> Result<DebitOutcome> {
        let account = self.account_mut(user_id)?;
        if !account.has_sufficient_credits(amount) {
            return Ok(DebitOutcome::Insufficient {
                balance: account.balance,
            });
        }
        account.balance -= amount;
        account.updated_at = Utc::now();
        Ok(DebitOutcome::Debited {
            balance: account.balance,
        })
    }

    fn credit(&mut self, user_id: &UserId, amount: i64) -> Result<i64> {
        let account = self.account_mut(user_id)?;
        account.balance = account
            .balance
            .checked_add(amount)
            .ok_or(StoreError::Overflow)?;
        account.updated_at = Utc::now();
        Ok(account.balance)
    }
}

/// Process-local store.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| StoreError::Database("memory store lock poisoned".into()))
    }
}

/// Sort newest first by creation time, then cut a page.
fn paginate<T: Clone>(
    mut items: Vec<T>,
    created: impl Fn(&T) -> DateTime<Utc>,
    limit: usize,
    offset: usize,
) -> Page<T> {
    items.sort_by_key(|item| std::cmp::Reverse(created(item)));
    let total = items.len() as u64;
    let items = items.into_iter().skip(offset).take(limit).collect();
    Page { items, total }
}

#[async_trait]
impl Store for MemoryStore {
    // =========================================================================
    // Account Operations
    // =========================================================================

    async fn ensure_account(&self, user_id: &UserId, starting_balance: i64) -> Result<Account> {
        let mut tables = self.lock()?;
        let account = tables
            .accounts
            .entry(user_id.clone())
            .or_insert_with(|| Account::new(user_id.clone(), starting_balance));
        Ok(account.clone())
    }

    async fn get_account(&self, user_id: &UserId) -> Result<Option<Account>> {
        Ok(self.lock()?.accounts.get(user_id).cloned())
    }

    async fn list_accounts(&self, limit: usize, offset: usize) -> Result<Page<Account>> {
        let accounts = self.lock()?.accounts.values().cloned().collect();
        Ok(paginate(accounts, |a: &Account| a.created_at, limit, offset))
    }

    async fn debit(&self, user_id: &UserId, amount: i64) -> Result<DebitOutcome> {
        self.lock()?.debit(user_id, amount)
    }

    async fn credit(&self, user_id: &UserId, amount: i64) -> Result<i64> {
        self.lock()?.credit(user_id, amount)
    }

    async fn set_payment_customer(&self, user_id: &UserId, customer_id: &str) -> Result<()> {
        let mut tables = self.lock()?;
        let account = tables.account_mut(user_id)?;
        account.payment_customer_id = Some(customer_id.to_string());
        account.updated_at = Utc::now();
        Ok(())
    }

    // =========================================================================
    // Job Operations
    // =========================================================================

    async fn create_job(&self, job: &Job) -> Result<DebitOutcome> {
        let mut tables = self.lock()?;
        if tables.jobs.contains_key(&job.id) {
            return Err(StoreError::AlreadyExists(job.id.to_string()));
        }

        let outcome = tables.debit(&job.user_id, job.cost)?;
        if matches!(outcome, DebitOutcome::Debited { .. }) {
            tables.jobs.insert(job.id, job.clone());
        }
        Ok(outcome)
    }

    async fn get_job(&self, job_id: &JobId) -> Result<Option<Job>> {
        Ok(self.lock()?.jobs.get(job_id).cloned())
    }

    async fn list_jobs_by_user(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Job>> {
        let jobs = self
            .lock()?
            .jobs
            .values()
            .filter(|job| &job.user_id == user_id)
            .cloned()
            .collect();
        Ok(paginate(jobs, |j: &Job| j.created_at, limit, offset).items)
    }

    async fn list_jobs(
        &self,
        status: Option<JobStatus>,
        limit: usize,
        offset: usize,
    ) -> Result<Page<Job>> {
        let jobs = self
            .lock()?
            .jobs
            .values()
            .filter(|job| status.map_or(true, |s| job.status == s))
            .cloned()
            .collect();
        Ok(paginate(jobs, |j: &Job| j.created_at, limit, offset))
    }

    async fn job_counts(&self, user_ids: &[UserId]) -> Result<HashMap<UserId, JobCounts>> {
        let tables = self.lock()?;
        let mut counts: HashMap<UserId, JobCounts> = HashMap::new();
        for job in tables.jobs.values().filter(|j| user_ids.contains(&j.user_id)) {
            let entry = counts.entry(job.user_id.clone()).or_default();
            entry.total += 1;
            if job.status == JobStatus::Completed {
                entry.completed += 1;
            }
        }
        Ok(counts)
    }

    async fn list_stale_jobs(
        &self,
        status: JobStatus,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Job>> {
        let mut jobs: Vec<Job> = self
            .lock()?
            .jobs
            .values()
            .filter(|job| job.status == status && job.updated_at < before)
            .cloned()
            .collect();
        jobs.sort_by_key(|job| job.updated_at);
        jobs.truncate(limit);
        Ok(jobs)
    }

    async fn claim_dispatch_attempt(&self, job_id: &JobId, seen_attempts: u32) -> Result<bool> {
        let mut tables = self.lock()?;
        let Some(job) = tables.jobs.get_mut(job_id) else {
            return Ok(false);
        };
        if job.status != JobStatus::Pending || job.dispatch_attempts != seen_attempts {
            return Ok(false);
        }
        job.dispatch_attempts += 1;
        job.updated_at = Utc::now();
        Ok(true)
    }

    async fn mark_dispatched(&self, job_id: &JobId, handle: &str) -> Result<bool> {
        let mut tables = self.lock()?;
        let Some(job) = tables.jobs.get_mut(job_id) else {
            return Ok(false);
        };
        if job.status != JobStatus::Pending {
            return Ok(false);
        }
        job.status = JobStatus::Processing;
        job.dispatch_handle = Some(handle.to_string());
        job.last_dispatch_error = None;
        job.updated_at = Utc::now();
        Ok(true)
    }

    async fn record_dispatch_error(&self, job_id: &JobId, error: &str) -> Result<bool> {
        let mut tables = self.lock()?;
        let Some(job) = tables.jobs.get_mut(job_id) else {
            return Ok(false);
        };
        if job.status != JobStatus::Pending {
            return Ok(false);
        }
        job.last_dispatch_error = Some(error.to_string());
        job.updated_at = Utc::now();
        Ok(true)
    }

    async fn complete_job(&self, job_id: &JobId) -> Result<bool> {
        let mut tables = self.lock()?;
        let Some(job) = tables.jobs.get_mut(job_id) else {
            return Ok(false);
        };
        if !job.status.can_transition_to(JobStatus::Completed) {
            return Ok(false);
        }
        job.status = JobStatus::Completed;
        job.updated_at = Utc::now();
        Ok(true)
    }

    async fn fail_job(
        &self,
        job_id: &JobId,
        from: &[JobStatus],
        reason: &str,
    ) -> Result<Option<i64>> {
        let mut tables = self.lock()?;
        let Some(owner) = tables.jobs.get(job_id).map(|job| job.user_id.clone()) else {
            return Ok(None);
        };
        if !tables.accounts.contains_key(&owner) {
            return Err(StoreError::NotFound);
        }
        let Some(job) = tables.jobs.get(job_id) else {
            return Ok(None);
        };
        if !from.contains(&job.status) || !job.status.can_transition_to(JobStatus::Failed) {
            return Ok(None);
        }
        let cost = job.cost;

        // Refund first so an overflow leaves the job untouched.
        let balance = tables.credit(&owner, cost)?;
        if let Some(job) = tables.jobs.get_mut(job_id) {
            job.status = JobStatus::Failed;
            job.failure_reason = Some(reason.to_string());
            job.updated_at = Utc::now();
        }
        Ok(Some(balance))
    }

    // =========================================================================
    // Payment Transaction Operations
    // =========================================================================

    async fn insert_transaction(&self, transaction: &PaymentTransaction) -> Result<()> {
        let mut tables = self.lock()?;
        if tables.transactions.contains_key(&transaction.id) {
            return Err(StoreError::AlreadyExists(transaction.id.to_string()));
        }
        tables
            .transactions
            .insert(transaction.id, transaction.clone());
        Ok(())
    }

    async fn get_transaction(
        &self,
        transaction_id: &TransactionId,
    ) -> Result<Option<PaymentTransaction>> {
        Ok(self.lock()?.transactions.get(transaction_id).cloned())
    }

    async fn list_transactions_by_user(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<PaymentTransaction>> {
        let transactions = self
            .lock()?
            .transactions
            .values()
            .filter(|tx| &tx.user_id == user_id)
            .cloned()
            .collect();
        Ok(paginate(transactions, |t: &PaymentTransaction| t.created_at, limit, offset).items)
    }

    async fn settle_transaction(
        &self,
        transaction_id: &TransactionId,
        external_ref: Option<&str>,
    ) -> Result<SettleOutcome> {
        let mut tables = self.lock()?;
        let Some(tx) = tables.transactions.get(transaction_id) else {
            return Ok(SettleOutcome::Missing);
        };
        if tx.status != TransactionStatus::Pending {
            return Ok(SettleOutcome::AlreadyFinal { status: tx.status });
        }
        let (user_id, credits) = (tx.user_id.clone(), tx.credits);

        // Credit first so a missing account leaves the transaction pending.
        let balance = tables.credit(&user_id, credits)?;
        if let Some(tx) = tables.transactions.get_mut(transaction_id) {
            tx.status = TransactionStatus::Succeeded;
            if let Some(reference) = external_ref {
                tx.external_ref = Some(reference.to_string());
            }
            tx.updated_at = Utc::now();
        }

        Ok(SettleOutcome::Applied {
            user_id,
            credits,
            balance,
        })
    }

    async fn fail_transaction(&self, transaction_id: &TransactionId) -> Result<bool> {
        let mut tables = self.lock()?;
        match tables.transactions.get_mut(transaction_id) {
            Some(tx) if tx.status == TransactionStatus::Pending => {
                tx.status = TransactionStatus::Failed;
                tx.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    // =========================================================================
    // Redemption Code Operations
    // =========================================================================

    async fn insert_code(&self, code: &RedemptionCode) -> Result<bool> {
        let mut tables = self.lock()?;
        if tables.codes.contains_key(&code.code) {
            return Ok(false);
        }
        tables.codes.insert(code.code.clone(), code.clone());
        Ok(true)
    }

    async fn get_code(&self, code: &str) -> Result<Option<RedemptionCode>> {
        Ok(self.lock()?.codes.get(code).cloned())
    }

    async fn list_codes(
        &self,
        filter: &CodeFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Page<RedemptionCode>> {
        let codes = self
            .lock()?
            .codes
            .values()
            .filter(|code| filter.matches(code))
            .cloned()
            .collect();
        Ok(paginate(codes, |c: &RedemptionCode| c.created_at, limit, offset))
    }

    async fn claim_code(&self, code: &str, user_id: &UserId) -> Result<ClaimOutcome> {
        let mut tables = self.lock()?;
        let credits = match tables.codes.get(code) {
            None => return Ok(ClaimOutcome::Missing),
            Some(found) if found.is_claimed() => return Ok(ClaimOutcome::AlreadyClaimed),
            Some(found) => found.credits,
        };

        let balance = tables.credit(user_id, credits)?;
        if let Some(found) = tables.codes.get_mut(code) {
            found.claimed_by = Some(user_id.clone());
            found.claimed_at = Some(Utc::now());
        }
        Ok(ClaimOutcome::Claimed { credits, balance })
    }

    // =========================================================================
    // Reporting
    // =========================================================================

    async fn stats(&self) -> Result<LedgerStats> {
        let tables = self.lock()?;
        let count = |state: CodeState| {
            let filter = CodeFilter {
                state: Some(state),
                ..CodeFilter::default()
            };
            tables.codes.values().filter(|c| filter.matches(c)).count() as u64
        };

        Ok(LedgerStats {
            total_users: tables.accounts.len() as u64,
            total_jobs: tables.jobs.len() as u64,
            completed_jobs: tables
                .jobs
                .values()
                .filter(|j| j.status == JobStatus::Completed)
                .count() as u64,
            pending_codes: count(CodeState::Pending),
            redeemed_codes: count(CodeState::Redeemed),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conformance;

    #[tokio::test]
    async fn accounts() {
        conformance::accounts(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn job_reservation() {
        conformance::job_reservation(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn job_transitions() {
        conformance::job_transitions(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn dispatch_claims() {
        conformance::dispatch_claims(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn transactions() {
        conformance::transactions(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn codes() {
        conformance::codes(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn stats() {
        conformance::stats(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn job_counts() {
        conformance::job_counts(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn balance_overflow() {
        conformance::balance_overflow(&MemoryStore::new()).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_debits() {
        conformance::concurrent_debits(std::sync::Arc::new(MemoryStore::new())).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_claims() {
        conformance::concurrent_claims(std::sync::Arc::new(MemoryStore::new())).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_settlements() {
        conformance::concurrent_settlements(std::sync::Arc::new(MemoryStore::new())).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_failures() {
        conformance::concurrent_failures(std::sync::Arc::new(MemoryStore::new())).await;
    }
}
