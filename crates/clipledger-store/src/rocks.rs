//! `RocksDB` storage implementation.
//!
//! Every guarded write is an optimistic transaction: the rows it depends on
//! are read with `get_for_update_cf`, so a concurrent commit touching the
//! same keys makes ours fail with `Busy`. The body is then re-run against
//! fresh state, up to `MAX_COMMIT_ATTEMPTS` times.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, Direction, ErrorKind, IteratorMode, MultiThreaded,
    OptimisticTransactionDB, Options,
};
use serde::de::DeserializeOwned;
use serde::Serialize;

use clipledger_core::{
    Account, Job, JobId, JobStatus, PaymentTransaction, RedemptionCode, TransactionId,
    TransactionStatus, UserId,
};

use crate::error::{Result, StoreError};
use crate::keys;
use crate::schema::{all_column_families, cf};
use crate::{
    ClaimOutcome, CodeFilter, CodeState, DebitOutcome, JobCounts, LedgerStats, Page, SettleOutcome,
    Store,
};

type Db = OptimisticTransactionDB<MultiThreaded>;
type Txn<'a> = rocksdb::Transaction<'a, Db>;
type Cf<'a> = Arc<BoundColumnFamily<'a>>;

/// Commit attempts before a conflicting write gives up.
const MAX_COMMIT_ATTEMPTS: u32 = 16;

#[allow(clippy::needless_pass_by_value)]
fn db_err(err: rocksdb::Error) -> StoreError {
    StoreError::Database(err.to_string())
}

fn is_conflict(err: &rocksdb::Error) -> bool {
    matches!(err.kind(), ErrorKind::Busy | ErrorKind::TryAgain)
}

/// RocksDB-backed storage implementation.
pub struct RocksStore {
    db: Arc<Db>,
}

impl RocksStore {
    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = Db::open_cf_descriptors(&opts, path, cf_descriptors).map_err(db_err)?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<Cf<'_>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }

    /// Serialize a value using CBOR.
    fn serialize<T: Serialize>(value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize a value from CBOR.
    fn deserialize<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
        ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    /// Plain (non-transactional) point read.
    fn get<T: DeserializeOwned>(&self, cf_name: &str, key: &[u8]) -> Result<Option<T>> {
        let cf = self.cf(cf_name)?;
        self.db
            .get_cf(&cf, key)
            .map_err(db_err)?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    /// Read a row inside a transaction and register it for conflict detection.
    fn read_for_update<T: DeserializeOwned>(txn: &Txn<'_>, cf: &Cf<'_>, key: &[u8]) -> Result<Option<T>> {
        txn.get_for_update_cf(cf, key, true)
            .map_err(db_err)?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    fn write<T: Serialize>(txn: &Txn<'_>, cf: &Cf<'_>, key: &[u8], value: &T) -> Result<()> {
        txn.put_cf(cf, key, Self::serialize(value)?).map_err(db_err)
    }

    /// Run `body` in an optimistic transaction, re-running it on commit
    /// conflicts. `body` must derive everything from what it reads.
    fn transact<T>(&self, mut body: impl FnMut(&Txn<'_>) -> Result<T>) -> Result<T> {
        for attempt in 1..=MAX_COMMIT_ATTEMPTS {
            let txn = self.db.transaction();
            let value = body(&txn)?;
            match txn.commit() {
                Ok(()) => return Ok(value),
                Err(err) if is_conflict(&err) => {
                    tracing::debug!(attempt, error = %err, "optimistic commit conflict, retrying");
                }
                Err(err) => return Err(db_err(err)),
            }
        }
        Err(StoreError::Contention {
            attempts: MAX_COMMIT_ATTEMPTS,
        })
    }

    /// Every value in a column family, newest key first.
    fn scan<T: DeserializeOwned>(&self, cf_name: &str) -> Result<Vec<T>> {
        let cf = self.cf(cf_name)?;
        self.db
            .iterator_cf(&cf, IteratorMode::End)
            .map(|item| {
                let (_, value) = item.map_err(db_err)?;
                Self::deserialize(&value)
            })
            .collect()
    }

    /// Page through a per-user index, newest first, loading each row from
    /// `data_cf`.
    fn list_user_index<T: DeserializeOwned>(
        &self,
        index_cf: &str,
        data_cf: &str,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<T>> {
        let cf_index = self.cf(index_cf)?;
        let prefix = keys::user_prefix(user_id);

        let mut ids = Vec::new();
        for item in self
            .db
            .iterator_cf(&cf_index, IteratorMode::From(&prefix, Direction::Forward))
        {
            let (key, _) = item.map_err(db_err)?;
            if !key.starts_with(&prefix) {
                break;
            }
            if let Some(id) = keys::extract_ulid(&key) {
                ids.push(id);
            }
        }

        // ULIDs sort by time: reverse for newest first.
        ids.reverse();

        let mut rows = Vec::new();
        for id in ids.into_iter().skip(offset).take(limit) {
            if let Some(row) = self.get(data_cf, &id)? {
                rows.push(row);
            }
        }
        Ok(rows)
    }

    /// Read-modify-write of one job under the optimistic transaction. `apply`
    /// returns whether it changed the job.
    fn update_job(&self, job_id: &JobId, mut apply: impl FnMut(&mut Job) -> bool) -> Result<bool> {
        let cf_jobs = self.cf(cf::JOBS)?;
        let key = keys::job_key(job_id);

        self.transact(|txn| {
            let Some(mut job) = Self::read_for_update::<Job>(txn, &cf_jobs, &key)? else {
                return Ok(false);
            };
            if !apply(&mut job) {
                return Ok(false);
            }
            job.updated_at = Utc::now();
            Self::write(txn, &cf_jobs, &key, &job)?;
            Ok(true)
        })
    }

    /// Credit an account inside a running transaction.
    fn credit_in(txn: &Txn<'_>, cf_accounts: &Cf<'_>, user_id: &UserId, amount: i64) -> Result<i64> {
        let key = keys::account_key(user_id);
        let mut account: Account =
            Self::read_for_update(txn, cf_accounts, &key)?.ok_or(StoreError::NotFound)?;
        account.balance = account
            .balance
            .checked_add(amount)
            .ok_or(StoreError::Overflow)?;
        account.updated_at = Utc::now();
        Self::write(txn, cf_accounts, &key, &account)?;
        Ok(account.balance)
    }

    /// Guarded debit inside a running transaction.
    fn debit_in(txn: &Txn<'_>, cf_accounts: &Cf<'_>, user_id: &UserId, amount: i64) -> Result<DebitOutcome> {
        let key = keys::account_key(user_id);
        let mut account: Account =
            Self::read_for_update(txn, cf_accounts, &key)?.ok_or(StoreError::NotFound)?;
        if !account.has_sufficient_credits(amount) {
            return Ok(DebitOutcome::Insufficient {
                balance: account.balance,
            });
        }
        account.balance -= amount;
        account.updated_at = Utc::now();
        Self::write(txn, cf_accounts, &key, &account)?;
        Ok(DebitOutcome::Debited {
            balance: account.balance,
        })
    }
}

fn paginate<T>(items: Vec<T>, limit: usize, offset: usize) -> Page<T> {
    let total = items.len() as u64;
    Page {
        items: items.into_iter().skip(offset).take(limit).collect(),
        total,
    }
}

#[async_trait]
impl Store for RocksStore {
    // =========================================================================
    // Account Operations
    // =========================================================================

    async fn ensure_account(&self, user_id: &UserId, starting_balance: i64) -> Result<Account> {
        let cf_accounts = self.cf(cf::ACCOUNTS)?;
        let key = keys::account_key(user_id);

        self.transact(|txn| {
            if let Some(existing) = Self::read_for_update::<Account>(txn, &cf_accounts, &key)? {
                return Ok(existing);
            }
            let account = Account::new(user_id.clone(), starting_balance);
            Self::write(txn, &cf_accounts, &key, &account)?;
            Ok(account)
        })
    }

    async fn get_account(&self, user_id: &UserId) -> Result<Option<Account>> {
        self.get(cf::ACCOUNTS, &keys::account_key(user_id))
    }

    async fn list_accounts(&self, limit: usize, offset: usize) -> Result<Page<Account>> {
        let mut accounts: Vec<Account> = self.scan(cf::ACCOUNTS)?;
        accounts.sort_by_key(|a| std::cmp::Reverse(a.created_at));
        Ok(paginate(accounts, limit, offset))
    }

    async fn debit(&self, user_id: &UserId, amount: i64) -> Result<DebitOutcome> {
        let cf_accounts = self.cf(cf::ACCOUNTS)?;
        self.transact(|txn| Self::debit_in(txn, &cf_accounts, user_id, amount))
    }

    async fn credit(&self, user_id: &UserId, amount: i64) -> Result<i64> {
        let cf_accounts = self.cf(cf::ACCOUNTS)?;
        self.transact(|txn| Self::credit_in(txn, &cf_accounts, user_id, amount))
    }

    async fn set_payment_customer(&self, user_id: &UserId, customer_id: &str) -> Result<()> {
        let cf_accounts = self.cf(cf::ACCOUNTS)?;
        let key = keys::account_key(user_id);

        self.transact(|txn| {
            let mut account: Account =
                Self::read_for_update(txn, &cf_accounts, &key)?.ok_or(StoreError::NotFound)?;
            account.payment_customer_id = Some(customer_id.to_string());
            account.updated_at = Utc::now();
            Self::write(txn, &cf_accounts, &key, &account)
        })
    }

    // =========================================================================
    // Job Operations
    // =========================================================================

    async fn create_job(&self, job: &Job) -> Result<DebitOutcome> {
        let cf_accounts = self.cf(cf::ACCOUNTS)?;
        let cf_jobs = self.cf(cf::JOBS)?;
        let cf_by_user = self.cf(cf::JOBS_BY_USER)?;
        let job_key = keys::job_key(&job.id);
        let index_key = keys::user_index_key(&job.user_id, job.id.to_bytes());

        self.transact(|txn| {
            if txn
                .get_for_update_cf(&cf_jobs, &job_key, true)
                .map_err(db_err)?
                .is_some()
            {
                return Err(StoreError::AlreadyExists(job.id.to_string()));
            }

            let outcome = Self::debit_in(txn, &cf_accounts, &job.user_id, job.cost)?;
            if matches!(outcome, DebitOutcome::Debited { .. }) {
                Self::write(txn, &cf_jobs, &job_key, job)?;
                txn.put_cf(&cf_by_user, &index_key, []).map_err(db_err)?;
            }
            Ok(outcome)
        })
    }

    async fn get_job(&self, job_id: &JobId) -> Result<Option<Job>> {
        self.get(cf::JOBS, &keys::job_key(job_id))
    }

    async fn list_jobs_by_user(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Job>> {
        self.list_user_index(cf::JOBS_BY_USER, cf::JOBS, user_id, limit, offset)
    }

    async fn list_jobs(
        &self,
        status: Option<JobStatus>,
        limit: usize,
        offset: usize,
    ) -> Result<Page<Job>> {
        let jobs: Vec<Job> = self
            .scan::<Job>(cf::JOBS)?
            .into_iter()
            .filter(|job| status.map_or(true, |s| job.status == s))
            .collect();
        Ok(paginate(jobs, limit, offset))
    }

    async fn job_counts(&self, user_ids: &[UserId]) -> Result<HashMap<UserId, JobCounts>> {
        let mut counts: HashMap<UserId, JobCounts> = HashMap::new();
        for job in self.scan::<Job>(cf::JOBS)? {
            if !user_ids.contains(&job.user_id) {
                continue;
            }
            let entry = counts.entry(job.user_id).or_default();
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
            .scan::<Job>(cf::JOBS)?
            .into_iter()
            .filter(|job| job.status == status && job.updated_at < before)
            .collect();
        jobs.sort_by_key(|job| job.updated_at);
        jobs.truncate(limit);
        Ok(jobs)
    }

    async fn claim_dispatch_attempt(&self, job_id: &JobId, seen_attempts: u32) -> Result<bool> {
        self.update_job(job_id, |job| {
            if job.status != JobStatus::Pending || job.dispatch_attempts != seen_attempts {
                return false;
            }
            job.dispatch_attempts += 1;
            true
        })
    }

    async fn mark_dispatched(&self, job_id: &JobId, handle: &str) -> Result<bool> {
        self.update_job(job_id, |job| {
            if job.status != JobStatus::Pending {
                return false;
            }
            job.status = JobStatus::Processing;
            job.dispatch_handle = Some(handle.to_string());
            job.last_dispatch_error = None;
            true
        })
    }

    async fn record_dispatch_error(&self, job_id: &JobId, error: &str) -> Result<bool> {
        self.update_job(job_id, |job| {
            if job.status != JobStatus::Pending {
                return false;
            }
            job.last_dispatch_error = Some(error.to_string());
            true
        })
    }

    async fn complete_job(&self, job_id: &JobId) -> Result<bool> {
        self.update_job(job_id, |job| {
            if !job.status.can_transition_to(JobStatus::Completed) {
                return false;
            }
            job.status = JobStatus::Completed;
            true
        })
    }

    async fn fail_job(
        &self,
        job_id: &JobId,
        from: &[JobStatus],
        reason: &str,
    ) -> Result<Option<i64>> {
        let cf_accounts = self.cf(cf::ACCOUNTS)?;
        let cf_jobs = self.cf(cf::JOBS)?;
        let key = keys::job_key(job_id);

        self.transact(|txn| {
            let Some(mut job) = Self::read_for_update::<Job>(txn, &cf_jobs, &key)? else {
                return Ok(None);
            };
            if !from.contains(&job.status) || !job.status.can_transition_to(JobStatus::Failed) {
                return Ok(None);
            }

            job.status = JobStatus::Failed;
            job.failure_reason = Some(reason.to_string());
            job.updated_at = Utc::now();
            Self::write(txn, &cf_jobs, &key, &job)?;

            Self::credit_in(txn, &cf_accounts, &job.user_id, job.cost).map(Some)
        })
    }

    // =========================================================================
    // Payment Transaction Operations
    // =========================================================================

    async fn insert_transaction(&self, transaction: &PaymentTransaction) -> Result<()> {
        let cf_tx = self.cf(cf::TRANSACTIONS)?;
        let cf_by_user = self.cf(cf::TRANSACTIONS_BY_USER)?;
        let key = keys::transaction_key(&transaction.id);
        let index_key = keys::user_index_key(&transaction.user_id, transaction.id.to_bytes());

        self.transact(|txn| {
            if txn
                .get_for_update_cf(&cf_tx, &key, true)
                .map_err(db_err)?
                .is_some()
            {
                return Err(StoreError::AlreadyExists(transaction.id.to_string()));
            }
            Self::write(txn, &cf_tx, &key, transaction)?;
            txn.put_cf(&cf_by_user, &index_key, []).map_err(db_err)
        })
    }

    async fn get_transaction(
        &self,
        transaction_id: &TransactionId,
    ) -> Result<Option<PaymentTransaction>> {
        self.get(cf::TRANSACTIONS, &keys::transaction_key(transaction_id))
    }

    async fn list_transactions_by_user(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<PaymentTransaction>> {
        self.list_user_index(cf::TRANSACTIONS_BY_USER, cf::TRANSACTIONS, user_id, limit, offset)
    }

    async fn settle_transaction(
        &self,
        transaction_id: &TransactionId,
        external_ref: Option<&str>,
    ) -> Result<SettleOutcome> {
        let cf_accounts = self.cf(cf::ACCOUNTS)?;
        let cf_tx = self.cf(cf::TRANSACTIONS)?;
        let key = keys::transaction_key(transaction_id);

        self.transact(|txn| {
            let Some(mut tx) = Self::read_for_update::<PaymentTransaction>(txn, &cf_tx, &key)?
            else {
                return Ok(SettleOutcome::Missing);
            };
            if tx.status != TransactionStatus::Pending {
                return Ok(SettleOutcome::AlreadyFinal { status: tx.status });
            }

            tx.status = TransactionStatus::Succeeded;
            if let Some(reference) = external_ref {
                tx.external_ref = Some(reference.to_string());
            }
            tx.updated_at = Utc::now();
            Self::write(txn, &cf_tx, &key, &tx)?;

            let balance = Self::credit_in(txn, &cf_accounts, &tx.user_id, tx.credits)?;
            Ok(SettleOutcome::Applied {
                user_id: tx.user_id.clone(),
                credits: tx.credits,
                balance,
            })
        })
    }

    async fn fail_transaction(&self, transaction_id: &TransactionId) -> Result<bool> {
        let cf_tx = self.cf(cf::TRANSACTIONS)?;
        let key = keys::transaction_key(transaction_id);

        self.transact(|txn| {
            let Some(mut tx) = Self::read_for_update::<PaymentTransaction>(txn, &cf_tx, &key)?
            else {
                return Ok(false);
            };
            if tx.status != TransactionStatus::Pending {
                return Ok(false);
            }
            tx.status = TransactionStatus::Failed;
            tx.updated_at = Utc::now();
            Self::write(txn, &cf_tx, &key, &tx)?;
            Ok(true)
        })
    }

    // =========================================================================
    // Redemption Code Operations
    // =========================================================================

    async fn insert_code(&self, code: &RedemptionCode) -> Result<bool> {
        let cf_codes = self.cf(cf::CODES)?;
        let key = keys::code_key(&code.code);

        self.transact(|txn| {
            if txn
                .get_for_update_cf(&cf_codes, &key, true)
                .map_err(db_err)?
                .is_some()
            {
                return Ok(false);
            }
            Self::write(txn, &cf_codes, &key, code)?;
            Ok(true)
        })
    }

    async fn get_code(&self, code: &str) -> Result<Option<RedemptionCode>> {
        self.get(cf::CODES, &keys::code_key(code))
    }

    async fn list_codes(
        &self,
        filter: &CodeFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Page<RedemptionCode>> {
        let mut codes: Vec<RedemptionCode> = self
            .scan::<RedemptionCode>(cf::CODES)?
            .into_iter()
            .filter(|code| filter.matches(code))
            .collect();
        codes.sort_by_key(|c| std::cmp::Reverse(c.created_at));
        Ok(paginate(codes, limit, offset))
    }

    async fn claim_code(&self, code: &str, user_id: &UserId) -> Result<ClaimOutcome> {
        let cf_accounts = self.cf(cf::ACCOUNTS)?;
        let cf_codes = self.cf(cf::CODES)?;
        let key = keys::code_key(code);

        self.transact(|txn| {
            let Some(mut found) = Self::read_for_update::<RedemptionCode>(txn, &cf_codes, &key)?
            else {
                return Ok(ClaimOutcome::Missing);
            };
            if found.is_claimed() {
                return Ok(ClaimOutcome::AlreadyClaimed);
            }

            found.claimed_by = Some(user_id.clone());
            found.claimed_at = Some(Utc::now());
            Self::write(txn, &cf_codes, &key, &found)?;

            let balance = Self::credit_in(txn, &cf_accounts, user_id, found.credits)?;
            Ok(ClaimOutcome::Claimed {
                credits: found.credits,
                balance,
            })
        })
    }

    // =========================================================================
    // Reporting
    // =========================================================================

    async fn stats(&self) -> Result<LedgerStats> {
        let jobs: Vec<Job> = self.scan(cf::JOBS)?;
        let codes: Vec<RedemptionCode> = self.scan(cf::CODES)?;
        let redeemed = CodeFilter {
            state: Some(CodeState::Redeemed),
            ..CodeFilter::default()
        };
        let redeemed_codes = codes.iter().filter(|c| redeemed.matches(c)).count() as u64;

        Ok(LedgerStats {
            total_users: self.scan::<Account>(cf::ACCOUNTS)?.len() as u64,
            total_jobs: jobs.len() as u64,
            completed_jobs: jobs
                .iter()
                .filter(|j| j.status == JobStatus::Completed)
                .count() as u64,
            pending_codes: codes.len() as u64 - redeemed_codes,
            redeemed_codes,
        })
    }
}
