//! Job lifecycle: creation with reservation, dispatch, status and reports.
//!
//! ```text
//! PENDING ──accepted──▶ PROCESSING ──output seen / report──▶ COMPLETED
//!    │                       │
//!    ├──output seen──────────┼───────────────────────────────▶ COMPLETED
//!    └──rejected / retries exhausted / failure report──▶ FAILED (+ refund)
//! ```
//!
//! Terminal states never change; every transition is a guarded store write.

use std::sync::Arc;

use clipledger_core::{Job, JobId, JobStatus, LedgerError, Quality, UserId};
use clipledger_store::{DebitOutcome, Store};
use serde::Deserialize;

use crate::dispatch::{DispatchOutcome, DispatchRequest, Dispatcher};
use crate::error::{Result, ServiceError};
use crate::ledger::LedgerService;
use crate::reconciler::Reconciler;

/// Prefix under which a user's uploads live.
#[must_use]
pub fn upload_prefix(user_id: &UserId) -> String {
    format!("uploads/{user_id}/")
}

/// Outcome reported by a worker.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WorkerReport {
    /// The worker wrote the output object.
    Completed,
    /// The worker gave up.
    Failed {
        /// Worker's error message.
        #[serde(default)]
        error: Option<String>,
    },
}

/// Job creation, dispatch and state transitions.
#[derive(Clone)]
pub struct JobService {
    store: Arc<dyn Store>,
    ledger: LedgerService,
    reconciler: Reconciler,
    dispatcher: Option<Arc<dyn Dispatcher>>,
    max_dispatch_attempts: u32,
}

impl JobService {
    /// Create the service.
    pub fn new(
        store: Arc<dyn Store>,
        ledger: LedgerService,
        reconciler: Reconciler,
        dispatcher: Option<Arc<dyn Dispatcher>>,
        max_dispatch_attempts: u32,
    ) -> Self {
        Self {
            store,
            ledger,
            reconciler,
            dispatcher,
            max_dispatch_attempts,
        }
    }

    /// Whether a dispatcher is configured.
    #[must_use]
    pub fn can_dispatch(&self) -> bool {
        self.dispatcher.is_some()
    }

    /// Reserve the cost and store a pending job, then try to dispatch it.
    ///
    /// On insufficient credit nothing is stored. Dispatch failures never fail
    /// the request: the job is returned as it stands.
    pub async fn create(&self, user_id: &UserId, input_key: &str, quality: Quality) -> Result<Job> {
        let input_key = input_key.trim();
        if !input_key.starts_with(&upload_prefix(user_id))
            || crate::objects::validate_key(input_key).is_err()
        {
            return Err(ServiceError::InvalidInput(
                "input_key must reference one of your uploads".into(),
            ));
        }

        self.ledger.ensure_account(user_id).await?;

        let job = Job::new(user_id.clone(), input_key, quality);
        match self.store.create_job(&job).await? {
            DebitOutcome::Debited { balance } => {
                tracing::info!(
                    job_id = %job.id,
                    user_id = %user_id,
                    quality = %quality,
                    cost = job.cost,
                    balance,
                    "Job created"
                );
            }
            DebitOutcome::Insufficient { balance } => {
                tracing::info!(
                    user_id = %user_id,
                    balance,
                    required = job.cost,
                    "Job refused, insufficient credits"
                );
                return Err(LedgerError::InsufficientCredit {
                    balance,
                    required: job.cost,
                }
                .into());
            }
        }

        self.dispatch(job).await
    }

    /// Make one dispatch attempt for a pending job and return its new state.
    pub async fn dispatch(&self, job: Job) -> Result<Job> {
        let Some(dispatcher) = &self.dispatcher else {
            tracing::warn!(job_id = %job.id, "No dispatcher configured, job stays pending");
            return Ok(job);
        };

        if job.status != JobStatus::Pending {
            return Ok(job);
        }

        if !self
            .store
            .claim_dispatch_attempt(&job.id, job.dispatch_attempts)
            .await?
        {
            tracing::debug!(job_id = %job.id, "Dispatch attempt claimed elsewhere");
            return self.load(&job.id).await;
        }
        let attempt = job.dispatch_attempts + 1;

        match dispatcher.submit(&DispatchRequest::for_job(&job)).await {
            Ok(DispatchOutcome::Accepted { handle }) => {
                if self.store.mark_dispatched(&job.id, &handle).await? {
                    tracing::info!(job_id = %job.id, handle = %handle, attempt, "Job dispatched");
                } else {
                    tracing::debug!(job_id = %job.id, "Job left pending before dispatch was recorded");
                }
            }
            Ok(DispatchOutcome::Rejected { reason }) => {
                tracing::warn!(job_id = %job.id, reason = %reason, "Dispatch rejected");
                self.ledger
                    .refund_from(
                        &job,
                        &[JobStatus::Pending],
                        &format!("dispatch rejected: {reason}"),
                    )
                    .await?;
            }
            Err(e) => {
                tracing::warn!(
                    job_id = %job.id,
                    attempt,
                    max_attempts = self.max_dispatch_attempts,
                    error = %e,
                    "Dispatch failed, job stays pending"
                );
                self.store
                    .record_dispatch_error(&job.id, &e.to_string())
                    .await?;
            }
        }

        self.load(&job.id).await
    }

    /// Retry a stale pending job, or fail and refund it once its attempts are
    /// used up.
    pub async fn retry_or_fail(&self, job: Job) -> Result<Job> {
        if job.status != JobStatus::Pending {
            return Ok(job);
        }

        if job.dispatch_attempts >= self.max_dispatch_attempts {
            tracing::warn!(
                job_id = %job.id,
                attempts = job.dispatch_attempts,
                last_error = ?job.last_dispatch_error,
                "Dispatch retries exhausted"
            );
            // A late acceptance of the last attempt wins over exhaustion.
            self.ledger
                .refund_from(&job, &[JobStatus::Pending], "dispatch retries exhausted")
                .await?;
            return self.load(&job.id).await;
        }

        self.dispatch(job).await
    }

    /// The caller's job, reconciled against its output if still running.
    ///
    /// Never re-dispatches and never touches the ledger.
    pub async fn status(&self, user_id: &UserId, job_id: &JobId) -> Result<Job> {
        let job = self.owned(user_id, job_id).await?;
        if job.is_terminal() {
            return Ok(job);
        }

        self.reconciler.reconcile(&job).await?;
        self.load(job_id).await
    }

    /// The caller's jobs, newest first.
    pub async fn list(&self, user_id: &UserId, limit: usize, offset: usize) -> Result<Vec<Job>> {
        Ok(self.store.list_jobs_by_user(user_id, limit, offset).await?)
    }

    /// Apply a worker's completion report. Reports against terminal jobs are
    /// no-ops; the current job is returned either way.
    pub async fn report(&self, job_id: &JobId, report: &WorkerReport) -> Result<Job> {
        let job = self.load(job_id).await?;

        match report {
            WorkerReport::Completed => {
                if self.store.complete_job(job_id).await? {
                    tracing::info!(job_id = %job_id, "Job completed by worker report");
                } else {
                    tracing::debug!(job_id = %job_id, status = %job.status, "Completion report ignored");
                }
            }
            WorkerReport::Failed { error } => {
                let reason = error.as_deref().unwrap_or("worker reported failure");
                self.ledger.refund(&job, reason).await?;
            }
        }

        self.load(job_id).await
    }

    async fn owned(&self, user_id: &UserId, job_id: &JobId) -> Result<Job> {
        match self.store.get_job(job_id).await? {
            Some(job) if &job.user_id == user_id => Ok(job),
            _ => Err(LedgerError::JobNotFound {
                job_id: job_id.to_string(),
            }
            .into()),
        }
    }

    async fn load(&self, job_id: &JobId) -> Result<Job> {
        self.store.get_job(job_id).await?.ok_or_else(|| {
            LedgerError::JobNotFound {
                job_id: job_id.to_string(),
            }
            .into()
        })
    }
}
