//! Periodic sweep over unfinished jobs.
//!
//! Each pass reconciles running jobs against their output objects and gives
//! stale pending jobs another dispatch attempt (or fails and refunds them once
//! their attempts are used up).

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clipledger_core::JobStatus;
use clipledger_store::Store;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::lifecycle::JobService;
use crate::reconciler::{Reconciler, Reconciliation};

/// Jobs looked at per status per pass.
const SWEEP_BATCH: usize = 100;

/// Counts from one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Jobs moved to `completed`.
    pub completed: usize,
    /// Dispatch attempts made.
    pub redispatched: usize,
    /// Jobs failed and refunded.
    pub failed: usize,
}

/// Background reconciler and dispatch retrier.
pub struct Sweeper {
    store: Arc<dyn Store>,
    jobs: JobService,
    reconciler: Reconciler,
    interval: Duration,
    retry_delay: chrono::Duration,
}

impl Sweeper {
    /// Create a sweeper running every `interval`, retrying pending jobs that
    /// have not moved for `retry_delay`.
    pub fn new(
        store: Arc<dyn Store>,
        jobs: JobService,
        reconciler: Reconciler,
        interval: Duration,
        retry_delay: Duration,
    ) -> Self {
        Self {
            store,
            jobs,
            reconciler,
            interval,
            retry_delay: chrono::Duration::from_std(retry_delay)
                .unwrap_or_else(|_| chrono::Duration::seconds(60)),
        }
    }

    /// Sweep until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!(
            interval_secs = self.interval.as_secs(),
            retry_delay_secs = self.retry_delay.num_seconds(),
            "Job sweeper started"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::info!("Job sweeper stopping");
                    break;
                }
                _ = ticker.tick() => {
                    match self.run_once().await {
                        Ok(report) if report == SweepReport::default() => {
                            tracing::debug!("Sweep: nothing to do");
                        }
                        Ok(report) => {
                            tracing::info!(
                                completed = report.completed,
                                redispatched = report.redispatched,
                                failed = report.failed,
                                "Sweep finished"
                            );
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "Sweep failed");
                        }
                    }
                }
            }
        }
    }

    /// One pass over running and stale pending jobs.
    pub async fn run_once(&self) -> Result<SweepReport> {
        let mut report = SweepReport::default();
        let now = Utc::now();

        for job in self
            .store
            .list_stale_jobs(JobStatus::Processing, now, SWEEP_BATCH)
            .await?
        {
            if self.reconciler.reconcile(&job).await? == Reconciliation::Completed {
                report.completed += 1;
            }
        }

        let cutoff = now - self.retry_delay;
        for job in self
            .store
            .list_stale_jobs(JobStatus::Pending, cutoff, SWEEP_BATCH)
            .await?
        {
            match self.reconciler.reconcile(&job).await? {
                Reconciliation::Completed => {
                    report.completed += 1;
                    continue;
                }
                Reconciliation::Settled => continue,
                Reconciliation::Unchanged => {}
            }

            if !self.jobs.can_dispatch() {
                continue;
            }

            let attempts = job.dispatch_attempts;
            let after = self.jobs.retry_or_fail(job).await?;
            match after.status {
                JobStatus::Failed => report.failed += 1,
                _ if after.dispatch_attempts > attempts => report.redispatched += 1,
                _ => {}
            }
        }

        Ok(report)
    }
}
