//! Completion detection by polling for the output object.

use std::sync::Arc;

use clipledger_core::Job;
use clipledger_store::Store;

use crate::error::Result;
use crate::objects::ObjectStore;

/// What a reconciliation pass did to a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    /// The output exists and this pass moved the job to `completed`.
    Completed,
    /// The output is absent (or could not be probed); nothing changed.
    Unchanged,
    /// The job was already terminal, or another writer got there first.
    Settled,
}

/// Moves jobs to `completed` once their output object exists.
///
/// Never touches the ledger. Safe to run any number of times, concurrently.
#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn Store>,
    objects: Arc<dyn ObjectStore>,
}

impl Reconciler {
    /// Create a reconciler.
    pub fn new(store: Arc<dyn Store>, objects: Arc<dyn ObjectStore>) -> Self {
        Self { store, objects }
    }

    /// Probe `job`'s output and complete it if present.
    pub async fn reconcile(&self, job: &Job) -> Result<Reconciliation> {
        if job.is_terminal() {
            return Ok(Reconciliation::Settled);
        }

        let present = match self.objects.exists(&job.output_key).await {
            Ok(present) => present,
            Err(e) => {
                tracing::warn!(
                    job_id = %job.id,
                    output_key = %job.output_key,
                    error = %e,
                    "Output probe failed"
                );
                return Ok(Reconciliation::Unchanged);
            }
        };

        if !present {
            return Ok(Reconciliation::Unchanged);
        }

        if self.store.complete_job(&job.id).await? {
            tracing::info!(job_id = %job.id, from = %job.status, "Job completed");
            Ok(Reconciliation::Completed)
        } else {
            tracing::debug!(job_id = %job.id, "Completion lost race, job already terminal");
            Ok(Reconciliation::Settled)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::FsObjectStore;
    use clipledger_core::{JobStatus, Quality, UserId};
    use clipledger_store::MemoryStore;
    use tempfile::TempDir;

    async fn setup() -> (Reconciler, Arc<MemoryStore>, Arc<FsObjectStore>, Job, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        let objects = Arc::new(FsObjectStore::new(dir.path(), "http://cdn.test"));
        let user = UserId::new("u1").unwrap();
        store.ensure_account(&user, 3).await.unwrap();
        let job = Job::new(user, "uploads/u1/a/in.mp4", Quality::Lama);
        store.create_job(&job).await.unwrap();
        (
            Reconciler::new(store.clone(), objects.clone()),
            store,
            objects,
            job,
            dir,
        )
    }

    #[tokio::test]
    async fn absent_output_changes_nothing() {
        let (reconciler, store, _, job, _dir) = setup().await;
        assert_eq!(
            reconciler.reconcile(&job).await.unwrap(),
            Reconciliation::Unchanged
        );
        let stored = store.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn present_output_completes_once() {
        let (reconciler, store, objects, job, _dir) = setup().await;
        objects
            .put(&job.output_key, b"out".to_vec(), "video/mp4")
            .await
            .unwrap();

        assert_eq!(
            reconciler.reconcile(&job).await.unwrap(),
            Reconciliation::Completed
        );
        // Stale snapshot: the guarded write loses, nothing else happens.
        assert_eq!(
            reconciler.reconcile(&job).await.unwrap(),
            Reconciliation::Settled
        );

        let stored = store.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Completed);
        let account = store.get_account(&job.user_id).await.unwrap().unwrap();
        assert_eq!(account.balance, 2);
    }
}
