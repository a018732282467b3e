//! Submission of jobs to the remote compute provider.
//!
//! A dispatcher's answer is a hint, not ground truth: an accepted job may
//! still never produce output, and a transport error may hide a job that is
//! in fact running. Completion is only ever derived from the output object.

mod runpod;

pub use runpod::RunPodDispatcher;

use async_trait::async_trait;
use serde::Serialize;

use clipledger_core::{Job, JobId, Quality};

/// What the worker receives for one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchRequest {
    /// Job being processed.
    pub job_id: JobId,
    /// Object key of the uploaded input.
    pub input_key: String,
    /// Object key the worker must write.
    pub output_key: String,
    /// Processing mode.
    pub quality: Quality,
}

impl DispatchRequest {
    /// Build the request for `job`.
    #[must_use]
    pub fn for_job(job: &Job) -> Self {
        Self {
            job_id: job.id,
            input_key: job.input_key.clone(),
            output_key: job.output_key.clone(),
            quality: job.quality,
        }
    }
}

/// A definitive answer from the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The provider queued the job.
    Accepted {
        /// Provider-side handle.
        handle: String,
    },
    /// The provider refused the job and will never run it.
    Rejected {
        /// Provider's reason.
        reason: String,
    },
}

/// Transient dispatch failures. The job stays pending and may be retried.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// HTTP request failed or timed out.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The provider answered with a retryable status.
    #[error("provider returned status {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, truncated.
        body: String,
    },

    /// The provider's answer could not be understood.
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
}

/// Submits jobs to a remote compute provider.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Submit one job.
    async fn submit(&self, request: &DispatchRequest) -> Result<DispatchOutcome, DispatchError>;
}
