//! Job types for clipledger.
//!
//! A job moves `pending -> processing -> completed | failed`. A pending job
//! may also jump straight to `completed` (its output was observed) or to
//! `failed` (the dispatcher rejected it, retries ran out, or the worker
//! reported a failure). Terminal states never change.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{JobId, UserId};

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Reserved and stored, not yet accepted by the compute provider.
    Pending,
    /// Accepted by the compute provider.
    Processing,
    /// Output observed in object storage.
    Completed,
    /// Definitively failed; the reserved cost has been refunded.
    Failed,
}

impl JobStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [Self; 4] = [
        Self::Pending,
        Self::Processing,
        Self::Completed,
        Self::Failed,
    ];

    /// Statuses from which a job can still move.
    pub const ACTIVE: [Self; 2] = [Self::Pending, Self::Processing];

    /// Whether the status is final.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether `self -> next` is a legal transition.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Processing | Self::Completed | Self::Failed)
                | (Self::Processing, Self::Completed | Self::Failed)
        )
    }

    /// The stored string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// Processing mode requested for a job. Determines its credit cost.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Quality {
    /// Fast inpainting.
    #[default]
    #[serde(rename = "lama")]
    Lama,
    /// High quality temporal inpainting.
    #[serde(rename = "e2fgvi_hq")]
    E2fgviHq,
}

impl Quality {
    /// Credit cost of a job in this mode.
    #[must_use]
    pub const fn cost(self) -> i64 {
        match self {
            Self::Lama => 1,
            Self::E2fgviHq => 2,
        }
    }

    /// The wire/stored string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Lama => "lama",
            Self::E2fgviHq => "e2fgvi_hq",
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Quality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "lama" => Ok(Self::Lama),
            "e2fgvi_hq" => Ok(Self::E2fgviHq),
            other => Err(format!("unknown quality: {other}")),
        }
    }
}

/// Object key the worker writes a job's output to.
#[must_use]
pub fn output_key_for(user_id: &UserId, job_id: &JobId) -> String {
    format!("outputs/{user_id}/{job_id}.mp4")
}

/// A compute job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    /// Unique job ID.
    pub id: JobId,

    /// Owning account.
    pub user_id: UserId,

    /// Current status.
    pub status: JobStatus,

    /// Object key of the uploaded input.
    pub input_key: String,

    /// Object key the output is expected at.
    pub output_key: String,

    /// Requested processing mode.
    pub quality: Quality,

    /// Credits reserved at creation.
    pub cost: i64,

    /// Dispatch attempts claimed so far.
    pub dispatch_attempts: u32,

    /// Error from the most recent failed dispatch attempt.
    pub last_dispatch_error: Option<String>,

    /// Handle returned by the compute provider on acceptance.
    pub dispatch_handle: Option<String>,

    /// Why the job failed, when it did.
    pub failure_reason: Option<String>,

    /// When the job was created.
    pub created_at: DateTime<Utc>,

    /// When the job was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Create a new pending job. The cost is fixed here from the quality.
    #[must_use]
    pub fn new(user_id: UserId, input_key: impl Into<String>, quality: Quality) -> Self {
        let id = JobId::generate();
        let now = Utc::now();
        Self {
            output_key: output_key_for(&user_id, &id),
            id,
            user_id,
            status: JobStatus::Pending,
            input_key: input_key.into(),
            quality,
            cost: quality.cost(),
            dispatch_attempts: 0,
            last_dispatch_error: None,
            dispatch_handle: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the job has reached a final status.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
