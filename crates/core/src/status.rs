//! Job status and the legal transition table.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::JobError;

/// Lifecycle status of a job.
///
/// ```text
/// CREATED    -> QUEUED
/// QUEUED     -> PROCESSING
/// PROCESSING -> COMPLETED | FAILED
/// FAILED     -> RETRYING | DEAD
/// RETRYING   -> QUEUED | PROCESSING
/// ```
///
/// COMPLETED and DEAD are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Created,
    Queued,
    Processing,
    Retrying,
    Failed,
    Completed,
    Dead,
}

impl JobStatus {
    pub const ALL: [JobStatus; 7] = [
        JobStatus::Created,
        JobStatus::Queued,
        JobStatus::Processing,
        JobStatus::Retrying,
        JobStatus::Failed,
        JobStatus::Completed,
        JobStatus::Dead,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Created => "CREATED",
            JobStatus::Queued => "QUEUED",
            JobStatus::Processing => "PROCESSING",
            JobStatus::Retrying => "RETRYING",
            JobStatus::Failed => "FAILED",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Dead => "DEAD",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Dead)
    }

    /// Statuses a claimer may pick up (subject to `next_run_at`).
    pub fn is_claimable(&self) -> bool {
        matches!(self, JobStatus::Queued | JobStatus::Retrying)
    }

    /// Destinations reachable from this status in one step.
    pub fn allowed_next(&self) -> &'static [JobStatus] {
        match self {
            JobStatus::Created => &[JobStatus::Queued],
            JobStatus::Queued => &[JobStatus::Processing],
            JobStatus::Processing => &[JobStatus::Completed, JobStatus::Failed],
            JobStatus::Failed => &[JobStatus::Retrying, JobStatus::Dead],
            JobStatus::Retrying => &[JobStatus::Queued, JobStatus::Processing],
            JobStatus::Completed | JobStatus::Dead => &[],
        }
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        self.allowed_next().contains(&next)
    }
}

impl core::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| JobError::validation(format!("unknown job status: {s}")))
    }
}
