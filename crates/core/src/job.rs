//! Job record and its state machine.
//!
//! A [`Job`] is only mutated through [`Job::transition_at`] and the
//! operations built on top of it (`queue`, `complete`, `fail`,
//! `retry_manually`). Fields are
//! private; persistence layers rehydrate records through [`JobParts`], which
//! re-checks the `retry_count <= max_retries` invariant.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{JobError, JobResult};
use crate::id::JobId;
use crate::job_type::JobType;
use crate::metadata::JsonMap;
use crate::retry::RetryPolicy;
use crate::status::JobStatus;

/// Submission input for a new job.
#[derive(Debug, Clone, PartialEq)]
pub struct NewJob {
    pub job_type: JobType,
    pub input_file_path: String,
    /// Already merged (system keys over caller keys).
    pub input_metadata: JsonMap,
    pub max_retries: u32,
    pub context: JsonMap,
    pub notifications: JsonMap,
}

/// Result of the composite failure operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Budget left; eligible again at `next_run_at`.
    Retrying { next_run_at: DateTime<Utc> },
    /// Budget exhausted; job is dead-lettered.
    Dead,
}

/// Plain field set of a job, used for persistence and serialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobParts {
    pub job_id: JobId,
    pub job_type: JobType,
    pub input_metadata: JsonMap,
    pub status: JobStatus,
    pub input_file_path: String,
    pub output_file_path: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub error_message: Option<String>,
    pub context: JsonMap,
    pub notifications: JsonMap,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// A submitted unit of work and the single source of truth for its progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "JobParts", into = "JobParts")]
pub struct Job {
    job_id: JobId,
    job_type: JobType,
    input_metadata: JsonMap,
    status: JobStatus,
    input_file_path: String,
    output_file_path: Option<String>,
    retry_count: u32,
    max_retries: u32,
    error_message: Option<String>,
    context: JsonMap,
    notifications: JsonMap,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    next_run_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a job in CREATED.
    ///
    /// Persistence goes through [`Job::create_queued`]; a CREATED record is
    /// never written on its own.
    pub fn create(new: NewJob, now: DateTime<Utc>) -> JobResult<Self> {
        if new.input_file_path.trim().is_empty() {
            return Err(JobError::validation("input_file_path is required"));
        }

        Ok(Self {
            job_id: JobId::new(),
            job_type: new.job_type,
            input_metadata: new.input_metadata,
            status: JobStatus::Created,
            input_file_path: new.input_file_path,
            output_file_path: None,
            retry_count: 0,
            max_retries: new.max_retries,
            error_message: None,
            context: new.context,
            notifications: new.notifications,
            created_at: now,
            updated_at: now,
            next_run_at: None,
            finished_at: None,
        })
    }

    /// Create a job and move it CREATED -> QUEUED before anyone sees it.
    ///
    /// Stores insert this record as is, so the first durable state is QUEUED.
    pub fn create_queued(new: NewJob, now: DateTime<Utc>) -> JobResult<Self> {
        let mut job = Self::create(new, now)?;
        job.queue(now)?;
        Ok(job)
    }

    /// Rehydrate a job from storage.
    pub fn from_parts(parts: JobParts) -> JobResult<Self> {
        if parts.retry_count > parts.max_retries {
            return Err(JobError::InvariantViolation(format!(
                "retry_count {} exceeds max_retries {}",
                parts.retry_count, parts.max_retries
            )));
        }

        Ok(Self {
            job_id: parts.job_id,
            job_type: parts.job_type,
            input_metadata: parts.input_metadata,
            status: parts.status,
            input_file_path: parts.input_file_path,
            output_file_path: parts.output_file_path,
            retry_count: parts.retry_count,
            max_retries: parts.max_retries,
            error_message: parts.error_message,
            context: parts.context,
            notifications: parts.notifications,
            created_at: parts.created_at,
            updated_at: parts.updated_at,
            next_run_at: parts.next_run_at,
            finished_at: parts.finished_at,
        })
    }

    pub fn into_parts(self) -> JobParts {
        JobParts {
            job_id: self.job_id,
            job_type: self.job_type,
            input_metadata: self.input_metadata,
            status: self.status,
            input_file_path: self.input_file_path,
            output_file_path: self.output_file_path,
            retry_count: self.retry_count,
            max_retries: self.max_retries,
            error_message: self.error_message,
            context: self.context,
            notifications: self.notifications,
            created_at: self.created_at,
            updated_at: self.updated_at,
            next_run_at: self.next_run_at,
            finished_at: self.finished_at,
        }
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn job_type(&self) -> JobType {
        self.job_type
    }

    pub fn input_metadata(&self) -> &JsonMap {
        &self.input_metadata
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn input_file_path(&self) -> &str {
        &self.input_file_path
    }

    pub fn output_file_path(&self) -> Option<&str> {
        self.output_file_path.as_deref()
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn context(&self) -> &JsonMap {
        &self.context
    }

    pub fn notifications(&self) -> &JsonMap {
        &self.notifications
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn next_run_at(&self) -> Option<DateTime<Utc>> {
        self.next_run_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    /// Whether a claimer may pick this job up at `now`.
    pub fn is_claimable_at(&self, now: DateTime<Utc>) -> bool {
        self.status.is_claimable() && self.next_run_at.is_none_or(|at| at <= now)
    }

    /// Apply a status change.
    ///
    /// Returns the status the job actually landed in: a FAILED request is
    /// redirected to DEAD once `retry_count` reaches `max_retries`.
    ///
    /// On error the record is left untouched.
    pub fn transition_at(
        &mut self,
        to: JobStatus,
        error_message: Option<String>,
        next_run_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> JobResult<JobStatus> {
        let from = self.status;

        if from.is_terminal() {
            return Err(JobError::invalid_transition(from, to));
        }
        if from == to {
            return Ok(from);
        }
        if !from.can_transition_to(to) {
            return Err(JobError::invalid_transition(from, to));
        }

        let mut landed = to;
        match to {
            JobStatus::Failed => {
                // max_retries == 0 would otherwise push the count past the budget.
                self.retry_count = self.retry_count.saturating_add(1).min(self.max_retries);
                self.error_message = error_message;
                if self.retry_count >= self.max_retries {
                    landed = JobStatus::Dead;
                }
            }
            JobStatus::Retrying => {
                self.next_run_at = Some(next_run_at.ok_or(JobError::MissingNextRunAt)?);
            }
            _ => {}
        }

        self.status = landed;
        self.updated_at = now;
        if landed.is_terminal() && self.finished_at.is_none() {
            self.finished_at = Some(now);
        }

        Ok(landed)
    }

    /// [`Job::transition_at`] stamped with the current time.
    pub fn transition(
        &mut self,
        to: JobStatus,
        error_message: Option<String>,
        next_run_at: Option<DateTime<Utc>>,
    ) -> JobResult<JobStatus> {
        self.transition_at(to, error_message, next_run_at, Utc::now())
    }

    /// CREATED (or RETRYING) -> QUEUED.
    pub fn queue(&mut self, now: DateTime<Utc>) -> JobResult<()> {
        self.transition_at(JobStatus::Queued, None, None, now)?;
        Ok(())
    }

    /// PROCESSING -> COMPLETED, recording where the output was stored.
    pub fn complete(&mut self, output_file_path: impl Into<String>, now: DateTime<Utc>) -> JobResult<()> {
        self.transition_at(JobStatus::Completed, None, None, now)?;
        self.output_file_path = Some(output_file_path.into());
        Ok(())
    }

    /// Composite failure under the default policy.
    pub fn fail(&mut self, error: impl Into<String>, now: DateTime<Utc>) -> JobResult<FailureOutcome> {
        self.fail_with(&RetryPolicy::default(), error, now)
    }

    /// Composite failure: PROCESSING -> FAILED, then FAILED -> RETRYING or
    /// FAILED -> DEAD.
    ///
    /// A job already sitting in FAILED skips the first step (the count is not
    /// incremented twice). The caller persists the result as one unit.
    pub fn fail_with(
        &mut self,
        policy: &RetryPolicy,
        error: impl Into<String>,
        now: DateTime<Utc>,
    ) -> JobResult<FailureOutcome> {
        let landed = self.transition_at(JobStatus::Failed, Some(error.into()), None, now)?;

        if landed == JobStatus::Dead {
            return Ok(FailureOutcome::Dead);
        }

        if policy.should_retry(self) {
            let next_run_at = policy.next_run_at(self, now);
            self.transition_at(JobStatus::Retrying, None, Some(next_run_at), now)?;
            Ok(FailureOutcome::Retrying { next_run_at })
        } else {
            self.transition_at(JobStatus::Dead, None, None, now)?;
            Ok(FailureOutcome::Dead)
        }
    }

    /// Manual retry of a FAILED job: FAILED -> RETRYING -> QUEUED.
    ///
    /// The retry budget is not reset. DEAD is terminal and is rejected like
    /// any other transition out of it, as is a job whose budget is spent.
    /// `next_run_at` is set from the backoff policy, so the job becomes
    /// claimable once that instant passes.
    pub fn retry_manually(&mut self, now: DateTime<Utc>) -> JobResult<DateTime<Utc>> {
        self.retry_manually_with(&RetryPolicy::default(), now)
    }

    pub fn retry_manually_with(
        &mut self,
        policy: &RetryPolicy,
        now: DateTime<Utc>,
    ) -> JobResult<DateTime<Utc>> {
        if self.status != JobStatus::Failed || !policy.should_retry(self) {
            return Err(JobError::invalid_transition(self.status, JobStatus::Retrying));
        }

        let next_run_at = policy.next_run_at(self, now);
        self.transition_at(JobStatus::Retrying, None, Some(next_run_at), now)?;
        self.transition_at(JobStatus::Queued, None, None, now)?;
        Ok(next_run_at)
    }
}

impl TryFrom<JobParts> for Job {
    type Error = JobError;

    fn try_from(parts: JobParts) -> Result<Self, Self::Error> {
        Job::from_parts(parts)
    }
}

impl From<Job> for JobParts {
    fn from(job: Job) -> Self {
        job.into_parts()
    }
}
