//! Durable job storage.
//!
//! ## Design
//!
//! - The store is the only authority on job state; queues are hints
//! - Every mutation reads the current record, applies a [`Job`] state-machine
//!   operation, and writes it back as one atomic unit
//! - A failed state-machine check leaves the stored record untouched
//! - `claim_next_job` hands each eligible job to at most one caller
//!
//! ## Components
//!
//! - `JobStore`: async persistence contract
//! - `InMemoryJobStore`: single-process store for tests/dev
//! - `PostgresJobStore`: row-locking store backed by sqlx

pub mod in_memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use jobforge_core::{FailureOutcome, Job, JobError, JobId, JobStatus, NewJob};

pub use in_memory::InMemoryJobStore;
pub use postgres::PostgresJobStore;

/// Job store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum JobStoreError {
    #[error("job not found: {0}")]
    NotFound(JobId),

    #[error("job already exists: {0}")]
    AlreadyExists(JobId),

    #[error(transparent)]
    Job(#[from] JobError),

    #[error("storage error: {0}")]
    Storage(String),
}

impl JobStoreError {
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }
}

/// Persistence contract for job records.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a new job. It is queued before the write, so no reader ever
    /// sees it in CREATED.
    async fn create_job(&self, new: NewJob) -> Result<Job, JobStoreError>;

    async fn get_job(&self, job_id: JobId) -> Result<Option<Job>, JobStoreError>;

    /// Page through jobs, newest first.
    async fn list_jobs(&self, limit: u32, offset: u32) -> Result<Vec<Job>, JobStoreError>;

    async fn count_jobs(&self) -> Result<u64, JobStoreError>;

    /// Apply one state-machine transition to the stored job.
    ///
    /// Requesting the job's current status returns it unchanged.
    async fn transition(
        &self,
        job_id: JobId,
        to: JobStatus,
        error_message: Option<String>,
        next_run_at: Option<DateTime<Utc>>,
    ) -> Result<Job, JobStoreError>;

    /// RETRYING -> QUEUED. Queueing an already QUEUED job is a no-op.
    async fn mark_queued(&self, job_id: JobId) -> Result<Job, JobStoreError> {
        self.transition(job_id, JobStatus::Queued, None, None).await
    }

    /// PROCESSING -> COMPLETED with the uploaded result key.
    async fn complete(&self, job_id: JobId, output_file_path: String) -> Result<Job, JobStoreError>;

    /// Record a processing failure and schedule a retry or dead-letter the job.
    async fn handle_failure(
        &self,
        job_id: JobId,
        error: String,
    ) -> Result<(Job, FailureOutcome), JobStoreError>;

    /// Atomically move the oldest eligible job to PROCESSING.
    async fn claim_next_job(&self) -> Result<Option<Job>, JobStoreError>;

    /// Manual retry of a FAILED job with budget left: FAILED -> RETRYING ->
    /// QUEUED, `next_run_at` from the backoff policy. DEAD jobs are rejected.
    async fn requeue(&self, job_id: JobId) -> Result<Job, JobStoreError>;
}

