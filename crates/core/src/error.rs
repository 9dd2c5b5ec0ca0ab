//! Job domain error model.

use thiserror::Error;

use crate::status::JobStatus;

/// Result type used across the job domain.
pub type JobResult<T> = Result<T, JobError>;

/// Job-level error.
///
/// These are deterministic contract failures. Infrastructure failures
/// (database, object storage, queues) are modelled by the infra crate.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JobError {
    /// The requested status change is not in the transition table, or the
    /// job is already terminal.
    #[error("invalid transition {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    /// Entering RETRYING without an eligibility time.
    #[error("transition to RETRYING requires next_run_at")]
    MissingNextRunAt,

    /// No processor/metadata rule exists for this job type tag.
    #[error("unsupported job type: {0}")]
    UnsupportedJobType(String),

    /// A submitted value failed validation.
    #[error("validation failed: {0}")]
    Validation(String),

    /// An identifier could not be parsed.
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A stored record breaks a job invariant (e.g. `retry_count > max_retries`).
    #[error("job invariant violated: {0}")]
    InvariantViolation(String),
}

impl JobError {
    pub fn invalid_transition(from: JobStatus, to: JobStatus) -> Self {
        Self::InvalidTransition { from, to }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn unsupported(tag: impl Into<String>) -> Self {
        Self::UnsupportedJobType(tag.into())
    }
}
