//! `jobforge-core` — job lifecycle domain.
//!
//! This crate contains the **pure** parts of the engine (no I/O):
//! the job record, its state machine, the retry/backoff policy and the
//! system-owned input metadata rules. Persistence, queues and workers live in
//! `jobforge-infra`.

pub mod error;
pub mod event;
pub mod id;
pub mod job;
pub mod job_type;
pub mod metadata;
pub mod retry;
pub mod status;

pub use error::{JobError, JobResult};
pub use event::JobEvent;
pub use id::JobId;
pub use job::{FailureOutcome, Job, JobParts, NewJob};
pub use job_type::JobType;
pub use metadata::{JsonMap, build_input_metadata, merge_metadata};
pub use retry::{RetryPolicy, backoff_delay, compute_next_run_at, should_retry};
pub use status::JobStatus;
