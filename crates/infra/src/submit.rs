//! Job submission and manual retry.

use std::str::FromStr;
use std::sync::Arc;

use tracing::{info, warn};

use jobforge_core::{
    Job, JobError, JobId, JobType, JsonMap, NewJob, build_input_metadata, merge_metadata,
};

use crate::store::{JobStore, JobStoreError};
use crate::wake_queue::WakeQueue;

/// Retry budget when the caller does not choose one.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// A client's request to run one job.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubmitJobRequest {
    /// Job type tag, e.g. `"CSV_ROW_COUNT"`.
    pub job_type: String,
    pub input_file_path: String,
    /// Caller metadata; system keys for the job type take precedence.
    pub metadata: JsonMap,
    pub max_retries: Option<u32>,
    pub context: JsonMap,
    pub notifications: JsonMap,
}

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error(transparent)]
    Job(#[from] JobError),

    #[error(transparent)]
    Store(#[from] JobStoreError),
}

/// Creates jobs, queues them, and signals workers.
#[derive(Clone)]
pub struct JobSubmitter {
    store: Arc<dyn JobStore>,
    wake_queue: Arc<dyn WakeQueue>,
}

impl JobSubmitter {
    pub fn new(store: Arc<dyn JobStore>, wake_queue: Arc<dyn WakeQueue>) -> Self {
        Self { store, wake_queue }
    }

    /// Validate, persist as QUEUED in one write, then wake a worker.
    pub async fn submit(&self, request: SubmitJobRequest) -> Result<Job, SubmitError> {
        let job_type = JobType::from_str(request.job_type.trim())?;
        let input_file_path = request.input_file_path.trim().to_string();
        if input_file_path.is_empty() {
            return Err(JobError::validation("input_file_path is required").into());
        }

        let system = build_input_metadata(job_type, &input_file_path);
        let job = self
            .store
            .create_job(NewJob {
                job_type,
                input_metadata: merge_metadata(request.metadata, system),
                input_file_path,
                max_retries: request.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
                context: request.context,
                notifications: request.notifications,
            })
            .await?;
        info!(job_id = %job.job_id(), job_type = %job.job_type(), "job submitted");

        self.wake(job.job_id()).await;
        Ok(job)
    }

    /// Send a FAILED job with budget left back through RETRYING to QUEUED.
    ///
    /// The retry count is kept; DEAD jobs stay dead.
    pub async fn retry(&self, job_id: JobId) -> Result<Job, SubmitError> {
        let job = self.store.requeue(job_id).await?;
        info!(job_id = %job_id, job_type = %job.job_type(), "job manually re-queued");

        self.wake(job_id).await;
        Ok(job)
    }

    /// The store is authoritative; a lost wake signal only delays pickup.
    async fn wake(&self, job_id: JobId) {
        if let Err(err) = self.wake_queue.push(job_id).await {
            warn!(job_id = %job_id, error = %err, "failed to push wake signal");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryJobStore;
    use crate::wake_queue::InMemoryWakeQueue;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use jobforge_core::{FailureOutcome, JobStatus};
    use serde_json::json;
    use std::time::Duration;

    /// Store whose status updates all fail, as if the connection dropped
    /// right after an insert.
    struct NoUpdatesStore {
        inner: InMemoryJobStore,
    }

    #[async_trait]
    impl JobStore for NoUpdatesStore {
        async fn create_job(&self, new: NewJob) -> Result<Job, JobStoreError> {
            self.inner.create_job(new).await
        }

        async fn get_job(&self, job_id: JobId) -> Result<Option<Job>, JobStoreError> {
            self.inner.get_job(job_id).await
        }

        async fn list_jobs(&self, limit: u32, offset: u32) -> Result<Vec<Job>, JobStoreError> {
            self.inner.list_jobs(limit, offset).await
        }

        async fn count_jobs(&self) -> Result<u64, JobStoreError> {
            self.inner.count_jobs().await
        }

        async fn transition(
            &self,
            _job_id: JobId,
            _to: JobStatus,
            _error_message: Option<String>,
            _next_run_at: Option<DateTime<Utc>>,
        ) -> Result<Job, JobStoreError> {
            Err(JobStoreError::storage("connection reset"))
        }

        async fn complete(&self, _job_id: JobId, _path: String) -> Result<Job, JobStoreError> {
            Err(JobStoreError::storage("connection reset"))
        }

        async fn handle_failure(
            &self,
            _job_id: JobId,
            _error: String,
        ) -> Result<(Job, FailureOutcome), JobStoreError> {
            Err(JobStoreError::storage("connection reset"))
        }

        async fn claim_next_job(&self) -> Result<Option<Job>, JobStoreError> {
            self.inner.claim_next_job().await
        }

        async fn requeue(&self, _job_id: JobId) -> Result<Job, JobStoreError> {
            Err(JobStoreError::storage("connection reset"))
        }
    }

    fn setup() -> (Arc<InMemoryJobStore>, Arc<InMemoryWakeQueue>, JobSubmitter) {
        let store = InMemoryJobStore::arc();
        let queue = Arc::new(InMemoryWakeQueue::new());
        let submitter = JobSubmitter::new(store.clone(), queue.clone());
        (store, queue, submitter)
    }

    fn request(job_type: &str) -> SubmitJobRequest {
        SubmitJobRequest {
            job_type: job_type.into(),
            input_file_path: "data/in.csv".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn submit_queues_job_and_wakes_worker() {
        let (store, queue, submitter) = setup();

        let job = submitter.submit(request("CSV_ROW_COUNT")).await.unwrap();

        assert_eq!(job.status(), JobStatus::Queued);
        assert_eq!(job.max_retries(), DEFAULT_MAX_RETRIES);
        assert_eq!(store.get_job(job.job_id()).await.unwrap(), Some(job.clone()));
        assert_eq!(
            queue.pop(Duration::from_millis(10)).await.unwrap(),
            Some(job.job_id())
        );
    }

    #[tokio::test]
    async fn system_metadata_wins_over_caller_keys() {
        let (_, _, submitter) = setup();
        let mut req = request("CSV_DEDUPLICATE");
        req.metadata = json!({ "delimiter": ";", "key": "id" })
            .as_object()
            .cloned()
            .unwrap();

        let job = submitter.submit(req).await.unwrap();
        let metadata = job.input_metadata();

        assert_eq!(metadata["delimiter"], ",");
        assert_eq!(metadata["key"], "id");
        assert_eq!(metadata["source_path"], "data/in.csv");
    }

    #[tokio::test]
    async fn unknown_job_type_is_rejected() {
        let (store, _, submitter) = setup();

        let err = submitter.submit(request("PDF_RENDER")).await.unwrap_err();

        assert!(matches!(err, SubmitError::Job(JobError::UnsupportedJobType(_))));
        assert_eq!(store.count_jobs().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn empty_input_path_is_rejected() {
        let (_, _, submitter) = setup();
        let mut req = request("TEST_JOB");
        req.input_file_path = "   ".into();

        let err = submitter.submit(req).await.unwrap_err();
        assert!(matches!(err, SubmitError::Job(JobError::Validation(_))));
    }

    #[tokio::test]
    async fn submitted_job_is_queued_by_its_first_write() {
        let store = Arc::new(NoUpdatesStore {
            inner: InMemoryJobStore::new(),
        });
        let submitter = JobSubmitter::new(store.clone(), Arc::new(InMemoryWakeQueue::new()));

        let job = submitter.submit(request("TEST_JOB")).await.unwrap();

        let stored = store.get_job(job.job_id()).await.unwrap().unwrap();
        assert_eq!(stored.status(), JobStatus::Queued);
        let claimed = store.claim_next_job().await.unwrap().unwrap();
        assert_eq!(claimed.job_id(), job.job_id());
    }

    #[tokio::test]
    async fn retry_sends_failed_job_back_to_queue() {
        let (store, queue, submitter) = setup();
        let job = submitter.submit(request("TEST_JOB")).await.unwrap();
        queue.pop(Duration::from_millis(10)).await.unwrap();
        store.claim_next_job().await.unwrap().unwrap();
        store
            .transition(job.job_id(), JobStatus::Failed, Some("boom".into()), None)
            .await
            .unwrap();

        let retried = submitter.retry(job.job_id()).await.unwrap();

        assert_eq!(retried.status(), JobStatus::Queued);
        assert_eq!(retried.retry_count(), 1);
        assert!(retried.next_run_at().is_some());
        assert_eq!(
            queue.pop(Duration::from_millis(10)).await.unwrap(),
            Some(job.job_id())
        );
    }

    #[tokio::test]
    async fn retry_rejects_live_jobs() {
        let (_, _, submitter) = setup();
        let job = submitter.submit(request("TEST_JOB")).await.unwrap();

        let err = submitter.retry(job.job_id()).await.unwrap_err();
        assert!(matches!(
            err,
            SubmitError::Store(JobStoreError::Job(JobError::InvalidTransition { .. }))
        ));
    }
}
