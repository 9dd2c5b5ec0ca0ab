//! In-memory job store for tests/dev.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use jobforge_core::{FailureOutcome, Job, JobError, JobId, JobStatus, NewJob};

use super::{JobStore, JobStoreError};

/// Job store backed by a `HashMap` behind one lock.
///
/// Claims hold the write lock across selection and transition, so concurrent
/// claimers never see the same job.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// [`JobStore::claim_next_job`] evaluated at an explicit instant.
    pub fn claim_next_at(&self, now: DateTime<Utc>) -> Result<Option<Job>, JobStoreError> {
        let mut jobs = self.write()?;

        let Some(job) = jobs
            .values_mut()
            .filter(|j| j.is_claimable_at(now))
            .min_by_key(|j| (j.created_at(), j.job_id()))
        else {
            return Ok(None);
        };

        let mut claimed = job.clone();
        claimed.transition_at(JobStatus::Processing, None, None, now)?;
        *job = claimed.clone();

        debug!(job_id = %claimed.job_id(), job_type = %claimed.job_type(), "claimed job");
        Ok(Some(claimed))
    }

    /// Apply `op` to a copy of the stored job and keep it only if `op` succeeds.
    fn update_with<T>(
        &self,
        job_id: JobId,
        op: impl FnOnce(&mut Job, DateTime<Utc>) -> Result<T, JobError>,
    ) -> Result<(Job, T), JobStoreError> {
        let mut jobs = self.write()?;
        let stored = jobs.get_mut(&job_id).ok_or(JobStoreError::NotFound(job_id))?;

        let mut job = stored.clone();
        let out = op(&mut job, Utc::now())?;
        *stored = job.clone();
        Ok((job, out))
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<JobId, Job>>, JobStoreError> {
        self.jobs
            .read()
            .map_err(|_| JobStoreError::storage("job map lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<JobId, Job>>, JobStoreError> {
        self.jobs
            .write()
            .map_err(|_| JobStoreError::storage("job map lock poisoned"))
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create_job(&self, new: NewJob) -> Result<Job, JobStoreError> {
        let job = Job::create_queued(new, Utc::now())?;
        let mut jobs = self.write()?;
        if jobs.contains_key(&job.job_id()) {
            return Err(JobStoreError::AlreadyExists(job.job_id()));
        }
        jobs.insert(job.job_id(), job.clone());
        Ok(job)
    }

    async fn get_job(&self, job_id: JobId) -> Result<Option<Job>, JobStoreError> {
        Ok(self.read()?.get(&job_id).cloned())
    }

    async fn list_jobs(&self, limit: u32, offset: u32) -> Result<Vec<Job>, JobStoreError> {
        let jobs = self.read()?;
        let mut result: Vec<Job> = jobs.values().cloned().collect();
        result.sort_by(|a, b| {
            b.created_at()
                .cmp(&a.created_at())
                .then_with(|| b.job_id().cmp(&a.job_id()))
        });
        Ok(result
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    async fn count_jobs(&self) -> Result<u64, JobStoreError> {
        Ok(self.read()?.len() as u64)
    }

    async fn transition(
        &self,
        job_id: JobId,
        to: JobStatus,
        error_message: Option<String>,
        next_run_at: Option<DateTime<Utc>>,
    ) -> Result<Job, JobStoreError> {
        let (job, _) = self.update_with(job_id, |job, now| {
            job.transition_at(to, error_message, next_run_at, now)
        })?;
        Ok(job)
    }

    async fn complete(&self, job_id: JobId, output_file_path: String) -> Result<Job, JobStoreError> {
        let (job, ()) = self.update_with(job_id, |job, now| job.complete(output_file_path, now))?;
        Ok(job)
    }

    async fn handle_failure(
        &self,
        job_id: JobId,
        error: String,
    ) -> Result<(Job, FailureOutcome), JobStoreError> {
        self.update_with(job_id, |job, now| job.fail(error, now))
    }

    async fn claim_next_job(&self) -> Result<Option<Job>, JobStoreError> {
        self.claim_next_at(Utc::now())
    }

    async fn requeue(&self, job_id: JobId) -> Result<Job, JobStoreError> {
        let (job, _) = self.update_with(job_id, |job, now| job.retry_manually(now))?;
        Ok(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobforge_core::{JobType, JsonMap};

    fn new_job(max_retries: u32) -> NewJob {
        NewJob {
            job_type: JobType::TestJob,
            input_file_path: "uploads/input.txt".to_string(),
            input_metadata: JsonMap::new(),
            max_retries,
            context: JsonMap::new(),
            notifications: JsonMap::new(),
        }
    }

    async fn queued(store: &InMemoryJobStore, max_retries: u32) -> Job {
        store.create_job(new_job(max_retries)).await.unwrap()
    }

    /// Claim `job` and record a bare FAILED without the retry composite.
    async fn failed(store: &InMemoryJobStore, job: &Job) -> Job {
        store.claim_next_job().await.unwrap().unwrap();
        store
            .transition(job.job_id(), JobStatus::Failed, Some("boom".into()), None)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn create_then_get() {
        let store = InMemoryJobStore::new();
        let job = store.create_job(new_job(3)).await.unwrap();

        assert_eq!(job.status(), JobStatus::Queued);
        assert_eq!(store.get_job(job.job_id()).await.unwrap(), Some(job));
        assert_eq!(store.count_jobs().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn unknown_job_is_not_found() {
        let store = InMemoryJobStore::new();
        let err = store.mark_queued(JobId::new()).await.unwrap_err();
        assert!(matches!(err, JobStoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn rejected_transition_leaves_record_untouched() {
        let store = InMemoryJobStore::new();
        let job = store.create_job(new_job(3)).await.unwrap();

        let err = store
            .transition(job.job_id(), JobStatus::Completed, None, None)
            .await
            .unwrap_err();

        assert!(matches!(err, JobStoreError::Job(JobError::InvalidTransition { .. })));
        assert_eq!(store.get_job(job.job_id()).await.unwrap(), Some(job));
    }

    #[tokio::test]
    async fn claim_picks_oldest_and_marks_processing() {
        let store = InMemoryJobStore::new();
        let first = queued(&store, 3).await;
        let _second = queued(&store, 3).await;

        let claimed = store.claim_next_job().await.unwrap().unwrap();
        assert_eq!(claimed.job_id(), first.job_id());
        assert_eq!(claimed.status(), JobStatus::Processing);

        let stored = store.get_job(first.job_id()).await.unwrap().unwrap();
        assert_eq!(stored.status(), JobStatus::Processing);
    }

    #[tokio::test]
    async fn requeued_retry_still_waits_for_next_run_at() {
        let store = InMemoryJobStore::new();
        let job = queued(&store, 3).await;
        failed(&store, &job).await;
        let later = Utc::now() + chrono::Duration::seconds(30);
        store
            .transition(job.job_id(), JobStatus::Retrying, None, Some(later))
            .await
            .unwrap();

        let job = store.mark_queued(job.job_id()).await.unwrap();

        assert_eq!(job.status(), JobStatus::Queued);
        assert!(store.claim_next_job().await.unwrap().is_none());
        assert!(store.claim_next_at(later).unwrap().is_some());
    }

    #[tokio::test]
    async fn failure_schedules_retry_then_dead_letters() {
        let store = InMemoryJobStore::new();
        let job = queued(&store, 2).await;
        store.claim_next_job().await.unwrap().unwrap();

        let (job, outcome) = store
            .handle_failure(job.job_id(), "boom".into())
            .await
            .unwrap();
        assert!(matches!(outcome, FailureOutcome::Retrying { .. }));
        assert_eq!(job.status(), JobStatus::Retrying);
        assert_eq!(job.retry_count(), 1);

        let next = job.next_run_at().unwrap();
        let claimed = store.claim_next_at(next).unwrap().unwrap();
        assert_eq!(claimed.job_id(), job.job_id());

        let (job, outcome) = store
            .handle_failure(job.job_id(), "boom again".into())
            .await
            .unwrap();
        assert_eq!(outcome, FailureOutcome::Dead);
        assert_eq!(job.status(), JobStatus::Dead);
        assert_eq!(job.retry_count(), 2);
        assert!(job.finished_at().is_some());
    }

    #[tokio::test]
    async fn complete_records_output_path() {
        let store = InMemoryJobStore::new();
        let job = queued(&store, 3).await;
        store.claim_next_job().await.unwrap();

        let done = store
            .complete(job.job_id(), "results/x.json".into())
            .await
            .unwrap();
        assert_eq!(done.status(), JobStatus::Completed);
        assert_eq!(done.output_file_path(), Some("results/x.json"));
    }

    #[tokio::test]
    async fn requeue_keeps_retry_count_and_schedules_backoff() {
        let store = InMemoryJobStore::new();
        let job = queued(&store, 3).await;

        let err = store.requeue(job.job_id()).await.unwrap_err();
        assert!(matches!(err, JobStoreError::Job(JobError::InvalidTransition { .. })));

        failed(&store, &job).await;
        let before = Utc::now();
        let job = store.requeue(job.job_id()).await.unwrap();

        assert_eq!(job.status(), JobStatus::Queued);
        assert_eq!(job.retry_count(), 1);
        assert_eq!(job.error_message(), Some("boom"));
        assert!(job.next_run_at().unwrap() >= before + chrono::Duration::seconds(2));
        assert!(store.claim_next_job().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn requeue_rejects_dead_jobs() {
        let store = InMemoryJobStore::new();
        let job = queued(&store, 1).await;
        store.claim_next_job().await.unwrap();
        let (dead, outcome) = store
            .handle_failure(job.job_id(), "boom".into())
            .await
            .unwrap();
        assert_eq!(outcome, FailureOutcome::Dead);

        let err = store.requeue(job.job_id()).await.unwrap_err();

        assert!(matches!(
            err,
            JobStoreError::Job(JobError::InvalidTransition {
                from: JobStatus::Dead,
                ..
            })
        ));
        assert_eq!(store.get_job(job.job_id()).await.unwrap(), Some(dead));
    }

    #[tokio::test]
    async fn list_is_newest_first_and_paged() {
        let store = InMemoryJobStore::new();
        let mut ids = Vec::new();
        for _ in 0..3 {
            ids.push(store.create_job(new_job(3)).await.unwrap().job_id());
        }

        let page: Vec<JobId> = store
            .list_jobs(2, 0)
            .await
            .unwrap()
            .iter()
            .map(Job::job_id)
            .collect();
        assert_eq!(page, vec![ids[2], ids[1]]);

        let rest = store.list_jobs(2, 2).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].job_id(), ids[0]);
    }
}
