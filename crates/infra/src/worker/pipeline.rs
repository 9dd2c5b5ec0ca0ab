//! Execution of one claimed job: fetch, process, upload, record, notify.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use jobforge_core::{FailureOutcome, Job, JobEvent, JobId};
use jobforge_processors::{ProcessorError, ProcessorInput, ProcessorRegistry};

use crate::notifications::NotificationDispatcher;
use crate::storage::{ObjectStore, StorageError};
use crate::store::{JobStore, JobStoreError};

/// Where a finished job ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineOutcome {
    Completed,
    Retrying { next_run_at: DateTime<Utc> },
    Dead,
}

impl From<FailureOutcome> for PipelineOutcome {
    fn from(outcome: FailureOutcome) -> Self {
        match outcome {
            FailureOutcome::Retrying { next_run_at } => PipelineOutcome::Retrying { next_run_at },
            FailureOutcome::Dead => PipelineOutcome::Dead,
        }
    }
}

/// A failure while running the job. Always recorded on the job, never
/// returned to the worker loop.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("failed to prepare workspace: {0}")]
    Workspace(#[source] std::io::Error),

    #[error("failed to fetch input: {0}")]
    Fetch(#[source] StorageError),

    #[error(transparent)]
    Processor(#[from] ProcessorError),

    #[error("processor panicked: {0}")]
    Panicked(String),

    #[error("failed to serialize result: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to upload result: {0}")]
    Upload(#[source] StorageError),
}

/// Store errors while recording the outcome. The job state is then whatever
/// the store last committed.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("failed to record outcome for job {job_id}: {source}")]
    Store {
        job_id: JobId,
        #[source]
        source: JobStoreError,
    },
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub input_bucket: String,
    pub output_bucket: String,
    /// Each job gets `<scratch_root>/<job_id>/`, removed afterwards.
    pub scratch_root: PathBuf,
}

/// Deterministic result key for a job.
pub fn output_key(job_id: JobId) -> String {
    format!("results/{job_id}.json")
}

#[derive(Clone)]
pub struct Pipeline {
    store: Arc<dyn JobStore>,
    objects: Arc<dyn ObjectStore>,
    registry: Arc<ProcessorRegistry>,
    dispatcher: NotificationDispatcher,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn JobStore>,
        objects: Arc<dyn ObjectStore>,
        registry: Arc<ProcessorRegistry>,
        dispatcher: NotificationDispatcher,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            store,
            objects,
            registry,
            dispatcher,
            settings,
        }
    }

    /// Run a job the caller has already claimed (status PROCESSING).
    ///
    /// The terminal or retry transition is committed before any notification
    /// is dispatched.
    pub async fn run(&self, job: Job) -> Result<PipelineOutcome, PipelineError> {
        let job_id = job.job_id();
        let workspace = self.settings.scratch_root.join(job_id.to_string());

        let result = self.execute(&job, &workspace).await;
        if let Err(e) = tokio::fs::remove_dir_all(&workspace).await {
            debug!(job_id = %job_id, error = %e, "workspace cleanup skipped");
        }

        let store_err = |source| PipelineError::Store { job_id, source };

        match result {
            Ok(output_path) => {
                let done = self
                    .store
                    .complete(job_id, output_path)
                    .await
                    .map_err(store_err)?;
                info!(
                    job_id = %job_id,
                    job_type = %done.job_type(),
                    status = %done.status(),
                    "job completed"
                );
                let _ = self.dispatcher.dispatch(&done, JobEvent::Success);
                Ok(PipelineOutcome::Completed)
            }
            Err(err) => {
                let (failed, outcome) = self
                    .store
                    .handle_failure(job_id, err.to_string())
                    .await
                    .map_err(store_err)?;
                match outcome {
                    FailureOutcome::Retrying { next_run_at } => info!(
                        job_id = %job_id,
                        job_type = %failed.job_type(),
                        retry_count = failed.retry_count(),
                        next_run_at = %next_run_at,
                        error = %err,
                        "job failed; retry scheduled"
                    ),
                    FailureOutcome::Dead => warn!(
                        job_id = %job_id,
                        job_type = %failed.job_type(),
                        retry_count = failed.retry_count(),
                        error = %err,
                        "job dead-lettered"
                    ),
                }
                let _ = self.dispatcher.dispatch(&failed, JobEvent::Failure);
                Ok(outcome.into())
            }
        }
    }

    /// Steps that count as job failure. Returns the uploaded result key.
    async fn execute(&self, job: &Job, workspace: &Path) -> Result<String, ExecutionError> {
        tokio::fs::create_dir_all(workspace)
            .await
            .map_err(ExecutionError::Workspace)?;

        let data = self
            .objects
            .get(&self.settings.input_bucket, job.input_file_path())
            .await
            .map_err(ExecutionError::Fetch)?;

        let file_name = Path::new(job.input_file_path())
            .file_name()
            .map_or_else(|| "input".into(), |n| n.to_os_string());
        let local_path = workspace.join(file_name);
        tokio::fs::write(&local_path, &data)
            .await
            .map_err(ExecutionError::Workspace)?;

        let input = ProcessorInput {
            job_id: job.job_id(),
            job_type: job.job_type(),
            input_path: local_path,
            metadata: job.input_metadata().clone(),
        };
        let registry = self.registry.clone();
        let result = tokio::task::spawn_blocking(move || registry.process(&input))
            .await
            .map_err(|e| ExecutionError::Panicked(e.to_string()))??;

        let body = serde_json::to_vec_pretty(&result)?;
        let key = output_key(job.job_id());
        self.objects
            .put(
                &self.settings.output_bucket,
                &key,
                Bytes::from(body),
                Some("application/json"),
            )
            .await
            .map_err(ExecutionError::Upload)?;

        Ok(key)
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("registry", &self.registry)
            .field("dispatcher", &self.dispatcher)
            .field("settings", &self.settings)
            .finish()
    }
}
