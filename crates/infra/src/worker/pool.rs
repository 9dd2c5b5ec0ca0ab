//! Worker loop and pool.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::store::{JobStore, JobStoreError};
use crate::wake_queue::WakeQueue;

use super::pipeline::{Pipeline, PipelineError, PipelineOutcome};

/// Errors a worker iteration can hit outside job execution.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("claim failed: {0}")]
    Claim(#[from] JobStoreError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Longest wait on the wake queue before polling the store anyway.
    pub wake_timeout: Duration,
    /// Sleep after a claim found nothing.
    pub idle_sleep: Duration,
    /// Sleep after an unexpected error (e.g. store unreachable).
    pub error_backoff: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            wake_timeout: Duration::from_secs(5),
            idle_sleep: Duration::from_secs(1),
            error_backoff: Duration::from_secs(2),
        }
    }
}

/// Pool runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct PoolStats {
    pub jobs_processed: u64,
    pub jobs_completed: u64,
    pub jobs_retrying: u64,
    pub jobs_dead: u64,
    pub errors: u64,
    pub uptime_secs: u64,
}

/// What one loop iteration did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    Ran(PipelineOutcome),
    Idle,
}

/// One claim-and-run loop. All coordination with other workers goes
/// through the store.
#[derive(Clone)]
pub struct Worker {
    id: usize,
    store: Arc<dyn JobStore>,
    wake_queue: Arc<dyn WakeQueue>,
    pipeline: Arc<Pipeline>,
    settings: WorkerSettings,
    stats: Arc<Mutex<PoolStats>>,
}

impl Worker {
    pub fn new(
        id: usize,
        store: Arc<dyn JobStore>,
        wake_queue: Arc<dyn WakeQueue>,
        pipeline: Arc<Pipeline>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            id,
            store,
            wake_queue,
            pipeline,
            settings,
            stats: Arc::default(),
        }
    }

    /// Claim one job if any is eligible and run it to its next resting state.
    pub async fn run_once(&self) -> Result<Tick, WorkerError> {
        let Some(job) = self.store.claim_next_job().await? else {
            return Ok(Tick::Idle);
        };

        info!(
            worker_id = self.id,
            job_id = %job.job_id(),
            job_type = %job.job_type(),
            retry_count = job.retry_count(),
            "claimed job"
        );

        let outcome = self.pipeline.run(job).await?;
        self.record(|s| {
            s.jobs_processed += 1;
            match outcome {
                PipelineOutcome::Completed => s.jobs_completed += 1,
                PipelineOutcome::Retrying { .. } => s.jobs_retrying += 1,
                PipelineOutcome::Dead => s.jobs_dead += 1,
            }
        });
        Ok(Tick::Ran(outcome))
    }

    /// Loop until `shutdown` fires. A job already running is finished first.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(worker_id = self.id, "worker started");

        loop {
            if matches!(shutdown.try_recv(), Ok(()) | Err(TryRecvError::Closed)) {
                break;
            }

            let hint = tokio::select! {
                _ = shutdown.recv() => break,
                hint = self.wake_queue.pop(self.settings.wake_timeout) => hint,
            };
            match hint {
                Ok(Some(job_id)) => debug!(worker_id = self.id, job_id = %job_id, "woken"),
                Ok(None) => {}
                Err(e) => warn!(worker_id = self.id, error = %e, "wake queue unavailable"),
            }

            let pause = match self.run_once().await {
                Ok(Tick::Ran(_)) => None,
                Ok(Tick::Idle) => Some(self.settings.idle_sleep),
                Err(e) => {
                    self.record(|s| s.errors += 1);
                    error!(worker_id = self.id, error = %e, "worker iteration failed");
                    Some(self.settings.error_backoff)
                }
            };

            if let Some(pause) = pause {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    _ = tokio::time::sleep(pause) => {}
                }
            }
        }

        info!(worker_id = self.id, "worker stopped");
    }

    fn record(&self, update: impl FnOnce(&mut PoolStats)) {
        if let Ok(mut stats) = self.stats.lock() {
            update(&mut stats);
        }
    }
}

/// Handle to a set of running workers.
#[derive(Debug)]
pub struct WorkerPool {
    shutdown: broadcast::Sender<()>,
    handles: Vec<JoinHandle<()>>,
    stats: Arc<Mutex<PoolStats>>,
    started: Instant,
}

impl WorkerPool {
    /// Spawn `concurrency` workers sharing one store, queue and pipeline.
    pub fn spawn(
        concurrency: usize,
        store: Arc<dyn JobStore>,
        wake_queue: Arc<dyn WakeQueue>,
        pipeline: Arc<Pipeline>,
        settings: WorkerSettings,
    ) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        let stats = Arc::new(Mutex::new(PoolStats::default()));

        let handles = (0..concurrency)
            .map(|id| {
                let worker = Worker {
                    stats: stats.clone(),
                    ..Worker::new(
                        id,
                        store.clone(),
                        wake_queue.clone(),
                        pipeline.clone(),
                        settings.clone(),
                    )
                };
                tokio::spawn(worker.run(shutdown.subscribe()))
            })
            .collect();

        info!(concurrency, "worker pool started");
        Self {
            shutdown,
            handles,
            stats,
            started: Instant::now(),
        }
    }

    pub fn stats(&self) -> PoolStats {
        let mut stats = self
            .stats
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default();
        stats.uptime_secs = self.started.elapsed().as_secs();
        stats
    }

    /// Signal every worker and wait for them to finish their current job.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(());
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!(error = %e, "worker task ended abnormally");
            }
        }
        info!("worker pool stopped");
    }
}
