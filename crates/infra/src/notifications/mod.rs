//! Job lifecycle notifications.
//!
//! Dispatch never blocks or fails the caller: every provider runs in its own
//! task with a timeout, and provider errors, timeouts and panics end up in the
//! log only.

pub mod email;
pub mod log;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use jobforge_core::{Job, JobEvent};

pub use email::{EmailProvider, MailtrapConfig};
pub use log::LogProvider;

/// Default per-provider time budget.
pub const DEFAULT_NOTIFY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("notification transport error: {0}")]
    Transport(String),

    #[error("notification rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("notification provider misconfigured: {0}")]
    Config(String),
}

/// One notification channel.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationProvider: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Deliver `event` for `job`. Providers decide for themselves whether the
    /// job asked for this channel; not asking is `Ok(())`.
    async fn send(&self, job: &Job, event: JobEvent) -> Result<(), NotificationError>;
}

/// Fans a lifecycle event out to every registered provider.
#[derive(Clone)]
pub struct NotificationDispatcher {
    providers: Vec<Arc<dyn NotificationProvider>>,
    timeout: Duration,
}

/// Handles of the provider tasks started by one dispatch.
///
/// Dropping it detaches the tasks.
#[derive(Debug, Default)]
pub struct Dispatch {
    handles: Vec<JoinHandle<()>>,
}

impl Dispatch {
    /// Wait until every provider task has finished or timed out.
    pub async fn finished(self) {
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

impl NotificationDispatcher {
    pub fn new(timeout: Duration) -> Self {
        Self {
            providers: Vec::new(),
            timeout,
        }
    }

    pub fn with_provider(mut self, provider: impl NotificationProvider + 'static) -> Self {
        self.providers.push(Arc::new(provider));
        self
    }

    pub fn push(&mut self, provider: Arc<dyn NotificationProvider>) {
        self.providers.push(provider);
    }

    pub fn provider_names(&self) -> Vec<&'static str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    /// Start delivery of `event` for `job` and return immediately.
    pub fn dispatch(&self, job: &Job, event: JobEvent) -> Dispatch {
        let job = Arc::new(job.clone());
        let handles = self
            .providers
            .iter()
            .map(|provider| {
                let provider = provider.clone();
                let job = job.clone();
                let timeout = self.timeout;
                tokio::spawn(async move { deliver(provider, job, event, timeout).await })
            })
            .collect();
        Dispatch { handles }
    }
}

impl Default for NotificationDispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_NOTIFY_TIMEOUT)
    }
}

impl std::fmt::Debug for NotificationDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationDispatcher")
            .field("providers", &self.provider_names())
            .field("timeout", &self.timeout)
            .finish()
    }
}

async fn deliver(
    provider: Arc<dyn NotificationProvider>,
    job: Arc<Job>,
    event: JobEvent,
    timeout: Duration,
) {
    let name = provider.name();
    let job_id = job.job_id();

    let mut task = tokio::spawn(async move { provider.send(&job, event).await });
    match tokio::time::timeout(timeout, &mut task).await {
        Ok(Ok(Ok(()))) => {
            debug!(provider = name, job_id = %job_id, event = %event, "notification delivered");
        }
        Ok(Ok(Err(err))) => {
            warn!(provider = name, job_id = %job_id, event = %event, error = %err, "notification failed");
        }
        Ok(Err(join_err)) => {
            error!(provider = name, job_id = %job_id, event = %event, error = %join_err, "notification provider panicked");
        }
        Err(_) => {
            task.abort();
            warn!(provider = name, job_id = %job_id, event = %event, timeout_ms = timeout.as_millis() as u64, "notification timed out");
        }
    }
}
