//! Wake queue: a best-effort "work may be available" signal.
//!
//! Workers always go back to the store to claim; a popped id is only a hint
//! and may name a job that is already taken or not yet eligible.

#[cfg(feature = "redis")]
pub mod redis_list;

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};

use jobforge_core::JobId;

#[cfg(feature = "redis")]
pub use redis_list::RedisWakeQueue;

/// Key of the Redis list carrying wake signals.
pub const DEFAULT_QUEUE_KEY: &str = "job_queue";

#[derive(Debug, thiserror::Error)]
pub enum WakeQueueError {
    #[error("wake queue connection error: {0}")]
    Connection(String),

    #[error("wake queue command error: {0}")]
    Command(String),

    #[error("undecodable wake signal: {0}")]
    Decode(String),
}

#[async_trait]
pub trait WakeQueue: Send + Sync {
    async fn push(&self, job_id: JobId) -> Result<(), WakeQueueError>;

    /// Wait up to `timeout` for a signal. `None` on timeout.
    async fn pop(&self, timeout: Duration) -> Result<Option<JobId>, WakeQueueError>;
}

/// Process-local wake queue for single-binary deployments and tests.
#[derive(Debug, Default)]
pub struct InMemoryWakeQueue {
    items: Mutex<VecDeque<JobId>>,
    notify: Notify,
}

impl InMemoryWakeQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.items.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.lock().await.is_empty()
    }
}

#[async_trait]
impl WakeQueue for InMemoryWakeQueue {
    async fn push(&self, job_id: JobId) -> Result<(), WakeQueueError> {
        self.items.lock().await.push_back(job_id);
        self.notify.notify_one();
        Ok(())
    }

    async fn pop(&self, timeout: Duration) -> Result<Option<JobId>, WakeQueueError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(job_id) = self.items.lock().await.pop_front() {
                return Ok(Some(job_id));
            }
            if tokio::time::timeout_at(deadline, self.notify.notified())
                .await
                .is_err()
            {
                return Ok(None);
            }
        }
    }
}
