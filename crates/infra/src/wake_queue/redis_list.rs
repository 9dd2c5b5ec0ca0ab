//! Redis list-backed wake queue (`LPUSH` / `BRPOP`).
//!
//! The redis client here is synchronous; each command runs on the blocking
//! pool so a 5 s `BRPOP` never stalls the async runtime.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::instrument;

use jobforge_core::JobId;

use super::{DEFAULT_QUEUE_KEY, WakeQueue, WakeQueueError};

#[derive(Debug, Clone)]
pub struct RedisWakeQueue {
    client: Arc<redis::Client>,
    key: String,
}

impl RedisWakeQueue {
    /// Create a wake queue on `redis_url` (e.g. "redis://localhost:6379").
    ///
    /// `key` defaults to [`DEFAULT_QUEUE_KEY`].
    pub fn new(redis_url: impl AsRef<str>, key: Option<String>) -> Result<Self, WakeQueueError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| WakeQueueError::Connection(e.to_string()))?;

        Ok(Self {
            client: Arc::new(client),
            key: key.unwrap_or_else(|| DEFAULT_QUEUE_KEY.to_string()),
        })
    }

    async fn run<T, F>(&self, command: F) -> Result<T, WakeQueueError>
    where
        F: FnOnce(&mut redis::Connection, &str) -> redis::RedisResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let client = self.client.clone();
        let key = self.key.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = client
                .get_connection()
                .map_err(|e| WakeQueueError::Connection(e.to_string()))?;
            command(&mut conn, &key).map_err(|e| WakeQueueError::Command(e.to_string()))
        })
        .await
        .map_err(|e| WakeQueueError::Command(format!("redis task failed: {e}")))?
    }
}

#[async_trait]
impl WakeQueue for RedisWakeQueue {
    #[instrument(skip(self), fields(key = %self.key, job_id = %job_id), err)]
    async fn push(&self, job_id: JobId) -> Result<(), WakeQueueError> {
        let payload = job_id.to_string();
        let _: i64 = self
            .run(move |conn, key| redis::cmd("LPUSH").arg(key).arg(payload).query(conn))
            .await?;
        Ok(())
    }

    async fn pop(&self, timeout: Duration) -> Result<Option<JobId>, WakeQueueError> {
        // BRPOP treats 0 as "block forever".
        let secs = timeout.as_secs().max(1);
        let reply: Option<(String, String)> = self
            .run(move |conn, key| redis::cmd("BRPOP").arg(key).arg(secs).query(conn))
            .await?;

        reply
            .map(|(_, payload)| {
                JobId::from_str(&payload).map_err(|e| WakeQueueError::Decode(e.to_string()))
            })
            .transpose()
    }
}
