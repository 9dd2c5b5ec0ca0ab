use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tracing::info;

use jobforge_core::{Job, JobEvent};

use super::{NotificationError, NotificationProvider};

/// Writes every lifecycle event to the structured log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProvider;

#[async_trait]
impl NotificationProvider for LogProvider {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn send(&self, job: &Job, event: JobEvent) -> Result<(), NotificationError> {
        info!(
            job_id = %job.job_id(),
            job_type = %job.job_type(),
            status = %job.status(),
            event = %event,
            context = %JsonValue::Object(job.context().clone()),
            notifications = %JsonValue::Object(job.notifications().clone()),
            "job notification"
        );
        Ok(())
    }
}
