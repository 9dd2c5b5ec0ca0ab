use std::sync::Arc;

use anyhow::Context;

use jobforge_infra::WorkerConfig;
use jobforge_infra::notifications::{EmailProvider, LogProvider, NotificationDispatcher};
use jobforge_infra::storage::LocalObjectStore;
use jobforge_infra::store::PostgresJobStore;
use jobforge_infra::wake_queue::{InMemoryWakeQueue, WakeQueue};
use jobforge_infra::worker::{Pipeline, PipelineSettings, WorkerPool, WorkerSettings};
use jobforge_processors::ProcessorRegistry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    jobforge_observability::init();

    let config = WorkerConfig::from_env().context("invalid worker configuration")?;
    let database_url = config.database_url()?;

    let store = PostgresJobStore::connect(database_url, config.database_max_connections)
        .await
        .context("failed to connect to postgres")?;
    store
        .ensure_schema()
        .await
        .context("failed to apply jobs schema")?;
    let store = Arc::new(store);

    let wake_queue = wake_queue(&config)?;

    let registry = ProcessorRegistry::standard();
    tracing::info!(job_types = ?registry.job_types(), "processors registered");

    let mut dispatcher =
        NotificationDispatcher::new(config.notify_timeout).with_provider(LogProvider);
    if let Some(mailtrap) = config.mailtrap.clone() {
        let email = EmailProvider::new(mailtrap).context("invalid mailtrap configuration")?;
        tracing::info!(endpoint = email.endpoint(), "email notifications enabled");
        dispatcher.push(Arc::new(email));
    }

    let objects = LocalObjectStore::new(&config.storage_root);
    tracing::info!(root = %objects.root().display(), "object storage ready");

    let pipeline = Arc::new(Pipeline::new(
        store.clone(),
        Arc::new(objects),
        Arc::new(registry),
        dispatcher,
        PipelineSettings {
            input_bucket: config.input_bucket.clone(),
            output_bucket: config.output_bucket.clone(),
            scratch_root: config.scratch_root.clone(),
        },
    ));

    let pool = WorkerPool::spawn(
        config.concurrency,
        store,
        wake_queue,
        pipeline,
        WorkerSettings {
            wake_timeout: config.wake_timeout,
            idle_sleep: config.idle_sleep,
            error_backoff: config.error_backoff,
        },
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!(stats = ?pool.stats(), "shutdown requested");
    pool.shutdown().await;

    Ok(())
}

#[cfg(feature = "redis")]
fn wake_queue(config: &WorkerConfig) -> anyhow::Result<Arc<dyn WakeQueue>> {
    match &config.redis_url {
        Some(url) => {
            let queue = jobforge_infra::wake_queue::RedisWakeQueue::new(url, None)
                .context("invalid REDIS_URL")?;
            tracing::info!("using redis wake queue");
            Ok(Arc::new(queue))
        }
        None => Ok(Arc::new(InMemoryWakeQueue::new())),
    }
}

#[cfg(not(feature = "redis"))]
fn wake_queue(config: &WorkerConfig) -> anyhow::Result<Arc<dyn WakeQueue>> {
    if config.redis_url.is_some() {
        tracing::warn!("REDIS_URL is set but redis support is not compiled in; using in-process wake queue");
    }
    Ok(Arc::new(InMemoryWakeQueue::new()))
}
