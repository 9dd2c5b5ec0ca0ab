//! Infrastructure layer: persistence, wake queue, object storage,
//! notifications, submission and the worker runtime.

pub mod config;
pub mod notifications;
pub mod storage;
pub mod store;
pub mod submit;
pub mod wake_queue;
pub mod worker;


pub use config::{ConfigError, WorkerConfig};
pub use notifications::{NotificationDispatcher, NotificationError, NotificationProvider};
pub use storage::{ObjectStore, StorageError};
pub use store::{JobStore, JobStoreError};
pub use submit::{JobSubmitter, SubmitError, SubmitJobRequest};
pub use wake_queue::{WakeQueue, WakeQueueError};
pub use worker::{Pipeline, PipelineOutcome, WorkerPool};
