use std::path::PathBuf;

use serde_json::Value as JsonValue;
use thiserror::Error;

use jobforge_core::{JobId, JobType, JsonMap};

/// Everything a processor is allowed to see about a job.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessorInput {
    pub job_id: JobId,
    pub job_type: JobType,
    /// Path of the fetched input inside the job's scratch workspace.
    pub input_path: PathBuf,
    pub metadata: JsonMap,
}

impl ProcessorInput {
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(JsonValue::as_str)
    }

    pub fn metadata_bool(&self, key: &str) -> Option<bool> {
        self.metadata.get(key).and_then(JsonValue::as_bool)
    }
}

/// One job-type specific transformation.
///
/// Implementations run on a blocking thread and may do file I/O on
/// `input.input_path`, nothing else.
pub trait Processor: Send + Sync + 'static {
    /// The job type this processor handles.
    fn job_type(&self) -> JobType;

    /// Run the transformation and return its structured result.
    fn process(&self, input: &ProcessorInput) -> Result<JsonValue, ProcessorError>;
}

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("invalid job input: {0}")]
    Validation(String),

    #[error("failed to read input: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed input: {0}")]
    Parse(String),

    #[error("no processor registered for {0}")]
    UnsupportedJobType(JobType),
}

impl ProcessorError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

impl From<::csv::Error> for ProcessorError {
    fn from(err: ::csv::Error) -> Self {
        if err.is_io_error() {
            match err.into_kind() {
                ::csv::ErrorKind::Io(io) => ProcessorError::Io(io),
                other => ProcessorError::Parse(format!("{other:?}")),
            }
        } else {
            ProcessorError::Parse(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ProcessorError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_io() {
            ProcessorError::Io(std::io::Error::other(err))
        } else {
            ProcessorError::Parse(err.to_string())
        }
    }
}
