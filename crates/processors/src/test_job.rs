//! Smoke-test processor: proves the pipeline end to end without reading input.

use serde_json::{Value as JsonValue, json};

use jobforge_core::JobType;

use crate::processor::{Processor, ProcessorError, ProcessorInput};

#[derive(Debug, Default, Clone, Copy)]
pub struct TestJobProcessor;

impl Processor for TestJobProcessor {
    fn job_type(&self) -> JobType {
        JobType::TestJob
    }

    fn process(&self, _input: &ProcessorInput) -> Result<JsonValue, ProcessorError> {
        Ok(json!({ "ping": "pong" }))
    }
}
