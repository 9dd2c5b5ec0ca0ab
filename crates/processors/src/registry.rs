use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value as JsonValue;

use jobforge_core::JobType;

use crate::canonical::JsonCanonicalizeProcessor;
use crate::processor::{Processor, ProcessorError, ProcessorInput};
use crate::tabular::{CsvColumnStatsProcessor, CsvDeduplicateProcessor, CsvRowCountProcessor};
use crate::test_job::TestJobProcessor;

/// Lookup from job type to its processor.
///
/// Built once at startup and shared by every worker; never mutated after.
#[derive(Clone, Default)]
pub struct ProcessorRegistry {
    processors: HashMap<JobType, Arc<dyn Processor>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with a processor for every known job type.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.register(TestJobProcessor);
        registry.register(CsvRowCountProcessor);
        registry.register(CsvColumnStatsProcessor);
        registry.register(CsvDeduplicateProcessor);
        registry.register(JsonCanonicalizeProcessor);
        registry
    }

    /// Register `processor` under its own job type, replacing any previous one.
    pub fn register<P: Processor>(&mut self, processor: P) -> &mut Self {
        self.processors.insert(processor.job_type(), Arc::new(processor));
        self
    }

    pub fn get(&self, job_type: JobType) -> Result<Arc<dyn Processor>, ProcessorError> {
        self.processors
            .get(&job_type)
            .cloned()
            .ok_or(ProcessorError::UnsupportedJobType(job_type))
    }

    pub fn supports(&self, job_type: JobType) -> bool {
        self.processors.contains_key(&job_type)
    }

    pub fn job_types(&self) -> Vec<JobType> {
        let mut types: Vec<JobType> = self.processors.keys().copied().collect();
        types.sort_by_key(|t| t.as_str());
        types
    }

    /// Resolve and run the processor for `input.job_type`.
    pub fn process(&self, input: &ProcessorInput) -> Result<JsonValue, ProcessorError> {
        let processor = self.get(input.job_type)?;
        tracing::debug!(job_id = %input.job_id, job_type = %input.job_type, "running processor");
        processor.process(input)
    }
}

impl std::fmt::Debug for ProcessorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorRegistry")
            .field("job_types", &self.job_types())
            .finish()
    }
}
