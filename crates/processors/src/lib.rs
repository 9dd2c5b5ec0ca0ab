//! `jobforge-processors`
//!
//! **Responsibility:** the job-type specific transformations.
//!
//! Processors are pure with respect to the engine:
//! - they receive a local file path and the job's input metadata,
//! - they return a JSON result payload,
//! - they never touch persistence, queues or notification state.

pub mod canonical;
pub mod processor;
pub mod registry;
pub mod tabular;
pub mod test_job;

pub use processor::{Processor, ProcessorError, ProcessorInput};
pub use registry::ProcessorRegistry;
