//! Job execution workers.
//!
//! A worker waits on the wake queue (or its timeout), claims from the store,
//! and hands the claimed job to the [`Pipeline`]. Any number of workers, in
//! one process or many, may share a store.

pub mod pipeline;
pub mod pool;

pub use pipeline::{
    ExecutionError, Pipeline, PipelineError, PipelineOutcome, PipelineSettings, output_key,
};
pub use pool::{PoolStats, Tick, Worker, WorkerError, WorkerPool, WorkerSettings};
