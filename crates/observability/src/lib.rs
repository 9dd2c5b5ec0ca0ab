//! Shared tracing setup for jobforge binaries.

pub mod tracing;

pub use tracing::{LogFormat, init, init_with};
