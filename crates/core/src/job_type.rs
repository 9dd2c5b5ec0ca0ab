//! Closed set of job types known at startup.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::JobError;

/// Job type tag selecting the processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobType {
    TestJob,
    CsvRowCount,
    CsvColumnStats,
    CsvDeduplicate,
    JsonCanonicalize,
}

impl JobType {
    pub const ALL: [JobType; 5] = [
        JobType::TestJob,
        JobType::CsvRowCount,
        JobType::CsvColumnStats,
        JobType::CsvDeduplicate,
        JobType::JsonCanonicalize,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::TestJob => "TEST_JOB",
            JobType::CsvRowCount => "CSV_ROW_COUNT",
            JobType::CsvColumnStats => "CSV_COLUMN_STATS",
            JobType::CsvDeduplicate => "CSV_DEDUPLICATE",
            JobType::JsonCanonicalize => "JSON_CANONICALIZE",
        }
    }
}

impl core::fmt::Display for JobType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = JobError;

    /// Unknown tags fail with [`JobError::UnsupportedJobType`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| JobError::unsupported(s))
    }
}
