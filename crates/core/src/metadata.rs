//! System-owned input metadata.
//!
//! Metadata is built deterministically from the job type at submission time
//! and is trusted by workers. Caller metadata is accepted but can never
//! override a system key.

use serde_json::{Value, json};

use crate::job_type::JobType;

/// JSON object used for metadata, context and notification preferences.
pub type JsonMap = serde_json::Map<String, Value>;

/// Build the system metadata for `job_type` reading from `source_path`.
pub fn build_input_metadata(job_type: JobType, source_path: &str) -> JsonMap {
    let value = match job_type {
        JobType::CsvRowCount | JobType::CsvColumnStats | JobType::CsvDeduplicate => json!({
            "file_format": "CSV",
            "delimiter": ",",
            "has_header": true,
            "source_path": source_path,
        }),
        JobType::JsonCanonicalize => json!({
            "file_format": "JSON",
            "canonical": true,
            "source_path": source_path,
        }),
        JobType::TestJob => json!({
            "file_format": "NONE",
            "test": true,
        }),
    };

    match value {
        Value::Object(map) => map,
        _ => JsonMap::new(),
    }
}

/// Merge `system` over `caller`; system keys win on collision.
pub fn merge_metadata(caller: JsonMap, system: JsonMap) -> JsonMap {
    let mut merged = caller;
    merged.extend(system);
    merged
}
