use std::fs::File;
use std::io::BufReader;

use serde_json::{Map, Value as JsonValue, json};

use jobforge_core::JobType;

use crate::processor::{Processor, ProcessorError, ProcessorInput};

/// Re-emits a JSON document with object keys sorted at every depth.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCanonicalizeProcessor;

/// Recursively sort object keys. Array element order is significant and kept.
pub fn canonicalize(value: JsonValue) -> JsonValue {
    match value {
        JsonValue::Object(map) => {
            let mut entries: Vec<(String, JsonValue)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let sorted: Map<String, JsonValue> = entries
                .into_iter()
                .map(|(k, v)| (k, canonicalize(v)))
                .collect();
            JsonValue::Object(sorted)
        }
        JsonValue::Array(items) => JsonValue::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

impl Processor for JsonCanonicalizeProcessor {
    fn job_type(&self) -> JobType {
        JobType::JsonCanonicalize
    }

    fn process(&self, input: &ProcessorInput) -> Result<JsonValue, ProcessorError> {
        let file = File::open(&input.input_path)?;
        let document: JsonValue = serde_json::from_reader(BufReader::new(file))?;

        Ok(json!({ "canonical_json": canonicalize(document) }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobforge_core::{JobId, build_input_metadata};
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn run(contents: &str) -> Result<JsonValue, ProcessorError> {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        let path = file.path().to_path_buf();
        let input = ProcessorInput {
            job_id: JobId::new(),
            job_type: JobType::JsonCanonicalize,
            metadata: build_input_metadata(JobType::JsonCanonicalize, &path.to_string_lossy()),
            input_path: path,
        };
        JsonCanonicalizeProcessor.process(&input)
    }

    #[test]
    fn sorts_nested_keys_and_keeps_array_order() {
        let out = run(r#"{"b": {"z": 1, "a": 2}, "a": [3, {"y": 0, "x": 1}, 1]}"#).unwrap();
        let rendered = serde_json::to_string(&out["canonical_json"]).unwrap();
        assert_eq!(rendered, r#"{"a":[3,{"x":1,"y":0},1],"b":{"a":2,"z":1}}"#);
    }

    #[test]
    fn scalars_pass_through() {
        assert_eq!(canonicalize(json!("text")), json!("text"));
        assert_eq!(canonicalize(json!(null)), json!(null));
    }

    #[test]
    fn malformed_document_is_parse_error() {
        let err = run("{not json").unwrap_err();
        assert!(matches!(err, ProcessorError::Parse(_)));
    }
}
