//! CSV processors: row count, numeric column statistics, deduplication.
//!
//! All three honour the system metadata written at submission time:
//! `delimiter` (single byte, default `,`) and `has_header` (default `true`).

use std::collections::{BTreeMap, HashSet};
use std::fs::File;

use serde_json::{Value as JsonValue, json};

use jobforge_core::JobType;

use crate::processor::{Processor, ProcessorError, ProcessorInput};

struct CsvOptions {
    delimiter: u8,
    has_header: bool,
}

impl CsvOptions {
    fn from_input(input: &ProcessorInput) -> Result<Self, ProcessorError> {
        if let Some(format) = input.metadata_str("file_format") {
            if format != "CSV" {
                return Err(ProcessorError::validation(format!(
                    "expected CSV input, metadata says {format}"
                )));
            }
        }

        let delimiter = match input.metadata_str("delimiter") {
            None => b',',
            Some(d) if d.len() == 1 => d.as_bytes()[0],
            Some(d) => {
                return Err(ProcessorError::validation(format!(
                    "delimiter must be a single byte, got {d:?}"
                )));
            }
        };

        Ok(Self {
            delimiter,
            has_header: input.metadata_bool("has_header").unwrap_or(true),
        })
    }

    fn reader(&self, input: &ProcessorInput) -> Result<csv::Reader<File>, ProcessorError> {
        let file = File::open(&input.input_path)?;
        Ok(csv::ReaderBuilder::new()
            .delimiter(self.delimiter)
            .has_headers(self.has_header)
            .flexible(true)
            .from_reader(file))
    }
}

/// Counts every record the reader yields, header line included.
#[derive(Debug, Default, Clone, Copy)]
pub struct CsvRowCountProcessor;

impl Processor for CsvRowCountProcessor {
    fn job_type(&self) -> JobType {
        JobType::CsvRowCount
    }

    fn process(&self, input: &ProcessorInput) -> Result<JsonValue, ProcessorError> {
        let options = CsvOptions {
            has_header: false,
            ..CsvOptions::from_input(input)?
        };
        let mut reader = options.reader(input)?;

        let mut rows = 0u64;
        for record in reader.records() {
            record?;
            rows += 1;
        }

        Ok(json!({ "rows": rows }))
    }
}

/// Per-column `min`/`max`/`avg` over the values that parse as numbers.
///
/// Columns without a single numeric value are omitted. Without a header,
/// columns are named by their zero-based index.
#[derive(Debug, Default, Clone, Copy)]
pub struct CsvColumnStatsProcessor;

#[derive(Debug, Clone, Copy)]
struct ColumnStats {
    min: f64,
    max: f64,
    sum: f64,
    count: u64,
}

impl ColumnStats {
    fn new(value: f64) -> Self {
        Self {
            min: value,
            max: value,
            sum: value,
            count: 1,
        }
    }

    fn push(&mut self, value: f64) {
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.sum += value;
        self.count += 1;
    }
}

impl Processor for CsvColumnStatsProcessor {
    fn job_type(&self) -> JobType {
        JobType::CsvColumnStats
    }

    fn process(&self, input: &ProcessorInput) -> Result<JsonValue, ProcessorError> {
        let options = CsvOptions::from_input(input)?;
        let mut reader = options.reader(input)?;

        let names: Vec<String> = if options.has_header {
            reader.headers()?.iter().map(str::to_string).collect()
        } else {
            Vec::new()
        };

        let mut stats: BTreeMap<String, ColumnStats> = BTreeMap::new();
        for record in reader.records() {
            let record = record?;
            for (idx, field) in record.iter().enumerate() {
                let Ok(value) = field.trim().parse::<f64>() else {
                    continue;
                };
                if !value.is_finite() {
                    continue;
                }
                let name = names.get(idx).cloned().unwrap_or_else(|| idx.to_string());
                stats
                    .entry(name)
                    .and_modify(|s| s.push(value))
                    .or_insert_with(|| ColumnStats::new(value));
            }
        }

        let result: serde_json::Map<String, JsonValue> = stats
            .into_iter()
            .map(|(name, s)| {
                (
                    name,
                    json!({
                        "min": s.min,
                        "max": s.max,
                        "avg": s.sum / s.count as f64,
                    }),
                )
            })
            .collect();

        Ok(JsonValue::Object(result))
    }
}

/// Keeps the first row for each distinct value of the `key` column.
///
/// Requires a header and a `key` metadata entry naming one of its columns.
#[derive(Debug, Default, Clone, Copy)]
pub struct CsvDeduplicateProcessor;

impl Processor for CsvDeduplicateProcessor {
    fn job_type(&self) -> JobType {
        JobType::CsvDeduplicate
    }

    fn process(&self, input: &ProcessorInput) -> Result<JsonValue, ProcessorError> {
        let options = CsvOptions::from_input(input)?;
        if !options.has_header {
            return Err(ProcessorError::validation(
                "deduplication needs a header row to resolve the key column",
            ));
        }

        let key = input
            .metadata_str("key")
            .ok_or_else(|| ProcessorError::validation("metadata field `key` is required"))?;

        let mut reader = options.reader(input)?;
        let key_idx = reader
            .headers()?
            .iter()
            .position(|h| h == key)
            .ok_or_else(|| ProcessorError::validation(format!("key column `{key}` not in header")))?;

        let mut seen: HashSet<String> = HashSet::new();
        let mut total = 0u64;
        for record in reader.records() {
            let record = record?;
            total += 1;
            let value = record.get(key_idx).unwrap_or_default();
            seen.insert(value.to_string());
        }

        let kept = seen.len() as u64;
        Ok(json!({
            "key": key,
            "deduplicated_rows": kept,
            "duplicates_removed": total - kept,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobforge_core::{JobId, build_input_metadata};
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn csv_file(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    fn input_for(job_type: JobType, file: &NamedTempFile) -> ProcessorInput {
        let path = file.path().to_path_buf();
        ProcessorInput {
            job_id: JobId::new(),
            job_type,
            metadata: build_input_metadata(job_type, &path.to_string_lossy()),
            input_path: path,
        }
    }

    #[test]
    fn row_count_includes_header_line() {
        let file = csv_file("id,name\n1,a\n2,b\n3,c\n");
        let out = CsvRowCountProcessor
            .process(&input_for(JobType::CsvRowCount, &file))
            .unwrap();
        assert_eq!(out, json!({ "rows": 4 }));
    }

    #[test]
    fn row_count_honours_delimiter() {
        let file = csv_file("1;a\n2;b\n");
        let mut input = input_for(JobType::CsvRowCount, &file);
        input.metadata.insert("has_header".into(), json!(false));
        input.metadata.insert("delimiter".into(), json!(";"));

        let out = CsvRowCountProcessor.process(&input).unwrap();
        assert_eq!(out, json!({ "rows": 2 }));
    }

    #[test]
    fn rejects_multi_byte_delimiter() {
        let file = csv_file("a,b\n");
        let mut input = input_for(JobType::CsvRowCount, &file);
        input.metadata.insert("delimiter".into(), json!("::"));

        let err = CsvRowCountProcessor.process(&input).unwrap_err();
        assert!(matches!(err, ProcessorError::Validation(_)));
    }

    #[test]
    fn missing_file_is_io_error() {
        let file = csv_file("");
        let mut input = input_for(JobType::CsvRowCount, &file);
        input.input_path = input.input_path.with_extension("missing");

        let err = CsvRowCountProcessor.process(&input).unwrap_err();
        assert!(matches!(err, ProcessorError::Io(_)));
    }

    #[test]
    fn column_stats_ignore_non_numeric_values() {
        let file = csv_file("name,price,qty\na,1.5,2\nb,x,4\nc,3.5,\n");
        let out = CsvColumnStatsProcessor
            .process(&input_for(JobType::CsvColumnStats, &file))
            .unwrap();

        assert_eq!(
            out,
            json!({
                "price": { "min": 1.5, "max": 3.5, "avg": 2.5 },
                "qty": { "min": 2.0, "max": 4.0, "avg": 3.0 },
            })
        );
    }

    #[test]
    fn deduplicate_on_key_column() {
        let file = csv_file("id,name\n1,a\n2,b\n1,c\n");
        let mut input = input_for(JobType::CsvDeduplicate, &file);
        input.metadata.insert("key".into(), json!("id"));

        let out = CsvDeduplicateProcessor.process(&input).unwrap();

        assert_eq!(out["deduplicated_rows"], 2);
        assert_eq!(out["duplicates_removed"], 1);
    }

    #[test]
    fn deduplicate_requires_key() {
        let file = csv_file("id,name\n1,a\n");
        let err = CsvDeduplicateProcessor
            .process(&input_for(JobType::CsvDeduplicate, &file))
            .unwrap_err();
        assert!(err.to_string().contains("`key` is required"));
    }

    #[test]
    fn deduplicate_rejects_unknown_key() {
        let file = csv_file("id,name\n1,a\n");
        let mut input = input_for(JobType::CsvDeduplicate, &file);
        input.metadata.insert("key".into(), json!("email"));

        let err = CsvDeduplicateProcessor.process(&input).unwrap_err();
        assert!(matches!(err, ProcessorError::Validation(_)));
    }
}
