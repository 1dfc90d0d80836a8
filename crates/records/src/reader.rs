//! Reads inference records back from JSONL files.

use crate::types::{InferenceRecord, RecordSummary};
use anyhow::Context;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// A line of an inference file that could not be used.
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    /// The line is not a valid record. `index` is salvaged when the line is a
    /// JSON object with an integer `index` field.
    #[error("malformed record on line {line_no} (index {index:?}): {source}")]
    Malformed {
        line_no: usize,
        index: Option<usize>,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to read inference file: {0}")]
    Io(#[from] std::io::Error),
}

impl RecordError {
    /// Index of the example this line was meant for, when recoverable.
    pub fn index(&self) -> Option<usize> {
        match self {
            Self::Malformed { index, .. } => *index,
            Self::Io(_) => None,
        }
    }
}

/// A parsed record paired with its top-1 prediction.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedRecord {
    /// `inferred_code` of the first beam; `None` for failures, empty beam
    /// lists and grammars without surface text.
    pub inferred_code: Option<String>,
    pub record: InferenceRecord,
}

/// Parse one record line. `line_no` is only used for error messages.
pub fn parse_line(line: &str, line_no: usize) -> Result<LoadedRecord, RecordError> {
    match serde_json::from_str::<InferenceRecord>(line) {
        Ok(record) => Ok(LoadedRecord {
            inferred_code: record.top1_code().map(str::to_string),
            record,
        }),
        Err(source) => Err(RecordError::Malformed {
            line_no,
            index: salvage_index(line),
            source,
        }),
    }
}

fn salvage_index(line: &str) -> Option<usize> {
    let value: serde_json::Value = serde_json::from_str(line).ok()?;
    value.get("index")?.as_u64().map(|i| i as usize)
}

/// Lazily parse every non-blank line of `reader`, in file order.
pub fn load_from_lines<R: BufRead>(
    reader: R,
) -> impl Iterator<Item = Result<LoadedRecord, RecordError>> {
    reader
        .lines()
        .enumerate()
        .filter_map(|(i, line)| match line {
            Ok(line) if line.trim().is_empty() => None,
            Ok(line) => Some(parse_line(&line, i + 1)),
            Err(e) => Some(Err(RecordError::Io(e))),
        })
}

/// Static helpers for reading whole inference files.
pub struct RecordReader;

impl RecordReader {
    /// Read every line of an inference file. Malformed lines are kept as errors.
    pub fn read_all(path: &Path) -> anyhow::Result<Vec<Result<LoadedRecord, RecordError>>> {
        let file = File::open(path)
            .with_context(|| format!("failed to open inference file {}", path.display()))?;
        let loaded: Vec<_> = load_from_lines(BufReader::new(file)).collect();

        tracing::debug!(
            count = loaded.len(),
            path = %path.display(),
            "Read inference records"
        );
        Ok(loaded)
    }

    /// Compute summary statistics from an inference file.
    pub fn read_summary(path: &Path) -> anyhow::Result<RecordSummary> {
        let loaded = Self::read_all(path)?;
        let mut summary = RecordSummary::default();
        let mut seen: BTreeMap<usize, usize> = BTreeMap::new();

        for item in &loaded {
            summary.total_records += 1;
            match item {
                Ok(loaded) => {
                    *seen.entry(loaded.record.index()).or_insert(0) += 1;
                    if loaded.record.is_failed() {
                        summary.failed += 1;
                    } else {
                        summary.decoded += 1;
                        if loaded.record.beams().is_empty() {
                            summary.empty_beams += 1;
                        }
                    }
                }
                Err(e) => {
                    summary.malformed += 1;
                    if let Some(index) = e.index() {
                        *seen.entry(index).or_insert(0) += 1;
                    }
                }
            }
        }

        summary.unique_indices = seen.len();
        summary.duplicate_indices = seen
            .iter()
            .filter(|(_, count)| **count > 1)
            .map(|(&index, _)| index)
            .collect();
        if let Some(&max_index) = seen.keys().next_back() {
            summary.missing_indices = (0..=max_index).filter(|i| !seen.contains_key(i)).collect();
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const DECODED: &str = r#"{"index":0,"beams":[{"question":"q","model_output":"m","inferred_code":"SELECT a FROM t","inferred_code_readable":"SELECT a\nFROM t","score":-0.1},{"question":"q","model_output":"m","inferred_code":"SELECT b FROM t","inferred_code_readable":"","score":-0.7}]}"#;

    #[test]
    fn test_parse_top1() {
        let loaded = parse_line(DECODED, 1).unwrap();
        assert_eq!(loaded.inferred_code.as_deref(), Some("SELECT a FROM t"));
        assert_eq!(loaded.record.beams().len(), 2);
    }

    #[test]
    fn test_parse_empty_beams_and_failure() {
        let loaded = parse_line(r#"{"index":3,"beams":[]}"#, 1).unwrap();
        assert!(loaded.inferred_code.is_none());
        assert_eq!(loaded.record.index(), 3);

        let loaded = parse_line(r#"{"index":4,"error":"boom","trace":"t"}"#, 2).unwrap();
        assert!(loaded.inferred_code.is_none());
        assert!(loaded.record.is_failed());
    }

    #[test]
    fn test_malformed_salvages_index() {
        let err = parse_line(r#"{"index":9,"beams":"nope"}"#, 4).unwrap_err();
        assert_eq!(err.index(), Some(9));
        assert!(err.to_string().contains("line 4"));

        let err = parse_line("{truncated", 5).unwrap_err();
        assert_eq!(err.index(), None);
    }

    #[test]
    fn test_load_skips_blank_lines() {
        let input = format!("{DECODED}\n\n{{\"index\":1,\"beams\":[]}}\ngarbage\n");
        let loaded: Vec<_> = load_from_lines(Cursor::new(input)).collect();
        assert_eq!(loaded.len(), 3);
        assert!(loaded[0].is_ok());
        assert!(loaded[1].is_ok());
        assert!(matches!(
            loaded[2],
            Err(RecordError::Malformed { line_no: 4, .. })
        ));
    }
}
