//! Line protocol between the pool and its decode worker processes.
//!
//! A worker prints [`READY_LINE`] once its model is open. After that, every
//! task line written to its stdin is answered by exactly one record line on
//! its stdout. Diagnostics go to stderr.

use decode::{record_line, DecodeTask};
use records::InferenceRecord;

use crate::types::DispatchError;

/// First line a worker prints after loading its model.
pub const READY_LINE: &str = "ready.";

/// Serialize a task as one JSON line, without the trailing newline.
pub fn encode_task(task: &DecodeTask) -> Result<String, serde_json::Error> {
    serde_json::to_string(task)
}

pub fn decode_task(line: &str) -> Result<DecodeTask, serde_json::Error> {
    serde_json::from_str(line.trim())
}

/// Best-effort `index` of a line that failed to parse as a task.
pub fn salvage_index(line: &str) -> Option<usize> {
    let value: serde_json::Value = serde_json::from_str(line.trim()).ok()?;
    value.get("index")?.as_u64().map(|i| i as usize)
}

/// Check that a worker's response is a record for `expected_index`.
///
/// Returns the newline-terminated line to persist.
pub fn check_record_line(line: &str, expected_index: usize) -> Result<String, DispatchError> {
    let record: InferenceRecord = serde_json::from_str(line.trim()).map_err(|e| {
        DispatchError::Protocol(format!("invalid record line: {e}"))
    })?;
    if record.index() != expected_index {
        return Err(DispatchError::Protocol(format!(
            "record for example {} returned for example {expected_index}",
            record.index()
        )));
    }
    let mut out = line.trim_end().to_string();
    out.push('\n');
    Ok(out)
}

/// Failure record line for a task the pool could not get decoded.
pub fn failure_line(index: usize, context: &str, error: &DispatchError) -> String {
    record_line(&InferenceRecord::failed(
        index,
        format!("{context}: {error}"),
        format!("{error:?}"),
    ))
}
