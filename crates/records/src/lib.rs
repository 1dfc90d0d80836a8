//! JSONL I/O for inference records.
//!
//! One record per evaluated example: either the decoded beams or the error
//! that prevented decoding. The writer appends and flushes line by line; the
//! reader turns lines back into top-1 predictions for evaluation.

pub mod reader;
pub mod types;
pub mod writer;

pub use reader::{load_from_lines, parse_line, LoadedRecord, RecordError, RecordReader};
pub use types::{DecodedBeam, InferenceRecord, RecordSummary};
pub use writer::{RecordWriter, TailRepair, WriteError, WriteSummary};
