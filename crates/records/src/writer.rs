//! Streams inference records to a JSONL file, one flushed line at a time.

use crate::types::InferenceRecord;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};

/// Errors raised while appending a record line.
#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error("record line is not a valid inference record: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("record line for index {0} spans multiple lines")]
    Multiline(usize),

    #[error("failed to write record: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize record: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Fields the writer inspects to keep its index ledger.
#[derive(Deserialize)]
struct LineProbe {
    index: usize,
    #[serde(default)]
    beams: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    error: Option<String>,
}

/// Outcome of a finished write run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteSummary {
    /// Lines appended.
    pub written: usize,
    /// Failure records among them.
    pub failed: usize,
    /// Decoded records with zero beams.
    pub empty: usize,
    /// Indices written more than once.
    pub duplicates: Vec<usize>,
    /// Expected indices that were never written.
    pub missing: Vec<usize>,
    /// How an unterminated last line of an appended-to file was handled.
    pub repaired_tail: Option<TailRepair>,
}

/// Repair applied to an existing file's last line before appending to it.
#[derive(Debug, Clone, PartialEq)]
pub enum TailRepair {
    /// A complete record lacked its newline; one was added.
    Terminated { index: usize },
    /// An incomplete record was cut off. Its index must be decoded again.
    Truncated { bytes: usize },
}

impl WriteSummary {
    /// Every expected index written exactly once.
    pub fn is_complete(&self) -> bool {
        self.duplicates.is_empty() && self.missing.is_empty()
    }
}

/// Exclusive owner of an inference output stream.
///
/// Each line is appended and flushed before the next one is accepted, so a
/// run killed at any point leaves a file made of complete records.
pub struct RecordWriter<W: Write = BufWriter<File>> {
    out: W,
    path: Option<PathBuf>,
    seen: BTreeMap<usize, usize>,
    written: usize,
    failed: usize,
    empty: usize,
    repaired_tail: Option<TailRepair>,
}

impl RecordWriter<BufWriter<File>> {
    /// Create (or truncate) the output file.
    pub fn create(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = File::create(path)?;
        let mut writer = Self::new(BufWriter::new(file));
        writer.path = Some(path.to_path_buf());
        tracing::debug!(path = %path.display(), "Opened inference output");
        Ok(writer)
    }

    /// Open an existing output file for appending, creating it if needed.
    ///
    /// A last line left without its newline by a killed run is repaired
    /// first, so new records always start on a line of their own.
    pub fn append(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;
        let repaired_tail = repair_tail(&mut file)?;
        match &repaired_tail {
            Some(TailRepair::Terminated { index }) => tracing::warn!(
                index,
                path = %path.display(),
                "Terminated last record of interrupted output"
            ),
            Some(TailRepair::Truncated { bytes }) => tracing::warn!(
                bytes,
                path = %path.display(),
                "Dropped incomplete last line of interrupted output"
            ),
            None => {}
        }

        let mut writer = Self::new(BufWriter::new(file));
        writer.path = Some(path.to_path_buf());
        writer.repaired_tail = repaired_tail;
        tracing::debug!(path = %path.display(), "Appending to inference output");
        Ok(writer)
    }
}

/// Make the file end in `\n` (or be empty) before anything is appended.
fn repair_tail(file: &mut File) -> std::io::Result<Option<TailRepair>> {
    const CHUNK: u64 = 8192;

    // Bytes after the last newline, and where they start.
    let mut tail = Vec::new();
    let mut pos = file.metadata()?.len();
    let cut = loop {
        if pos == 0 {
            break 0;
        }
        let step = pos.min(CHUNK);
        pos -= step;
        let mut chunk = vec![0; step as usize];
        file.seek(SeekFrom::Start(pos))?;
        file.read_exact(&mut chunk)?;
        let newline = chunk.iter().rposition(|&b| b == b'\n');
        if let Some(i) = newline {
            chunk.drain(..=i);
        }
        chunk.append(&mut tail);
        tail = chunk;
        if let Some(i) = newline {
            break pos + i as u64 + 1;
        }
    };

    if tail.is_empty() {
        return Ok(None);
    }
    if let Ok(probe) = serde_json::from_slice::<LineProbe>(&tail) {
        file.write_all(b"\n")?;
        file.flush()?;
        return Ok(Some(TailRepair::Terminated { index: probe.index }));
    }
    file.set_len(cut)?;
    Ok(Some(TailRepair::Truncated { bytes: tail.len() }))
}

impl<W: Write> RecordWriter<W> {
    /// Wrap an arbitrary sink.
    pub fn new(out: W) -> Self {
        Self {
            out,
            path: None,
            seen: BTreeMap::new(),
            written: 0,
            failed: 0,
            empty: 0,
            repaired_tail: None,
        }
    }

    /// Path of the underlying file, when writing to one.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Number of lines written so far.
    pub fn written(&self) -> usize {
        self.written
    }

    /// Append one serialized record and flush. Returns the record's index.
    pub fn write_line(&mut self, line: &str) -> Result<usize, WriteError> {
        let line = line.trim_end_matches(['\n', '\r']);
        let probe: LineProbe = serde_json::from_str(line).map_err(WriteError::Malformed)?;
        if line.contains('\n') {
            return Err(WriteError::Multiline(probe.index));
        }

        // One write per record: a record never reaches the file without its newline.
        let mut buf = Vec::with_capacity(line.len() + 1);
        buf.extend_from_slice(line.as_bytes());
        buf.push(b'\n');
        self.out.write_all(&buf)?;
        self.out.flush()?;

        self.written += 1;
        *self.seen.entry(probe.index).or_insert(0) += 1;
        if probe.error.is_some() {
            self.failed += 1;
        } else if probe.beams.as_ref().is_some_and(|b| b.is_empty()) {
            self.empty += 1;
        }
        Ok(probe.index)
    }

    /// Serialize and append a structured record.
    pub fn write_record(&mut self, record: &InferenceRecord) -> Result<usize, WriteError> {
        let line = serde_json::to_string(record)?;
        self.write_line(&line)
    }

    /// Flush and compare the ledger against the expected index range.
    pub fn finish(mut self, expected: Range<usize>) -> Result<WriteSummary, WriteError> {
        self.out.flush()?;

        let duplicates = self
            .seen
            .iter()
            .filter(|(_, n)| **n > 1)
            .map(|(&i, _)| i)
            .collect();
        let missing = expected.filter(|i| !self.seen.contains_key(i)).collect();

        let summary = WriteSummary {
            written: self.written,
            failed: self.failed,
            empty: self.empty,
            duplicates,
            missing,
            repaired_tail: self.repaired_tail.take(),
        };

        match &self.path {
            Some(path) => tracing::info!(
                records = summary.written,
                failed = summary.failed,
                path = %path.display(),
                "Wrote inference records"
            ),
            None => tracing::debug!(records = summary.written, "Wrote inference records"),
        }
        Ok(summary)
    }
}
