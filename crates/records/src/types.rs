//! Data types for inference records and file summaries.

use serde::{Deserialize, Deserializer, Serialize};

/// One decoded candidate inside an inference record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodedBeam {
    /// Natural-language question the candidate answers.
    pub question: String,
    /// Raw model output (the internal tree, rendered by the model).
    pub model_output: String,
    /// Unparsed SQL. `None` when the transition system has no surface grammar.
    pub inferred_code: Option<String>,
    /// Clause-per-line rendering of `inferred_code` (empty when unavailable).
    #[serde(default)]
    pub inferred_code_readable: String,
    /// Log-probability assigned by the model.
    pub score: f64,
    /// Per-step choices, only present when history output was requested.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present"
    )]
    pub choice_history: Option<serde_json::Value>,
    /// Per-step scores, only present when history output was requested.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present"
    )]
    pub score_history: Option<serde_json::Value>,
}

/// A key that is present maps to `Some`, even when its value is `null`.
fn present<'de, D>(deserializer: D) -> Result<Option<serde_json::Value>, D::Error>
where
    D: Deserializer<'de>,
{
    serde_json::Value::deserialize(deserializer).map(Some)
}

/// One line of an inference output file.
///
/// Exactly one record exists per example index in a completed run. A record
/// either carries the decoded beams (possibly none) or the failure that
/// prevented decoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InferenceRecord {
    Decoded {
        index: usize,
        beams: Vec<DecodedBeam>,
    },
    Failed {
        index: usize,
        error: String,
        trace: String,
    },
}

impl InferenceRecord {
    /// Build a failure record.
    pub fn failed(index: usize, error: impl Into<String>, trace: impl Into<String>) -> Self {
        Self::Failed {
            index,
            error: error.into(),
            trace: trace.into(),
        }
    }

    /// Dataset index this record belongs to.
    pub fn index(&self) -> usize {
        match self {
            Self::Decoded { index, .. } | Self::Failed { index, .. } => *index,
        }
    }

    /// Decoded beams, empty for failure records.
    pub fn beams(&self) -> &[DecodedBeam] {
        match self {
            Self::Decoded { beams, .. } => beams,
            Self::Failed { .. } => &[],
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    /// Top-1 surface prediction, if any beam produced one.
    pub fn top1_code(&self) -> Option<&str> {
        self.beams().first().and_then(|b| b.inferred_code.as_deref())
    }

    /// Serialize as a single newline-terminated JSONL line.
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

/// Quick statistics from an inference file.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RecordSummary {
    /// Number of non-blank lines.
    pub total_records: usize,
    /// Records carrying beams (including empty beam lists).
    pub decoded: usize,
    /// Records carrying an error.
    pub failed: usize,
    /// Decoded records with zero beams.
    pub empty_beams: usize,
    /// Lines that could not be parsed.
    pub malformed: usize,
    /// Number of distinct indices seen.
    pub unique_indices: usize,
    /// Indices that appear more than once.
    pub duplicate_indices: Vec<usize>,
    /// Indices in `[0, max_index]` that never appear.
    pub missing_indices: Vec<usize>,
}
