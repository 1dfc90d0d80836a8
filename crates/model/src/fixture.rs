//! Replays recorded beams instead of running a model.
//!
//! The fixture file is JSONL, one `{"question": ..., "beams": [...]}` object
//! per line. Lookups are keyed by the question text of the preprocessed
//! example, so a fixture written for one dataset section works for any
//! subset of it.

use std::collections::HashMap;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;
use spider::PreprocessedExample;

use crate::error::ModelError;
use crate::types::Beam;

#[derive(Deserialize)]
struct FixtureEntry {
    question: String,
    beams: Vec<Beam>,
}

/// In-memory table of recorded beams.
#[derive(Debug, Clone, Default)]
pub struct FixtureParser {
    path: PathBuf,
    beams: HashMap<String, Vec<Beam>>,
}

impl FixtureParser {
    pub fn load(path: &Path) -> Result<Self, ModelError> {
        Self::read(path).map_err(|source| ModelError::Fixture {
            path: path.to_path_buf(),
            source,
        })
    }

    fn read(path: &Path) -> anyhow::Result<Self> {
        let file = std::fs::File::open(path).context("failed to open fixture file")?;
        let mut beams = HashMap::new();
        for (i, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: FixtureEntry =
                serde_json::from_str(&line).with_context(|| format!("line {}", i + 1))?;
            if beams.insert(entry.question.clone(), entry.beams).is_some() {
                tracing::warn!(question = %entry.question, "Duplicate fixture question, keeping the last");
            }
        }
        tracing::info!(count = beams.len(), path = %path.display(), "Loaded beam fixtures");
        Ok(Self {
            path: path.to_path_buf(),
            beams,
        })
    }

    pub fn from_entries(entries: impl IntoIterator<Item = (String, Vec<Beam>)>) -> Self {
        Self {
            path: PathBuf::new(),
            beams: entries.into_iter().collect(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.beams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.beams.is_empty()
    }

    /// Recorded beams for `example`, truncated to `beam_size`.
    pub fn parse(
        &self,
        example: &PreprocessedExample,
        beam_size: usize,
    ) -> Result<Vec<Beam>, ModelError> {
        let beams = self
            .beams
            .get(&example.question)
            .ok_or_else(|| ModelError::MissingFixture(example.question.clone()))?;
        Ok(beams.iter().take(beam_size).cloned().collect())
    }
}
