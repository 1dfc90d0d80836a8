//! Model-ready encodings of examples, stored one JSONL file per section.

use crate::dataset::{Dataset, Example};
use crate::tokenizer::{QuestionTokenizer, TokenizerConfig, TokenizerError};
use crate::transition::TransitionSystem;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Preprocessing section of the experiment config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreprocConfig {
    /// Directory holding `<section>.jsonl` files.
    pub save_path: PathBuf,
    #[serde(default)]
    pub transition_system: TransitionSystem,
    #[serde(default)]
    pub tokenizer: TokenizerConfig,
}

/// The encoded form of one example, paired with it by index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreprocessedExample {
    pub db_id: String,
    pub question: String,
    pub question_tokens: Vec<String>,
    /// Vocabulary ids, only for tokenizers that have a vocabulary.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub token_ids: Vec<u32>,
}

pub fn preprocess_example(
    example: &Example,
    tokenizer: &QuestionTokenizer,
) -> Result<PreprocessedExample, TokenizerError> {
    let question_tokens = tokenizer.tokenize(&example.question)?;
    let token_ids = question_tokens
        .iter()
        .map(|t| tokenizer.token_to_id(t))
        .collect::<Option<Vec<u32>>>()
        .unwrap_or_default();
    Ok(PreprocessedExample {
        db_id: example.db_id.clone(),
        question: example.question.clone(),
        question_tokens,
        token_ids,
    })
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PairingError {
    #[error("preprocessed section has {preprocessed} examples but the dataset has {dataset}")]
    LengthMismatch { preprocessed: usize, dataset: usize },

    #[error("example {index}: preprocessed db_id '{preprocessed}' does not match dataset db_id '{dataset}'")]
    DatabaseMismatch {
        index: usize,
        preprocessed: String,
        dataset: String,
    },
}

/// Preprocessed examples of one section, indexable like the dataset.
#[derive(Debug, Clone, Default)]
pub struct PreprocessedStore {
    items: Vec<PreprocessedExample>,
}

impl PreprocessedStore {
    pub fn section_path(save_path: &Path, section: &str) -> PathBuf {
        save_path.join(format!("{section}.jsonl"))
    }

    pub fn from_items(items: Vec<PreprocessedExample>) -> Self {
        Self { items }
    }

    /// Tokenize every example of `dataset`. Never drops an example, so the
    /// result pairs with the dataset by index.
    pub fn build(dataset: &Dataset, tokenizer: &QuestionTokenizer) -> anyhow::Result<Self> {
        let items = dataset
            .iter()
            .map(|(index, example)| {
                preprocess_example(example, tokenizer)
                    .with_context(|| format!("failed to preprocess example {index}"))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(Self { items })
    }

    pub fn load(save_path: &Path, section: &str) -> anyhow::Result<Self> {
        let path = Self::section_path(save_path, section);
        let file = std::fs::File::open(&path).with_context(|| {
            format!(
                "preprocessed data for section '{section}' not found at {}",
                path.display()
            )
        })?;

        let mut items = Vec::new();
        for (i, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let item: PreprocessedExample = serde_json::from_str(&line)
                .with_context(|| format!("{}:{}: invalid preprocessed example", path.display(), i + 1))?;
            items.push(item);
        }

        tracing::info!(count = items.len(), path = %path.display(), "Loaded preprocessed examples");
        Ok(Self { items })
    }

    pub fn save(&self, save_path: &Path, section: &str) -> anyhow::Result<PathBuf> {
        std::fs::create_dir_all(save_path)
            .with_context(|| format!("failed to create {}", save_path.display()))?;
        let path = Self::section_path(save_path, section);
        let mut out = BufWriter::new(std::fs::File::create(&path)?);
        for item in &self.items {
            serde_json::to_writer(&mut out, item)?;
            out.write_all(b"\n")?;
        }
        out.flush()?;

        tracing::info!(count = self.items.len(), path = %path.display(), "Wrote preprocessed examples");
        Ok(path)
    }

    /// Check the 1:1 pairing with the dataset section.
    pub fn ensure_paired(&self, dataset: &Dataset) -> Result<(), PairingError> {
        if self.items.len() != dataset.len() {
            return Err(PairingError::LengthMismatch {
                preprocessed: self.items.len(),
                dataset: dataset.len(),
            });
        }
        for (index, example) in dataset.iter() {
            let item = &self.items[index];
            if item.db_id != example.db_id {
                return Err(PairingError::DatabaseMismatch {
                    index,
                    preprocessed: item.db_id.clone(),
                    dataset: example.db_id.clone(),
                });
            }
        }
        Ok(())
    }

    pub fn get(&self, index: usize) -> Option<&PreprocessedExample> {
        self.items.get(index)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
