//! Correctness predicates for evaluation.

use spider::{exact_match, hardness, Example, Hardness, SqlLexError};

#[derive(Debug, thiserror::Error)]
pub enum ScoreError {
    #[error("failed to tokenize SQL: {0}")]
    Lex(#[from] SqlLexError),
}

/// Decides whether a prediction matches its gold example and which report
/// slice the example belongs to.
pub trait Scorer: Send + Sync {
    /// Slice names, in report order. `"all"` is implicit.
    fn slices(&self) -> Vec<&'static str>;

    /// Slice of `gold`, or `None` when it cannot be classified (it then only
    /// counts towards `"all"`).
    fn slice(&self, gold: &Example) -> Option<&'static str>;

    fn exact(&self, gold: &Example, predicted: &str) -> Result<bool, ScoreError>;
}

/// Spider scorer: normalized token exact match, sliced by query hardness.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpiderScorer;

impl Scorer for SpiderScorer {
    fn slices(&self) -> Vec<&'static str> {
        Hardness::ALL.iter().map(|h| h.as_str()).collect()
    }

    fn slice(&self, gold: &Example) -> Option<&'static str> {
        match hardness(&gold.query) {
            Ok(level) => Some(level.as_str()),
            Err(e) => {
                tracing::warn!(db_id = %gold.db_id, error = %e, "Could not classify gold query");
                None
            }
        }
    }

    fn exact(&self, gold: &Example, predicted: &str) -> Result<bool, ScoreError> {
        Ok(exact_match(&gold.query, predicted)?)
    }
}
