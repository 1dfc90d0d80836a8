//! Running accumulation of (gold, prediction) pairs into a sliced report.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use spider::Example;

use crate::scorer::{ScoreError, Scorer, SpiderScorer};

/// Name of the slice that counts every item.
pub const ALL_SLICE: &str = "all";

/// Result for a single evaluated item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemScore {
    /// Dataset index; `None` when the record's index could not be recovered.
    pub index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_id: Option<String>,
    /// Slice the gold example belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hardness: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gold: Option<String>,
    pub predicted: Option<String>,
    pub exact: bool,
    /// Why the item could not be scored normally.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ItemScore {
    /// Total order over every field, so repeated or missing indices still
    /// sort the same regardless of insertion order.
    fn sort_key(&self) -> impl Ord + '_ {
        (
            self.index.is_none(),
            self.index,
            &self.predicted,
            self.exact,
            &self.error,
            &self.gold,
            &self.db_id,
            &self.hardness,
        )
    }
}

/// Totals for one slice.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SliceScore {
    pub count: usize,
    pub exact_count: usize,
    /// `exact_count / count`, 0.0 for an empty slice.
    pub exact: f64,
}

/// Finalized top-1 evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    /// Sorted by index; unresolvable items last.
    pub per_item: Vec<ItemScore>,
    pub total_scores: BTreeMap<String, SliceScore>,
}

impl EvaluationReport {
    /// Exact-match rate over all items.
    pub fn exact(&self) -> f64 {
        self.total_scores
            .get(ALL_SLICE)
            .map(|s| s.exact)
            .unwrap_or_default()
    }
}

/// Accumulates item scores. Consumed by [`Metrics::finalize`], so a report is
/// produced exactly once.
pub struct Metrics<S: Scorer = SpiderScorer> {
    scorer: S,
    items: Vec<ItemScore>,
    totals: BTreeMap<String, SliceScore>,
}

impl Default for Metrics<SpiderScorer> {
    fn default() -> Self {
        Self::new(SpiderScorer)
    }
}

impl<S: Scorer> Metrics<S> {
    pub fn new(scorer: S) -> Self {
        let totals = scorer
            .slices()
            .into_iter()
            .chain([ALL_SLICE])
            .map(|name| (name.to_string(), SliceScore::default()))
            .collect();
        Self {
            scorer,
            items: Vec::new(),
            totals,
        }
    }

    pub fn scorer(&self) -> &S {
        &self.scorer
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Score `predicted` against `gold`. A missing prediction is a miss.
    ///
    /// On error nothing is recorded, so the caller can retry or record a miss.
    pub fn add(
        &mut self,
        index: usize,
        gold: &Example,
        predicted: Option<&str>,
    ) -> Result<(), ScoreError> {
        let exact = match predicted {
            Some(p) => self.scorer.exact(gold, p)?,
            None => false,
        };
        self.record(Some(index), Some(gold), predicted, exact, None);
        Ok(())
    }

    /// Record an item that could not be scored. It counts as incorrect in
    /// its gold example's slice, or only in `"all"` when there is no gold.
    pub fn add_miss(&mut self, index: Option<usize>, gold: Option<&Example>, reason: impl Into<String>) {
        self.record(index, gold, None, false, Some(reason.into()));
    }

    /// Score every beam independently. Beams without surface code, or that
    /// fail to score, are incorrect.
    pub fn evaluate_all(&self, gold: &Example, beams: &[Option<String>]) -> Vec<bool> {
        beams
            .iter()
            .map(|code| match code {
                Some(code) => self.scorer.exact(gold, code).unwrap_or_else(|e| {
                    tracing::debug!(error = %e, "Beam could not be scored");
                    false
                }),
                None => false,
            })
            .collect()
    }

    fn record(
        &mut self,
        index: Option<usize>,
        gold: Option<&Example>,
        predicted: Option<&str>,
        exact: bool,
        error: Option<String>,
    ) {
        let slice = gold.and_then(|g| self.scorer.slice(g));
        for name in slice.into_iter().chain([ALL_SLICE]) {
            let totals = self.totals.entry(name.to_string()).or_default();
            totals.count += 1;
            if exact {
                totals.exact_count += 1;
            }
        }
        self.items.push(ItemScore {
            index,
            db_id: gold.map(|g| g.db_id.clone()),
            hardness: slice.map(str::to_string),
            gold: gold.map(|g| g.query.clone()),
            predicted: predicted.map(str::to_string),
            exact,
            error,
        });
    }

    pub fn finalize(self) -> EvaluationReport {
        let mut per_item = self.items;
        per_item.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));

        let total_scores = self
            .totals
            .into_iter()
            .map(|(name, mut score)| {
                score.exact = if score.count == 0 {
                    0.0
                } else {
                    score.exact_count as f64 / score.count as f64
                };
                (name, score)
            })
            .collect();

        EvaluationReport {
            per_item,
            total_scores,
        }
    }
}
