//! Evaluation of loaded inference records against a dataset section.

use std::collections::BTreeMap;
use std::path::Path;

use records::{LoadedRecord, RecordError, RecordReader};
use serde::{Deserialize, Serialize};
use spider::{Dataset, DatasetConfig, Example, TransitionSystem};

use crate::metrics::{EvaluationReport, Metrics, ALL_SLICE};
use crate::scorer::Scorer;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EvaluationError {
    #[error("evaluation is not supported for the '{0}' transition system: it has no surface grammar")]
    UnsupportedTransitionSystem(String),
}

/// Fail fast when outputs of `system` cannot be scored.
pub fn ensure_scorable(system: TransitionSystem) -> Result<(), EvaluationError> {
    if system.has_surface_grammar() {
        Ok(())
    } else {
        Err(EvaluationError::UnsupportedTransitionSystem(
            system.name().to_string(),
        ))
    }
}

/// Top-1 evaluation of every loaded record.
///
/// Nothing is skipped: failure records and malformed lines count as misses,
/// in their gold example's slice when the index resolves and in `"all"`
/// otherwise.
pub fn evaluate_default<S: Scorer>(
    dataset: &Dataset,
    loaded: &[Result<LoadedRecord, RecordError>],
    scorer: S,
) -> EvaluationReport {
    let mut metrics = Metrics::new(scorer);

    for entry in loaded {
        let (index, record) = match entry {
            Ok(loaded) => (loaded.record.index(), loaded),
            Err(e) => {
                let index = e.index();
                let gold = index.and_then(|i| dataset.get(i));
                tracing::warn!(index = ?index, error = %e, "Counting malformed record as a miss");
                metrics.add_miss(index, gold, e.to_string());
                continue;
            }
        };

        let Some(gold) = dataset.get(index) else {
            tracing::warn!(index, size = dataset.len(), "Record index outside the dataset section");
            metrics.add_miss(Some(index), None, format!("index {index} is not in the dataset section"));
            continue;
        };

        if let records::InferenceRecord::Failed { error, .. } = &record.record {
            metrics.add_miss(Some(index), Some(gold), error.clone());
            continue;
        }

        add_with_fallback(&mut metrics, index, gold, record.inferred_code.as_deref());
    }

    metrics.finalize()
}

fn add_with_fallback<S: Scorer>(
    metrics: &mut Metrics<S>,
    index: usize,
    gold: &Example,
    predicted: Option<&str>,
) {
    let Err(e) = metrics.add(index, gold, predicted) else {
        return;
    };
    tracing::warn!(index, error = %e, "Prediction could not be scored, substituting an empty one");
    if let Err(e) = metrics.add(index, gold, Some("")) {
        metrics.add_miss(Some(index), Some(gold), e.to_string());
    }
}

/// Correctness of every beam of one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeamItem {
    pub index: usize,
    pub beams: Vec<bool>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BeamTotals {
    pub count: usize,
    /// Fraction of records whose first beam is correct.
    pub exact: f64,
    /// Fraction of records with any correct beam.
    pub oracle: f64,
}

/// Finalized beam-wise evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeamReport {
    /// Sorted by index.
    pub per_item: Vec<BeamItem>,
    pub total_scores: BTreeMap<String, BeamTotals>,
}

impl BeamReport {
    pub fn exact(&self) -> f64 {
        self.total_scores
            .get(ALL_SLICE)
            .map(|t| t.exact)
            .unwrap_or_default()
    }
}

/// Evaluate every beam of every record independently (oracle analysis).
///
/// Records that cannot be resolved to a gold example count towards the
/// totals as misses but have no per-item entry.
pub fn evaluate_all_beams<S: Scorer>(
    dataset: &Dataset,
    loaded: &[Result<LoadedRecord, RecordError>],
    scorer: S,
) -> BeamReport {
    let metrics = Metrics::new(scorer);
    let mut per_item = Vec::new();
    let mut count = 0usize;
    let mut top1 = 0usize;
    let mut oracle = 0usize;

    for entry in loaded {
        count += 1;
        let gold = entry
            .as_ref()
            .ok()
            .and_then(|l| dataset.get(l.record.index()).map(|g| (l, g)));
        let Some((loaded, gold)) = gold else {
            tracing::warn!("Beam-wise evaluation skipped an unresolvable record");
            continue;
        };

        let codes: Vec<Option<String>> = loaded
            .record
            .beams()
            .iter()
            .map(|b| b.inferred_code.clone())
            .collect();
        let beams = metrics.evaluate_all(gold, &codes);
        if beams.first().copied().unwrap_or(false) {
            top1 += 1;
        }
        if beams.iter().any(|b| *b) {
            oracle += 1;
        }
        per_item.push(BeamItem {
            index: loaded.record.index(),
            beams,
        });
    }

    per_item.sort_by(|a, b| (a.index, &a.beams).cmp(&(b.index, &b.beams)));
    let rate = |n: usize| if count == 0 { 0.0 } else { n as f64 / count as f64 };
    let totals = BeamTotals {
        count,
        exact: rate(top1),
        oracle: rate(oracle),
    };

    BeamReport {
        per_item,
        total_scores: BTreeMap::from([(ALL_SLICE.to_string(), totals)]),
    }
}

/// Either evaluation mode's report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EvaluationOutput {
    Default(EvaluationReport),
    Beams(BeamReport),
}

impl EvaluationOutput {
    /// Top-1 exact-match rate over all records.
    pub fn exact(&self) -> f64 {
        match self {
            Self::Default(report) => report.exact(),
            Self::Beams(report) => report.exact(),
        }
    }
}

/// Load a dataset section and an inference file, then evaluate.
///
/// The transition system is checked before anything is read.
pub fn compute_metrics<S: Scorer>(
    transition_system: TransitionSystem,
    dataset: &DatasetConfig,
    inferred: &Path,
    evaluate_beams_individually: bool,
    scorer: S,
) -> anyhow::Result<EvaluationOutput> {
    ensure_scorable(transition_system)?;

    let dataset = dataset.load()?;
    let loaded = RecordReader::read_all(inferred)?;
    tracing::info!(
        records = loaded.len(),
        examples = dataset.len(),
        beam_wise = evaluate_beams_individually,
        "Evaluating inference records"
    );

    Ok(if evaluate_beams_individually {
        EvaluationOutput::Beams(evaluate_all_beams(&dataset, &loaded, scorer))
    } else {
        EvaluationOutput::Default(evaluate_default(&dataset, &loaded, scorer))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scorer::{ScoreError, SpiderScorer};
    use records::parse_line;
    use spider::Schema;
    use std::sync::Arc;

    fn dataset(n: usize) -> Dataset {
        let schema: Schema = serde_json::from_value(serde_json::json!({
            "db_id": "pets",
            "tables": [{"id": 0, "name": "pets", "orig_name": "Pets"}],
            "columns": [
                {"id": 0, "table": null, "name": "*", "orig_name": "*"},
                {"id": 1, "table": 0, "name": "age", "orig_name": "age"}
            ],
            "foreign_keys": []
        }))
        .unwrap();
        Dataset::from_parts(
            (0..n).map(|i| {
                (
                    format!("Pets older than {i}?"),
                    format!("SELECT count(*) FROM pets WHERE age > {i}"),
                    "pets".to_string(),
                )
            }),
            BTreeMap::from([("pets".to_string(), Arc::new(schema))]),
        )
        .unwrap()
    }

    fn beam(code: &str) -> serde_json::Value {
        serde_json::json!({
            "question": "q", "model_output": "m", "inferred_code": code,
            "inferred_code_readable": code, "score": -0.1
        })
    }

    fn lines(lines: &[String]) -> Vec<Result<LoadedRecord, RecordError>> {
        lines
            .iter()
            .enumerate()
            .map(|(i, l)| parse_line(l, i + 1))
            .collect()
    }

    const RIGHT: &str = "SELECT count(*) FROM pets WHERE pets.age > 'terminal'";
    const WRONG: &str = "SELECT count(*) FROM pets WHERE pets.age < 'terminal'";

    #[test]
    fn test_failure_record_is_a_miss() {
        let data = dataset(2);
        let loaded = lines(&[
            serde_json::json!({"index": 0, "beams": [beam(RIGHT)]}).to_string(),
            serde_json::json!({"index": 1, "error": "boom", "trace": "boom\n at x"}).to_string(),
        ]);
        let report = evaluate_default(&data, &loaded, SpiderScorer);
        assert_eq!(report.total_scores["all"].count, 2);
        assert_eq!(report.total_scores["all"].exact_count, 1);
        assert_eq!(report.exact(), 0.5);
        assert_eq!(report.per_item[1].error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_unresolvable_records_count_in_all_only() {
        let data = dataset(1);
        let loaded = lines(&[
            serde_json::json!({"index": 7, "beams": [beam(RIGHT)]}).to_string(),
            "{\"index\": 0, \"beams\": \"none\"}".to_string(),
            "garbage".to_string(),
        ]);
        let report = evaluate_default(&data, &loaded, SpiderScorer);
        assert_eq!(report.total_scores["all"].count, 3);
        assert_eq!(report.per_item.len(), 3);
        assert_eq!(report.per_item[0].index, Some(0));
        assert!(report.per_item[0].hardness.is_some());
        assert!(report.per_item[1].hardness.is_none());
        assert_eq!(report.per_item[1].index, Some(7));
        assert_eq!(report.per_item[2].index, None);
    }

    #[test]
    fn test_empty_beams_is_a_counted_miss() {
        let data = dataset(1);
        let loaded = lines(&[serde_json::json!({"index": 0, "beams": []}).to_string()]);
        let report = evaluate_default(&data, &loaded, SpiderScorer);
        assert_eq!(report.total_scores["all"].count, 1);
        assert_eq!(report.per_item[0].predicted, None);
        assert!(!report.per_item[0].exact);
    }

    struct PickyScorer;

    impl Scorer for PickyScorer {
        fn slices(&self) -> Vec<&'static str> {
            vec![]
        }
        fn slice(&self, _gold: &Example) -> Option<&'static str> {
            None
        }
        fn exact(&self, _gold: &Example, predicted: &str) -> Result<bool, ScoreError> {
            spider::exact_match("SELECT 1", predicted).map_err(ScoreError::from)?;
            Ok(predicted.is_empty())
        }
    }

    #[test]
    fn test_scoring_error_substitutes_empty_prediction() {
        let data = dataset(1);
        let loaded = lines(&[
            serde_json::json!({"index": 0, "beams": [beam("SELECT 'open")]}).to_string(),
        ]);
        let report = evaluate_default(&data, &loaded, PickyScorer);
        assert_eq!(report.total_scores["all"].count, 1);
        assert_eq!(report.per_item[0].predicted.as_deref(), Some(""));
    }

    #[test]
    fn test_beam_wise_oracle() {
        let data = dataset(2);
        let loaded = lines(&[
            serde_json::json!({"index": 1, "beams": [beam(WRONG), beam(RIGHT), beam(WRONG)]})
                .to_string(),
            serde_json::json!({"index": 0, "beams": [beam(RIGHT)]}).to_string(),
            serde_json::json!({"index": 9, "error": "e", "trace": "t"}).to_string(),
        ]);
        let report = evaluate_all_beams(&data, &loaded, SpiderScorer);
        assert_eq!(
            report.per_item,
            vec![
                BeamItem { index: 0, beams: vec![true] },
                BeamItem { index: 1, beams: vec![false, true, false] },
            ]
        );
        let all = report.total_scores["all"];
        assert_eq!(all.count, 3);
        assert!((all.exact - 1.0 / 3.0).abs() < 1e-9);
        assert!((all.oracle - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_tree_system_is_unsupported() {
        assert!(ensure_scorable(TransitionSystem::Spider).is_ok());
        assert_eq!(
            ensure_scorable(TransitionSystem::Tree),
            Err(EvaluationError::UnsupportedTransitionSystem("tree".into()))
        );
    }

    #[test]
    fn test_compute_metrics_checks_system_before_loading() {
        let config: DatasetConfig = serde_json::from_value(serde_json::json!({
            "name": "spider",
            "paths": ["/nonexistent/dev.json"],
            "tables_paths": ["/nonexistent/tables.json"],
        }))
        .unwrap();
        let err = compute_metrics(
            TransitionSystem::Tree,
            &config,
            Path::new("/nonexistent/infer.jsonl"),
            false,
            SpiderScorer,
        )
        .unwrap_err();
        assert!(err.downcast_ref::<EvaluationError>().is_some());
    }
}
