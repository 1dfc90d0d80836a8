//! Integration tests for the evaluation crate over files on disk.
//!
//! Writes a small Spider-format dataset and inference JSONL files to a temp
//! directory and runs `compute_metrics` end to end in both modes.

use std::path::{Path, PathBuf};

use evaluation::{compute_metrics, EvaluationError, EvaluationOutput, SpiderScorer};
use spider::{DatasetConfig, TransitionSystem};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const GOLD: [&str; 3] = [
    "SELECT count(*) FROM singer",
    "SELECT name FROM singer WHERE age > 30",
    "SELECT name , country FROM singer ORDER BY age DESC",
];

fn write_dataset(dir: &Path) -> DatasetConfig {
    let tables = serde_json::json!([{
        "db_id": "concert_singer",
        "table_names": ["singer"],
        "table_names_original": ["singer"],
        "column_names": [[-1, "*"], [0, "name"], [0, "country"], [0, "age"]],
        "column_names_original": [[-1, "*"], [0, "Name"], [0, "Country"], [0, "Age"]],
        "column_types": ["text", "text", "text", "number"],
        "foreign_keys": []
    }]);
    let examples: Vec<_> = GOLD
        .iter()
        .enumerate()
        .map(|(i, query)| {
            serde_json::json!({
                "db_id": "concert_singer",
                "question": format!("question {i}"),
                "query": query,
            })
        })
        .collect();

    std::fs::write(dir.join("tables.json"), tables.to_string()).unwrap();
    std::fs::write(dir.join("dev.json"), serde_json::Value::from(examples).to_string()).unwrap();

    let mut config: DatasetConfig = serde_json::from_value(serde_json::json!({
        "name": "spider",
        "paths": ["dev.json"],
        "tables_paths": ["tables.json"],
    }))
    .unwrap();
    config.rebase(dir);
    config
}

fn beam(code: &str, score: f64) -> serde_json::Value {
    serde_json::json!({
        "question": "q",
        "model_output": "tree",
        "inferred_code": code,
        "inferred_code_readable": code,
        "score": score,
    })
}

fn write_records(dir: &Path, lines: &[String]) -> PathBuf {
    let path = dir.join("infer.jsonl");
    std::fs::write(&path, lines.join("\n") + "\n").unwrap();
    path
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn test_failure_record_is_counted_as_miss() {
    let dir = tempfile::tempdir().unwrap();
    let dataset = write_dataset(dir.path());
    let inferred = write_records(
        dir.path(),
        &[
            serde_json::json!({"index": 0, "beams": [beam("SELECT count(*) FROM singer", -0.1)]})
                .to_string(),
            serde_json::json!({"index": 1, "error": "model timed out", "trace": "model timed out"})
                .to_string(),
            serde_json::json!({"index": 2, "beams": [beam("SELECT singer.Name , singer.Country FROM singer ORDER BY singer.Age DESC", -0.4)]})
                .to_string(),
        ],
    );

    let output =
        compute_metrics(TransitionSystem::Spider, &dataset, &inferred, false, SpiderScorer).unwrap();
    let EvaluationOutput::Default(report) = output else {
        panic!("expected a top-1 report");
    };

    assert_eq!(report.total_scores["all"].count, 3);
    assert_eq!(report.total_scores["all"].exact_count, 2);
    assert!((report.exact() - 2.0 / 3.0).abs() < 1e-9);
    assert_eq!(report.per_item[1].index, Some(1));
    assert!(!report.per_item[1].exact);
    assert_eq!(report.per_item[1].error.as_deref(), Some("model timed out"));
}

#[test]
fn test_beam_wise_reports_each_beam() {
    let dir = tempfile::tempdir().unwrap();
    let dataset = write_dataset(dir.path());
    let inferred = write_records(
        dir.path(),
        &[serde_json::json!({"index": 1, "beams": [
            beam("SELECT singer.Name FROM singer WHERE singer.Age < 'terminal'", -0.1),
            beam("SELECT singer.Name FROM singer WHERE singer.Age > 'terminal'", -0.2),
            beam("SELECT singer.Country FROM singer WHERE singer.Age > 'terminal'", -0.3),
        ]})
        .to_string()],
    );

    let output =
        compute_metrics(TransitionSystem::Spider, &dataset, &inferred, true, SpiderScorer).unwrap();
    let EvaluationOutput::Beams(report) = &output else {
        panic!("expected a beam-wise report");
    };

    assert_eq!(report.per_item.len(), 1);
    assert_eq!(report.per_item[0].index, 1);
    assert_eq!(report.per_item[0].beams, vec![false, true, false]);
    assert_eq!(report.total_scores["all"].oracle, 1.0);
    assert_eq!(output.exact(), 0.0);
}

#[test]
fn test_malformed_lines_do_not_abort() {
    let dir = tempfile::tempdir().unwrap();
    let dataset = write_dataset(dir.path());
    let inferred = write_records(
        dir.path(),
        &[
            "{\"index\": 0, \"beams\": [{\"question\": 1}]}".to_string(),
            "not json".to_string(),
            String::new(),
            serde_json::json!({"index": 2, "beams": []}).to_string(),
        ],
    );

    let output =
        compute_metrics(TransitionSystem::Spider, &dataset, &inferred, false, SpiderScorer).unwrap();
    let EvaluationOutput::Default(report) = output else {
        panic!("expected a top-1 report");
    };

    assert_eq!(report.total_scores["all"].count, 3);
    assert_eq!(report.exact(), 0.0);
    let indices: Vec<_> = report.per_item.iter().map(|i| i.index).collect();
    assert_eq!(indices, vec![Some(0), Some(2), None]);
}

#[test]
fn test_report_serializes_with_total_scores() {
    let dir = tempfile::tempdir().unwrap();
    let dataset = write_dataset(dir.path());
    let inferred = write_records(
        dir.path(),
        &[serde_json::json!({"index": 0, "beams": [beam("SELECT count(*) FROM singer", -0.1)]})
            .to_string()],
    );

    let output =
        compute_metrics(TransitionSystem::Spider, &dataset, &inferred, false, SpiderScorer).unwrap();
    let json = serde_json::to_value(&output).unwrap();
    assert_eq!(json["total_scores"]["all"]["exact"], 1.0);
    assert_eq!(json["per_item"][0]["exact"], true);

    let back: EvaluationOutput = serde_json::from_value(json).unwrap();
    assert_eq!(back, output);
}

#[test]
fn test_tree_system_rejected_before_reading() {
    let dir = tempfile::tempdir().unwrap();
    let dataset = write_dataset(dir.path());
    let err = compute_metrics(
        TransitionSystem::Tree,
        &dataset,
        &dir.path().join("missing.jsonl"),
        false,
        SpiderScorer,
    )
    .unwrap_err();
    assert_eq!(
        err.downcast_ref::<EvaluationError>(),
        Some(&EvaluationError::UnsupportedTransitionSystem("tree".into()))
    );
}
