//! Integration tests for the decode crate using a dataset + MockParser.
//!
//! Exercises task construction over dataset sub-ranges and the worker's
//! per-item failure containment. No model server is needed.

use std::collections::BTreeMap;
use std::sync::Arc;

use decode::mocks::{concert_schema, make_beam, MockParser};
use decode::{build_tasks, task_range, DecodeOptions, DecodeWorker};
use records::InferenceRecord;
use spider::{Dataset, PreprocessedStore, QuestionTokenizer, TokenizerConfig};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn dataset(n: usize) -> Dataset {
    let schema = Arc::new(concert_schema());
    let schemas = BTreeMap::from([(schema.db_id.clone(), schema)]);
    Dataset::from_parts(
        (0..n).map(|i| {
            (
                format!("How many singers are older than {i} ?"),
                format!("SELECT count(*) FROM singer WHERE age > {i}"),
                "concert_singer".to_string(),
            )
        }),
        schemas,
    )
    .unwrap()
}

fn older_than_tree() -> serde_json::Value {
    serde_json::json!({
        "select": {"items": [{"agg": "count", "val": {"kind": "column", "col_id": 0}}]},
        "from": {"table_units": [{"kind": "table", "table_id": 3}]},
        "where": {"kind": "predicate", "op": "gt",
                  "val_unit": {"kind": "column", "col_id": 9},
                  "val1": {"kind": "terminal"}}
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_sub_range_keeps_dataset_indices() {
    let data = dataset(20);
    let tokenizer = QuestionTokenizer::from_config(&TokenizerConfig::default()).unwrap();
    let store = PreprocessedStore::build(&data, &tokenizer).unwrap();
    store.ensure_paired(&data).unwrap();

    let tasks = build_tasks(&data, &store, task_range(data.len(), 5, Some(3)), 1, false);
    let worker = DecodeWorker::new(
        Arc::new(MockParser::with_default(vec![make_beam(older_than_tree(), -0.2)])),
        DecodeOptions::default(),
    );

    let mut indices = Vec::new();
    for task in &tasks {
        let record = worker.decode(task).await;
        assert_eq!(record.beams().len(), 1);
        assert_eq!(
            record.top1_code(),
            Some("SELECT Count(*) FROM singer WHERE singer.Age > 'terminal'")
        );
        assert_eq!(record.beams()[0].question, task.example.question);
        indices.push(record.index());
    }
    assert_eq!(indices, vec![5, 6, 7]);
}

#[tokio::test]
async fn test_one_failure_does_not_abort_batch() {
    let data = dataset(3);
    let tokenizer = QuestionTokenizer::from_config(&TokenizerConfig::default()).unwrap();
    let store = PreprocessedStore::build(&data, &tokenizer).unwrap();

    let mut parser = MockParser::with_default(vec![make_beam(older_than_tree(), -0.2)]);
    parser.add_failure(&data.get(1).unwrap().question);
    let worker = DecodeWorker::new(Arc::new(parser), DecodeOptions::default());

    let tasks = build_tasks(&data, &store, 0..3, 1, false);
    let mut lines = Vec::new();
    for task in &tasks {
        lines.push(worker.decode_line(task).await);
    }

    let records: Vec<InferenceRecord> = lines
        .iter()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert!(!records[0].is_failed());
    assert!(records[1].is_failed());
    assert!(!records[2].is_failed());

    let failed: serde_json::Value = serde_json::from_str(&lines[1]).unwrap();
    assert_eq!(failed["index"], 1);
    assert!(failed["error"].as_str().unwrap().contains("mock parser failure"));
    assert!(failed["trace"].is_string());
}

#[tokio::test]
async fn test_frozen_model_is_idempotent() {
    let data = dataset(4);
    let tokenizer = QuestionTokenizer::from_config(&TokenizerConfig::default()).unwrap();
    let store = PreprocessedStore::build(&data, &tokenizer).unwrap();
    let tasks = build_tasks(&data, &store, 0..4, 2, false);

    let worker = DecodeWorker::new(
        Arc::new(MockParser::with_default(vec![
            make_beam(older_than_tree(), -0.2),
            make_beam(older_than_tree(), -0.2),
        ])),
        DecodeOptions::default(),
    );

    for task in &tasks {
        let first = worker.decode(task).await;
        let second = worker.decode(task).await;
        assert_eq!(first, second);
        let scores: Vec<f64> = first.beams().iter().map(|b| b.score).collect();
        assert!(scores.windows(2).all(|w| w[0] >= w[1]));
    }
}
