//! Integration tests for dispatch: both strategies behind `dyn Dispatcher`.
//!
//! The pool tests spawn `sh` children that speak the worker line protocol,
//! so they run on unix only. No model is needed.

use std::collections::BTreeSet;
use std::sync::Arc;

use decode::mocks::{make_beam, task, MockParser};
use decode::{DecodeOptions, DecodeWorker};
use dispatch::{Dispatcher, PoolConfig, ProcessPool, SequentialDispatcher, Strategy};
use model::DeviceConfig;
use records::InferenceRecord;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const ECHO_WORKER: &str = r#"echo ready.
while read -r line; do
  idx=$(printf '%s' "$line" | sed -n 's/.*"index":\([0-9]*\).*/\1/p')
  echo "{\"index\":$idx,\"beams\":[]}"
done"#;

async fn build(strategy: Strategy) -> Box<dyn Dispatcher> {
    match strategy {
        Strategy::Sequential => {
            let parser = MockParser::with_default(vec![make_beam(
                serde_json::json!({"select": {"items": [{"val": {"kind": "column", "col_id": 2}}]}}),
                -0.5,
            )]);
            Box::new(SequentialDispatcher::new(DecodeWorker::new(
                Arc::new(parser),
                DecodeOptions::default(),
            )))
        }
        Strategy::ProcessPool { num_workers } => {
            let config = PoolConfig::new(
                num_workers,
                "sh",
                vec!["-c".to_string(), ECHO_WORKER.to_string()],
            );
            Box::new(ProcessPool::spawn(config).await.unwrap())
        }
    }
}

async fn run(dispatcher: &dyn Dispatcher, indices: std::ops::Range<usize>) -> Vec<InferenceRecord> {
    let tasks = indices.map(|i| task(i, &format!("question {i}"), 1)).collect();
    let mut stream = dispatcher.map(tasks).await.unwrap();
    let mut records = Vec::new();
    while let Some(line) = stream.next().await {
        assert!(line.ends_with('\n'));
        records.push(serde_json::from_str(&line).unwrap());
    }
    assert_eq!(records.len(), stream.total());
    records
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_sequential_two_examples() {
    let strategy = Strategy::probe(DeviceConfig::Cpu, 1);
    let dispatcher = build(strategy).await;
    assert_eq!(dispatcher.strategy(), Strategy::Sequential);

    let records = run(dispatcher.as_ref(), 0..2).await;
    assert_eq!(records.iter().map(|r| r.index()).collect::<Vec<_>>(), vec![0, 1]);
    for record in &records {
        assert_eq!(record.beams().len(), 1);
        assert_eq!(record.top1_code(), Some("SELECT stadium.Name FROM stadium"));
    }
    dispatcher.shutdown().await;
}

#[cfg(unix)]
#[tokio::test]
async fn test_pool_covers_sub_range() {
    let strategy = Strategy::probe(DeviceConfig::Cpu, 3);
    let dispatcher = build(strategy).await;
    assert_eq!(dispatcher.strategy(), Strategy::ProcessPool { num_workers: 3 });

    let records = run(dispatcher.as_ref(), 5..8).await;
    let indices: BTreeSet<_> = records.iter().map(|r| r.index()).collect();
    assert_eq!(indices, BTreeSet::from([5, 6, 7]));
    dispatcher.shutdown().await;
}

#[cfg(unix)]
#[tokio::test]
async fn test_pool_many_tasks_exactly_once() {
    let dispatcher = build(Strategy::ProcessPool { num_workers: 4 }).await;
    let records = run(dispatcher.as_ref(), 0..50).await;
    let indices: BTreeSet<_> = records.iter().map(|r| r.index()).collect();
    assert_eq!(records.len(), 50);
    assert_eq!(indices, (0..50).collect());
    dispatcher.shutdown().await;
}
