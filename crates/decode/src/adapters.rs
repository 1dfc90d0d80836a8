//! Bridges between the decode traits and real model backends.

use async_trait::async_trait;
use model::{Beam, ModelBackend};
use spider::PreprocessedExample;

use crate::worker::{DecodeError, Parser};

// ---------------------------------------------------------------------------
// Parser for ModelBackend (HTTP server or fixture replay)
// ---------------------------------------------------------------------------

#[async_trait]
impl Parser for ModelBackend {
    async fn parse(
        &self,
        example: &PreprocessedExample,
        max_steps: usize,
        beam_size: usize,
    ) -> Result<Vec<Beam>, DecodeError> {
        ModelBackend::parse(self, example, max_steps, beam_size)
            .await
            .map_err(|e| DecodeError::Model(e.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{make_beam, task};
    use crate::worker::{DecodeOptions, DecodeWorker};
    use model::FixtureParser;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_fixture_backend_drives_worker() {
        let backend = ModelBackend::Fixture(Arc::new(FixtureParser::from_entries([(
            "How many singers?".to_string(),
            vec![make_beam(
                serde_json::json!({
                    "select": {"items": [{"agg": "count", "val": {"kind": "column", "col_id": 0}}]},
                    "from": {"table_units": [{"kind": "table", "table_id": 3}]}
                }),
                -0.4,
            )],
        )])));
        let worker = DecodeWorker::new(Arc::new(backend), DecodeOptions::default());

        let hit = worker.decode(&task(0, "How many singers?", 1)).await;
        assert_eq!(hit.top1_code(), Some("SELECT Count(*) FROM singer"));

        let miss = worker.decode(&task(1, "Unknown question?", 1)).await;
        match miss {
            records::InferenceRecord::Failed { error, .. } => {
                assert!(error.contains("no recorded beams"))
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }
}
