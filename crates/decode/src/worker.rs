//! Decode worker: one task in, one inference record out.

use std::any::Any;
use std::cmp::Reverse;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use ordered_float::OrderedFloat;

use model::Beam;
use records::{DecodedBeam, InferenceRecord};
use spider::{unparse, unparse_readable, PreprocessedExample, SurfaceError, TransitionSystem};

use crate::heuristic::apply_from_heuristic;
use crate::task::DecodeTask;

/// Errors that can occur while decoding one example.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The model failed to produce beams.
    #[error("model error: {0}")]
    Model(#[source] anyhow::Error),
    /// A beam's tree is not valid for the transition system.
    #[error("beam {beam}: {source}")]
    Surface {
        beam: usize,
        #[source]
        source: SurfaceError,
    },
    /// A beam's surface tree could not be rendered against the schema.
    #[error("beam {beam}: failed to unparse: {source}")]
    Unparse {
        beam: usize,
        #[source]
        source: spider::UnparseError,
    },
}

/// The model seam: produce up to `beam_size` candidates for one example.
///
/// `max_steps` bounds the decoder's search depth, so every call terminates
/// regardless of wall-clock time.
#[async_trait]
pub trait Parser: Send + Sync {
    async fn parse(
        &self,
        example: &PreprocessedExample,
        max_steps: usize,
        beam_size: usize,
    ) -> Result<Vec<Beam>, DecodeError>;
}

/// Decode settings shared by every task of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeOptions {
    pub transition_system: TransitionSystem,
    pub from_heuristic: bool,
    pub decode_max_time_step: usize,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            transition_system: TransitionSystem::Spider,
            from_heuristic: false,
            decode_max_time_step: 500,
        }
    }
}

/// Turns decode tasks into inference records.
///
/// Never fails: any error or panic while handling a task becomes a failure
/// record for that task's index.
#[derive(Clone)]
pub struct DecodeWorker {
    parser: Arc<dyn Parser>,
    options: DecodeOptions,
}

impl DecodeWorker {
    pub fn new(parser: Arc<dyn Parser>, options: DecodeOptions) -> Self {
        Self { parser, options }
    }

    pub fn options(&self) -> &DecodeOptions {
        &self.options
    }

    /// Decode one task into its record.
    pub async fn decode(&self, task: &DecodeTask) -> InferenceRecord {
        let outcome = AssertUnwindSafe(self.try_decode(task)).catch_unwind().await;
        match outcome {
            Ok(Ok(beams)) => {
                tracing::debug!(index = task.index, beams = beams.len(), "Decoded example");
                InferenceRecord::Decoded {
                    index: task.index,
                    beams,
                }
            }
            Ok(Err(e)) => {
                let e = anyhow::Error::new(e)
                    .context(format!("failed to decode example {}", task.index));
                tracing::warn!(index = task.index, error = %format!("{e:#}"), "Decode failed");
                InferenceRecord::failed(task.index, format!("{e:#}"), format!("{e:?}"))
            }
            Err(payload) => {
                let message = panic_message(&*payload);
                tracing::error!(index = task.index, panic = %message, "Decode panicked");
                InferenceRecord::failed(
                    task.index,
                    format!("decode panicked on example {}: {message}", task.index),
                    format!("panic: {message}"),
                )
            }
        }
    }

    /// Decode one task into a newline-terminated JSONL line.
    pub async fn decode_line(&self, task: &DecodeTask) -> String {
        let record = self.decode(task).await;
        record_line(&record)
    }

    async fn try_decode(&self, task: &DecodeTask) -> Result<Vec<DecodedBeam>, DecodeError> {
        let mut beams = self
            .parser
            .parse(
                &task.preprocessed,
                self.options.decode_max_time_step,
                task.beam_size,
            )
            .await?;

        // Stable, so equal scores keep the model's order.
        beams.sort_by_key(|b| Reverse(OrderedFloat(b.score)));
        beams.truncate(task.beam_size);

        beams
            .into_iter()
            .enumerate()
            .map(|(i, beam)| self.decode_beam(task, i, beam))
            .collect()
    }

    fn decode_beam(
        &self,
        task: &DecodeTask,
        beam_index: usize,
        beam: Beam,
    ) -> Result<DecodedBeam, DecodeError> {
        let surface = self
            .options
            .transition_system
            .to_surface(&beam.tree)
            .map_err(|source| DecodeError::Surface {
                beam: beam_index,
                source,
            })?;

        let (inferred_code, inferred_code_readable) = match surface {
            Some(mut tree) => {
                if self.options.from_heuristic && apply_from_heuristic(&mut tree) {
                    tracing::debug!(index = task.index, beam = beam_index, "Replaced wildcard-only FROM");
                }
                let schema = &task.example.schema;
                let unparse_err = |source| DecodeError::Unparse {
                    beam: beam_index,
                    source,
                };
                let code = unparse(&tree, schema).map_err(unparse_err)?;
                let readable = unparse_readable(&tree, schema).map_err(unparse_err)?;
                (Some(code), readable)
            }
            None => (None, String::new()),
        };

        let model_output = if beam.model_output.is_empty() {
            beam.tree.to_string()
        } else {
            beam.model_output
        };

        let (choice_history, score_history) = if task.include_history {
            (
                Some(beam.choice_history.unwrap_or(serde_json::Value::Null)),
                Some(beam.score_history.unwrap_or(serde_json::Value::Null)),
            )
        } else {
            (None, None)
        };

        Ok(DecodedBeam {
            question: task.example.question.clone(),
            model_output,
            inferred_code,
            inferred_code_readable,
            score: beam.score,
            choice_history,
            score_history,
        })
    }
}

/// Serialize `record`, degrading to a failure line if serialization fails.
pub fn record_line(record: &InferenceRecord) -> String {
    match record.to_line() {
        Ok(line) => line,
        Err(e) => {
            let index = record.index();
            let fallback =
                InferenceRecord::failed(index, format!("failed to serialize record: {e}"), format!("{e:?}"));
            fallback.to_line().unwrap_or_else(|_| {
                format!("{{\"index\":{index},\"error\":\"failed to serialize record\",\"trace\":\"\"}}\n")
            })
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{make_beam, task, MockParser};

    fn worker(parser: MockParser, options: DecodeOptions) -> DecodeWorker {
        DecodeWorker::new(Arc::new(parser), options)
    }

    fn count_star(table_id: usize) -> serde_json::Value {
        serde_json::json!({
            "select": {"items": [{"agg": "count", "val": {"kind": "column", "col_id": 0}}]},
            "from": {"table_units": [{"kind": "table", "table_id": table_id}]}
        })
    }

    #[tokio::test]
    async fn test_beams_sorted_and_truncated() {
        let mut parser = MockParser::new();
        parser.add_response(
            "How many singers?",
            vec![
                make_beam(count_star(0), -2.0),
                make_beam(count_star(3), -0.1),
                make_beam(count_star(1), -0.5),
            ],
        );
        let worker = worker(parser, DecodeOptions::default());

        let record = worker.decode(&task(0, "How many singers?", 2)).await;
        let scores: Vec<f64> = record.beams().iter().map(|b| b.score).collect();
        assert_eq!(scores, vec![-0.1, -0.5]);
        assert_eq!(
            record.top1_code(),
            Some("SELECT Count(*) FROM singer")
        );
        assert_eq!(record.beams()[0].question, "How many singers?");
    }

    #[tokio::test]
    async fn test_from_heuristic_uses_schema_default() {
        let mut parser = MockParser::new();
        parser.add_response("How many singers?", vec![make_beam(count_star(1), -0.1)]);

        let plain = worker(parser.clone(), DecodeOptions::default())
            .decode(&task(0, "How many singers?", 1))
            .await;
        assert_eq!(plain.top1_code(), Some("SELECT Count(*) FROM concert"));

        let corrected = worker(
            parser,
            DecodeOptions {
                from_heuristic: true,
                ..DecodeOptions::default()
            },
        )
        .decode(&task(0, "How many singers?", 1))
        .await;
        assert_eq!(corrected.top1_code(), Some("SELECT Count(*) FROM stadium"));
    }

    #[tokio::test]
    async fn test_model_error_becomes_failure_record() {
        let mut parser = MockParser::new();
        parser.add_failure("Broken?");
        let record = worker(parser, DecodeOptions::default())
            .decode(&task(7, "Broken?", 1))
            .await;
        match record {
            InferenceRecord::Failed { index, error, trace } => {
                assert_eq!(index, 7);
                assert!(error.contains("failed to decode example 7"));
                assert!(error.contains("model error"));
                assert!(!trace.is_empty());
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_panic_becomes_failure_record() {
        let mut parser = MockParser::new();
        parser.add_panic("Explode?");
        let record = worker(parser, DecodeOptions::default())
            .decode(&task(3, "Explode?", 1))
            .await;
        assert!(record.is_failed());
        assert_eq!(record.index(), 3);
        let line = record_line(&record);
        assert!(line.contains("panicked"));
        assert!(line.ends_with('\n'));
    }

    #[tokio::test]
    async fn test_bad_tree_fails_whole_record() {
        let mut parser = MockParser::new();
        parser.add_response(
            "Bad tree?",
            vec![
                make_beam(count_star(0), -0.1),
                make_beam(serde_json::json!({"selekt": 1}), -0.2),
            ],
        );
        let record = worker(parser, DecodeOptions::default())
            .decode(&task(1, "Bad tree?", 2))
            .await;
        match record {
            InferenceRecord::Failed { error, .. } => assert!(error.contains("beam 1")),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_tree_transition_system_has_no_code() {
        let mut parser = MockParser::new();
        parser.add_response(
            "Any tree?",
            vec![make_beam(serde_json::json!({"node": "root"}), -0.3)],
        );
        let record = worker(
            parser,
            DecodeOptions {
                transition_system: TransitionSystem::Tree,
                ..DecodeOptions::default()
            },
        )
        .decode(&task(0, "Any tree?", 1))
        .await;
        let beam = &record.beams()[0];
        assert_eq!(beam.inferred_code, None);
        assert_eq!(beam.inferred_code_readable, "");
        assert_eq!(beam.model_output, r#"{"node":"root"}"#);
    }

    #[tokio::test]
    async fn test_history_keys_follow_request() {
        let mut parser = MockParser::new();
        let mut beam = make_beam(count_star(0), -0.1);
        beam.choice_history = Some(serde_json::json!([2, 5]));
        parser.add_response("History?", vec![beam]);
        let worker = worker(parser, DecodeOptions::default());

        let without = worker.decode_line(&task(0, "History?", 1)).await;
        assert!(!without.contains("choice_history"));

        let mut with_history = task(0, "History?", 1);
        with_history.include_history = true;
        let line = worker.decode_line(&with_history).await;
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["beams"][0]["choice_history"], serde_json::json!([2, 5]));
        assert!(value["beams"][0]
            .as_object()
            .unwrap()
            .contains_key("score_history"));
        assert!(value["beams"][0]["score_history"].is_null());
    }

    #[tokio::test]
    async fn test_empty_beams_is_not_an_error() {
        let mut parser = MockParser::new();
        parser.add_response("Nothing?", vec![]);
        let record = worker(parser, DecodeOptions::default())
            .decode(&task(4, "Nothing?", 4))
            .await;
        assert!(!record.is_failed());
        assert!(record.beams().is_empty());
        assert_eq!(record.top1_code(), None);
    }
}
