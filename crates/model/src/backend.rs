//! Cloneable model handle selected from [`ModelConfig`].

use std::sync::Arc;
use std::time::Duration;

use spider::PreprocessedExample;

use crate::client::{ParserClient, ParserClientConfig};
use crate::error::ModelError;
use crate::fixture::FixtureParser;
use crate::types::{Beam, Checkpoint, ModelConfig};

/// A loaded model, cheap to clone and share across decode tasks.
///
/// Opening a backend acquires whatever it needs (a verified server
/// connection, a parsed fixture file). Dropping the last clone releases it.
#[derive(Clone)]
pub enum ModelBackend {
    Http(Arc<ParserClient>),
    Fixture(Arc<FixtureParser>),
}

impl ModelBackend {
    pub async fn open(config: &ModelConfig, checkpoint: Checkpoint) -> Result<Self, ModelError> {
        match config {
            ModelConfig::Http {
                url,
                timeout_secs,
                max_attempts,
                breaker_threshold,
                breaker_cooldown_secs,
            } => {
                let client = ParserClient::connect(
                    ParserClientConfig {
                        server_url: url.clone(),
                        timeout: Duration::from_secs(*timeout_secs),
                        max_attempts: *max_attempts,
                        breaker_threshold: *breaker_threshold,
                        breaker_cooldown: Duration::from_secs(*breaker_cooldown_secs),
                    },
                    checkpoint,
                )
                .await?;
                Ok(Self::Http(Arc::new(client)))
            }
            ModelConfig::Fixture { path } => {
                Ok(Self::Fixture(Arc::new(FixtureParser::load(path)?)))
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Http(_) => "http",
            Self::Fixture(_) => "fixture",
        }
    }

    /// Decode one example. The model may return fewer than `beam_size`
    /// beams, in any order.
    pub async fn parse(
        &self,
        example: &PreprocessedExample,
        max_steps: usize,
        beam_size: usize,
    ) -> Result<Vec<Beam>, ModelError> {
        match self {
            Self::Http(client) => client.parse(example, max_steps, beam_size).await,
            Self::Fixture(fixture) => fixture.parse(example, beam_size),
        }
    }

    /// Release this handle. Resources are freed once every clone is closed
    /// or dropped.
    pub async fn close(self) {
        tracing::debug!(backend = self.name(), "Closing model backend");
    }
}

impl std::fmt::Debug for ModelBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Http(client) => f
                .debug_tuple("Http")
                .field(&client.checkpoint())
                .finish(),
            Self::Fixture(fixture) => f.debug_tuple("Fixture").field(&fixture.path()).finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Beam;

    #[tokio::test]
    async fn test_fixture_backend_is_shared() {
        let backend = ModelBackend::Fixture(Arc::new(FixtureParser::from_entries([(
            "q".to_string(),
            vec![Beam {
                tree: serde_json::json!({}),
                model_output: String::new(),
                score: -1.0,
                choice_history: None,
                score_history: None,
            }],
        )])));
        let clone = backend.clone();
        let example = PreprocessedExample {
            db_id: "d".into(),
            question: "q".into(),
            question_tokens: vec!["q".into()],
            token_ids: vec![],
        };
        assert_eq!(clone.parse(&example, 100, 3).await.unwrap().len(), 1);
        assert_eq!(backend.name(), "fixture");
        clone.close().await;
        assert_eq!(backend.parse(&example, 100, 3).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_open_missing_fixture_file() {
        let config = ModelConfig::Fixture {
            path: "/nonexistent/beams.jsonl".into(),
        };
        let checkpoint = Checkpoint {
            logdir: "/runs".into(),
            step: None,
        };
        let err = ModelBackend::open(&config, checkpoint).await.unwrap_err();
        assert!(matches!(err, ModelError::Fixture { .. }));
    }
}
