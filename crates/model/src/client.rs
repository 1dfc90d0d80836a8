//! HTTP client for a remote SQL parser server.
//!
//! The server owns the trained model and the beam search. The client sends
//! one preprocessed example per request and receives the scored beams.
//!
//! # Protocol
//!
//! - `GET /health` answers 2xx when the checkpoint is loaded.
//! - `POST /parse` with `{"checkpoint", "example", "beam_size", "max_steps"}`
//!   answers `{"beams": [{"tree", "model_output", "score", ...}]}`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use reqwest::Client;
use serde::{Deserialize, Serialize};
use spider::PreprocessedExample;
use url::Url;

use crate::error::ModelError;
use crate::types::{Beam, Checkpoint};

/// Connection settings for [`ParserClient`].
#[derive(Debug, Clone)]
pub struct ParserClientConfig {
    pub server_url: String,
    pub timeout: Duration,
    pub max_attempts: usize,
    /// Consecutive transport failures that open the breaker.
    pub breaker_threshold: u32,
    /// How long an open breaker rejects requests.
    pub breaker_cooldown: Duration,
}

/// Backoff before retry `attempt`: 1s, 2s, 4s, ... capped at 32s.
fn retry_delay(attempt: usize) -> Duration {
    Duration::from_millis(500u64 << attempt.min(6))
}

#[derive(Debug, Default)]
struct BreakerState {
    failures: u32,
    opened_at: Option<Instant>,
}

/// Fails requests fast while the server looks down.
///
/// Opens once `threshold` transport errors arrive in a row and stays open for
/// `cooldown`. The first request after the cooldown goes through; another
/// transport error reopens it immediately.
#[derive(Debug, Clone)]
struct CircuitBreaker {
    threshold: u32,
    cooldown: Duration,
    state: Arc<Mutex<BreakerState>>,
}

impl CircuitBreaker {
    fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            cooldown,
            state: Arc::default(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check(&self) -> Result<(), ModelError> {
        let mut state = self.lock();
        let Some(opened_at) = state.opened_at else {
            return Ok(());
        };
        if opened_at.elapsed() >= self.cooldown {
            state.opened_at = None;
            state.failures = self.threshold - 1;
            tracing::info!("Parser circuit breaker half-open after cooldown");
            return Ok(());
        }
        Err(ModelError::CircuitOpen {
            failures: state.failures,
            cooldown_secs: self.cooldown.as_secs(),
        })
    }

    fn record_success(&self) {
        *self.lock() = BreakerState::default();
    }

    fn record_failure(&self) {
        let mut state = self.lock();
        state.failures += 1;
        if state.failures >= self.threshold && state.opened_at.is_none() {
            state.opened_at = Some(Instant::now());
            tracing::error!(
                consecutive_failures = state.failures,
                cooldown_secs = self.cooldown.as_secs(),
                "Parser circuit breaker opened, server appears down"
            );
        }
    }
}

#[derive(Serialize)]
struct ParseRequest<'a> {
    checkpoint: &'a Checkpoint,
    example: &'a PreprocessedExample,
    beam_size: usize,
    max_steps: usize,
}

#[derive(Deserialize)]
struct ParseResponse {
    beams: Vec<Beam>,
}

/// HTTP client for the parser server.
#[derive(Clone)]
pub struct ParserClient {
    client: Client,
    base_url: Url,
    config: ParserClientConfig,
    checkpoint: Checkpoint,
    circuit: CircuitBreaker,
}

impl ParserClient {
    /// Create a client for `checkpoint` and verify the server is reachable.
    pub async fn connect(
        config: ParserClientConfig,
        checkpoint: Checkpoint,
    ) -> Result<Self, ModelError> {
        let this = Self::new(config, checkpoint)?;
        this.health_check().await?;
        Ok(this)
    }

    /// Create a client without contacting the server.
    pub fn new(config: ParserClientConfig, checkpoint: Checkpoint) -> Result<Self, ModelError> {
        let base_url = Url::parse(&config.server_url).map_err(|source| ModelError::InvalidUrl {
            url: config.server_url.clone(),
            source,
        })?;

        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(config.timeout)
            .build()
            .map_err(ModelError::Build)?;
        let circuit = CircuitBreaker::new(config.breaker_threshold, config.breaker_cooldown);

        Ok(Self {
            client,
            base_url,
            config,
            checkpoint,
            circuit,
        })
    }

    pub fn checkpoint(&self) -> &Checkpoint {
        &self.checkpoint
    }

    fn endpoint(&self, path: &str) -> Result<Url, ModelError> {
        self.base_url
            .join(path)
            .map_err(|source| ModelError::InvalidUrl {
                url: format!("{}{path}", self.base_url),
                source,
            })
    }

    /// Verify the server is reachable and responding.
    pub async fn health_check(&self) -> Result<(), ModelError> {
        let url = self.endpoint("/health")?;
        let resp = self
            .client
            .get(url)
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|source| ModelError::Unreachable {
                url: self.config.server_url.clone(),
                source,
            })?;

        if !resp.status().is_success() {
            return Err(ModelError::Server {
                status: resp.status().as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }
        tracing::info!(url = %self.config.server_url, "Parser server is reachable");
        Ok(())
    }

    /// Decode one example into at most `beam_size` beams.
    pub async fn parse(
        &self,
        example: &PreprocessedExample,
        max_steps: usize,
        beam_size: usize,
    ) -> Result<Vec<Beam>, ModelError> {
        let url = self.endpoint("/parse")?;
        let request = ParseRequest {
            checkpoint: &self.checkpoint,
            example,
            beam_size,
            max_steps,
        };
        let resp = self.post_with_attempts(&url, &request).await?;
        let body: ParseResponse = resp.json().await.map_err(ModelError::Decode)?;

        tracing::debug!(
            db_id = %example.db_id,
            beams = body.beams.len(),
            "Parsed example"
        );
        Ok(body.beams)
    }

    /// POST with retry on 5xx. Transport errors are not retried; they feed
    /// the circuit breaker instead.
    async fn post_with_attempts<T: Serialize>(
        &self,
        url: &Url,
        body: &T,
    ) -> Result<reqwest::Response, ModelError> {
        self.circuit.check()?;

        let mut last_err = None;
        for attempt in 0..self.config.max_attempts.max(1) {
            if attempt > 0 {
                let delay = retry_delay(attempt);
                tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "Retrying parser request");
                tokio::time::sleep(delay).await;
            }

            match self.client.post(url.clone()).json(body).send().await {
                Ok(resp) if resp.status().is_server_error() => {
                    last_err = Some(ModelError::Server {
                        status: resp.status().as_u16(),
                        body: resp.text().await.unwrap_or_default(),
                    });
                }
                Ok(resp) if resp.status().is_client_error() => {
                    self.circuit.record_success();
                    return Err(ModelError::Client {
                        status: resp.status().as_u16(),
                        body: resp.text().await.unwrap_or_default(),
                    });
                }
                Ok(resp) => {
                    self.circuit.record_success();
                    return Ok(resp);
                }
                Err(e) => {
                    tracing::warn!(error = %e, url = %url, "Parser transport error");
                    self.circuit.record_failure();
                    return Err(ModelError::Transport(e));
                }
            }
        }
        Err(last_err.unwrap_or(ModelError::Server {
            status: 0,
            body: "no attempts made".to_string(),
        }))
    }
}
