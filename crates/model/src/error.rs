use std::path::PathBuf;

/// Errors from model backends.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("invalid server URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("model server unreachable at {url}: {source}")]
    Unreachable {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("model request failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("model server error {status}: {body}")]
    Server { status: u16, body: String },

    #[error("model rejected request {status}: {body}")]
    Client { status: u16, body: String },

    #[error("invalid model response: {0}")]
    Decode(#[source] reqwest::Error),

    #[error(
        "circuit breaker open ({failures} consecutive transport failures), \
         will reset after {cooldown_secs}s"
    )]
    CircuitOpen { failures: u32, cooldown_secs: u64 },

    #[error("failed to load fixtures from {path}: {source}")]
    Fixture {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("no recorded beams for question '{0}'")]
    MissingFixture(String),

    #[error("failed to build HTTP client: {0}")]
    Build(#[source] reqwest::Error),
}
