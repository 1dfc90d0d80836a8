//! Core types: beam candidates, checkpoints and configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One scored candidate returned by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Beam {
    /// The model's internal tree as a JSON document.
    pub tree: serde_json::Value,
    /// Raw rendering of the tree. Empty when the model does not provide one.
    #[serde(default)]
    pub model_output: String,
    /// Log-probability of the candidate.
    pub score: f64,
    #[serde(default)]
    pub choice_history: Option<serde_json::Value>,
    #[serde(default)]
    pub score_history: Option<serde_json::Value>,
}

/// Identifies the trained model to decode with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub logdir: PathBuf,
    /// Training step; `None` selects the latest checkpoint.
    #[serde(default)]
    pub step: Option<u64>,
}

/// Where the model runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DeviceConfig {
    /// Probe for an accelerator at startup.
    #[serde(rename = "auto")]
    #[default]
    Auto,
    #[serde(rename = "cpu")]
    Cpu,
    /// CUDA GPU with the given ordinal.
    #[serde(rename = "cuda")]
    Cuda {
        #[serde(default)]
        ordinal: usize,
    },
}

impl DeviceConfig {
    /// Replace `Auto` with the device found by [`accelerator_available`].
    pub fn resolve(self) -> Self {
        match self {
            Self::Auto if accelerator_available() => Self::Cuda { ordinal: 0 },
            Self::Auto => Self::Cpu,
            other => other,
        }
    }

    pub fn is_accelerator(self) -> bool {
        matches!(self, Self::Cuda { .. })
    }
}

/// Whether a CUDA device is visible to this process.
pub fn accelerator_available() -> bool {
    probe_accelerator(
        std::env::var("CUDA_VISIBLE_DEVICES").ok().as_deref(),
        Path::new("/dev/nvidia0").exists(),
    )
}

fn probe_accelerator(visible_devices: Option<&str>, device_node: bool) -> bool {
    match visible_devices.map(str::trim) {
        Some("") | Some("-1") => false,
        Some(_) => true,
        None => device_node,
    }
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_max_attempts() -> usize {
    3
}

fn default_breaker_threshold() -> u32 {
    3
}

fn default_breaker_cooldown_secs() -> u64 {
    60
}

/// Registry of model backends, selected by `type` in the config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ModelConfig {
    /// Remote parser server.
    Http {
        /// Base URL, e.g. `http://localhost:30000`.
        url: String,
        /// Per-request timeout. Defaults to 120.
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
        /// Attempts per request on 5xx responses. Defaults to 3.
        #[serde(default = "default_max_attempts")]
        max_attempts: usize,
        /// Consecutive transport failures before requests fail fast. Defaults to 3.
        #[serde(default = "default_breaker_threshold")]
        breaker_threshold: u32,
        /// Seconds the breaker stays open before letting a request through.
        #[serde(default = "default_breaker_cooldown_secs")]
        breaker_cooldown_secs: u64,
    },
    /// Replays recorded beams keyed by question.
    Fixture { path: PathBuf },
}

impl ModelConfig {
    /// Prefix a relative fixture path with `root`.
    pub fn rebase(&mut self, root: &Path) {
        if let Self::Fixture { path } = self {
            if path.is_relative() {
                *path = root.join(&*path);
            }
        }
    }
}
