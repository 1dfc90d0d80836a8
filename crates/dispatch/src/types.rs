use std::path::PathBuf;

use model::DeviceConfig;
use serde::{Deserialize, Serialize};

/// Errors that can occur while dispatching decode tasks.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// A decode worker process exited unexpectedly.
    #[error("decode worker process exited unexpectedly")]
    ProcessDied,

    /// A decode worker did not become ready in time.
    #[error("decode worker did not start within {0}s")]
    Timeout(u64),

    /// Unexpected output or invalid pool state.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// IO error from process communication.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// How decode tasks are executed, decided once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Strategy {
    /// One model instance in this process, one task at a time.
    Sequential,
    /// `num_workers` child processes, each with its own model replica.
    ProcessPool { num_workers: usize },
}

impl Strategy {
    /// Pick a strategy from the device and the requested process count.
    ///
    /// Accelerators keep a single in-process model; forking replicas onto one
    /// GPU is not supported.
    pub fn probe(device: DeviceConfig, nproc: usize) -> Self {
        let device = device.resolve();
        if device.is_accelerator() || nproc <= 1 {
            Self::Sequential
        } else {
            Self::ProcessPool { num_workers: nproc }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Sequential => "sequential",
            Self::ProcessPool { .. } => "process_pool",
        }
    }
}

fn default_startup_timeout() -> u64 {
    300
}

fn default_channel_capacity() -> usize {
    64
}

/// Configuration for a [`ProcessPool`](crate::ProcessPool).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Number of worker processes.
    pub num_workers: usize,

    /// Executable to spawn for each worker.
    pub program: PathBuf,

    /// Arguments passed to every worker.
    #[serde(default)]
    pub args: Vec<String>,

    /// Seconds to wait for a worker's `ready.` line. Loading a model can be
    /// slow, so this defaults to 300.
    #[serde(default = "default_startup_timeout")]
    pub startup_timeout_secs: u64,

    /// Bound on finished records waiting for the writer.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl PoolConfig {
    pub fn new(num_workers: usize, program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            num_workers,
            program: program.into(),
            args,
            startup_timeout_secs: default_startup_timeout(),
            channel_capacity: default_channel_capacity(),
        }
    }
}
