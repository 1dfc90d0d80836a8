//! The evaluation result file written by `sqlbeam eval`.

use std::path::Path;

use anyhow::Context;
use evaluation::EvaluationOutput;
use serde::{Deserialize, Serialize};

/// One evaluation run: which section and inference file were scored, and the
/// report itself (flattened, so `per_item` and `total_scores` sit at the top
/// level).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationFile {
    pub section: String,
    /// Path of the scored inference file.
    pub inferred: String,
    #[serde(flatten)]
    pub output: EvaluationOutput,
}

impl EvaluationFile {
    pub fn write(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .with_context(|| format!("failed to write eval results to {}", path.display()))?;
        Ok(())
    }
}
