//! TOML experiment config loading for the sqlbeam CLI.
//!
//! An experiment file has `[data.<section>]`, `[preproc]`, `[model]` and
//! `[runtime]` tables. `--config-args` is a JSON object deep-merged over the
//! parsed document before typed deserialization, so registry tags are still
//! checked after overrides are applied.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use model::{DeviceConfig, ModelConfig};
use serde::Deserialize;
use spider::{DatasetConfig, PreprocConfig};

/// Top-level structure of an experiment config such as `configs/spider.toml`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExperimentToml {
    /// Appended to `--logdir` when present.
    #[serde(default)]
    pub model_name: Option<String>,
    /// Dataset sections by name (`train`, `val`, ...).
    pub data: BTreeMap<String, DatasetConfig>,
    pub preproc: PreprocConfig,
    /// Only needed by commands that decode.
    #[serde(default)]
    pub model: Option<ModelConfig>,
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub device: DeviceConfig,
}

impl ExperimentToml {
    pub fn section(&self, name: &str) -> anyhow::Result<&DatasetConfig> {
        self.data.get(name).ok_or_else(|| {
            let known: Vec<_> = self.data.keys().map(String::as_str).collect();
            anyhow::anyhow!("unknown data section '{name}' (config has: {})", known.join(", "))
        })
    }

    pub fn model(&self) -> anyhow::Result<&ModelConfig> {
        self.model
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("config has no [model] table"))
    }

    /// Prefix every relative data, preprocessing and fixture path with `root`.
    pub fn rebase(&mut self, root: &Path) {
        for section in self.data.values_mut() {
            section.rebase(root);
        }
        if self.preproc.save_path.is_relative() {
            self.preproc.save_path = root.join(&self.preproc.save_path);
        }
        if let Some(model) = &mut self.model {
            model.rebase(root);
        }
    }
}

/// Load an experiment config, applying `config_args` (a JSON object) on top.
pub fn load_experiment(path: &Path, config_args: Option<&str>) -> anyhow::Result<ExperimentToml> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let document: toml::Value = toml::from_str(&contents)
        .with_context(|| format!("failed to parse config {}", path.display()))?;
    let mut value = serde_json::to_value(document)?;

    if let Some(args) = config_args {
        let overrides: serde_json::Value =
            serde_json::from_str(args).context("--config-args is not valid JSON")?;
        anyhow::ensure!(overrides.is_object(), "--config-args must be a JSON object");
        merge_json(&mut value, overrides);
    }

    let config: ExperimentToml = serde_json::from_value(value)
        .with_context(|| format!("invalid config {}", path.display()))?;
    tracing::info!(
        path = %path.display(),
        sections = config.data.len(),
        "Loaded experiment config"
    );
    Ok(config)
}

/// Recursively merge `overlay` into `base`. Objects merge key by key; any
/// other overlay value replaces the base value.
pub fn merge_json(base: &mut serde_json::Value, overlay: serde_json::Value) {
    match (base, overlay) {
        (serde_json::Value::Object(base), serde_json::Value::Object(overlay)) => {
            for (key, value) in overlay {
                merge_json(base.entry(key).or_insert(serde_json::Value::Null), value);
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// First `config-*.toml` in `logdir`, by file name.
pub fn find_any_config(logdir: &Path) -> anyhow::Result<PathBuf> {
    let entries = std::fs::read_dir(logdir)
        .with_context(|| format!("failed to list {}", logdir.display()))?;
    let mut candidates: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with("config-") && name.ends_with(".toml"))
        })
        .collect();
    candidates.sort();
    candidates
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("no config-*.toml found in {}", logdir.display()))
}

pub fn resolve_logdir(logdir: &Path, model_name: Option<&str>) -> PathBuf {
    match model_name {
        Some(name) => logdir.join(name),
        None => logdir.to_path_buf(),
    }
}

/// `<logdir>/infer-<section>[-step<step>].jsonl`
pub fn infer_output_path(logdir: &Path, section: &str, step: Option<u64>) -> PathBuf {
    let name = match step {
        Some(step) => format!("infer-{section}-step{step}.jsonl"),
        None => format!("infer-{section}.jsonl"),
    };
    logdir.join(name)
}

/// `<logdir>/eval-<section>.json`
pub fn eval_output_path(logdir: &Path, section: &str) -> PathBuf {
    logdir.join(format!("eval-{section}.json"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use spider::{TokenizerConfig, TransitionSystem};

    const FULL: &str = r#"
model_name = "baseline"

[data.train]
name = "spider"
paths = ["data/spider/train_spider.json", "data/spider/train_others.json"]
tables_paths = ["data/spider/tables.json"]

[data.val]
name = "spider"
paths = ["data/spider/dev.json"]
tables_paths = ["data/spider/tables.json"]
db_path = "data/spider/database"

[preproc]
save_path = "data/preproc/spider"
transition_system = { name = "spider" }
tokenizer = { type = "word", langs = ["en"] }

[model]
type = "http"
url = "http://localhost:30000"
timeout_secs = 30

[runtime]
device = { type = "cpu" }
"#;

    fn write(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_deserialize_full_experiment() {
        let config: ExperimentToml = toml::from_str(FULL).unwrap();
        assert_eq!(config.model_name.as_deref(), Some("baseline"));
        assert_eq!(config.data.len(), 2);
        assert!(config.section("val").is_ok());
        assert_eq!(config.preproc.transition_system, TransitionSystem::Spider);
        assert!(matches!(config.preproc.tokenizer, TokenizerConfig::Word { .. }));
        assert!(matches!(
            config.model().unwrap(),
            ModelConfig::Http { timeout_secs: 30, max_attempts: 3, .. }
        ));
        assert_eq!(config.runtime.device, DeviceConfig::Cpu);
    }

    #[test]
    fn test_optional_tables_default() {
        let config: ExperimentToml = toml::from_str(
            r#"
[data.val]
name = "spider"
paths = ["dev.json"]
tables_paths = ["tables.json"]

[preproc]
save_path = "preproc"
"#,
        )
        .unwrap();
        assert!(config.model_name.is_none());
        assert!(config.model().is_err());
        assert_eq!(config.runtime.device, DeviceConfig::Auto);
        assert_eq!(config.preproc.transition_system, TransitionSystem::Spider);
    }

    #[test]
    fn test_unknown_section_lists_known_ones() {
        let config: ExperimentToml = toml::from_str(FULL).unwrap();
        let err = config.section("test").unwrap_err().to_string();
        assert!(err.contains("'test'"));
        assert!(err.contains("train, val"));
    }

    #[test]
    fn test_unknown_registry_tag_fails_at_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "bad.toml", &FULL.replace("type = \"http\"", "type = \"grpc\""));
        assert!(load_experiment(&path, None).is_err());
    }

    #[test]
    fn test_config_args_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "config.toml", FULL);
        let config = load_experiment(
            &path,
            Some(r#"{"model": {"type": "fixture", "path": "beams.jsonl"}, "preproc": {"transition_system": {"name": "tree"}}}"#),
        )
        .unwrap();
        assert_eq!(
            config.model,
            Some(ModelConfig::Fixture { path: "beams.jsonl".into() })
        );
        assert_eq!(config.preproc.transition_system, TransitionSystem::Tree);
        // Untouched keys of a merged table survive.
        assert_eq!(config.preproc.save_path, PathBuf::from("data/preproc/spider"));

        assert!(load_experiment(&path, Some("[1, 2]")).is_err());
        assert!(load_experiment(&path, Some("{not json")).is_err());
    }

    #[test]
    fn test_merge_json() {
        let mut base = serde_json::json!({"a": {"b": 1, "c": [1, 2]}, "d": "x"});
        merge_json(&mut base, serde_json::json!({"a": {"c": [3], "e": null}, "f": true}));
        assert_eq!(
            base,
            serde_json::json!({"a": {"b": 1, "c": [3], "e": null}, "d": "x", "f": true})
        );
    }

    #[test]
    fn test_find_any_config_picks_first_sorted() {
        let dir = tempfile::tempdir().unwrap();
        assert!(find_any_config(dir.path()).is_err());
        write(dir.path(), "config-b.toml", FULL);
        write(dir.path(), "config-a.toml", FULL);
        write(dir.path(), "other.toml", FULL);
        assert_eq!(find_any_config(dir.path()).unwrap(), dir.path().join("config-a.toml"));
    }

    #[test]
    fn test_rebase_paths() {
        let mut config: ExperimentToml = toml::from_str(FULL).unwrap();
        config.model = Some(ModelConfig::Fixture { path: "beams.jsonl".into() });
        config.rebase(Path::new("/data"));

        assert_eq!(config.preproc.save_path, PathBuf::from("/data/data/preproc/spider"));
        assert_eq!(config.model, Some(ModelConfig::Fixture { path: "/data/beams.jsonl".into() }));
        let DatasetConfig::Spider { paths, db_path, .. } = config.section("val").unwrap();
        assert_eq!(paths[0], PathBuf::from("/data/data/spider/dev.json"));
        assert_eq!(db_path.as_deref(), Some(Path::new("/data/data/spider/database")));
    }

    #[test]
    fn test_output_paths() {
        let logdir = resolve_logdir(Path::new("logs"), Some("baseline"));
        assert_eq!(logdir, PathBuf::from("logs/baseline"));
        assert_eq!(resolve_logdir(Path::new("logs"), None), PathBuf::from("logs"));
        assert_eq!(
            infer_output_path(&logdir, "val", Some(4000)),
            PathBuf::from("logs/baseline/infer-val-step4000.jsonl")
        );
        assert_eq!(
            infer_output_path(&logdir, "val", None),
            PathBuf::from("logs/baseline/infer-val.jsonl")
        );
        assert_eq!(eval_output_path(&logdir, "val"), PathBuf::from("logs/baseline/eval-val.json"));
    }
}
