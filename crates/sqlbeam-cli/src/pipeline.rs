//! Inference and evaluation pipelines behind the CLI subcommands.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use indicatif::{ProgressBar, ProgressStyle};

use decode::{build_tasks, task_range, DecodeOptions, DecodeWorker};
use dispatch::{Dispatcher, PoolConfig, ProcessPool, SequentialDispatcher, Strategy};
use evaluation::{compute_metrics, ensure_scorable, SpiderScorer};
use model::{Checkpoint, ModelBackend};
use records::{RecordReader, RecordWriter, TailRepair};
use spider::{PreprocessedStore, QuestionTokenizer};

use crate::config::{
    eval_output_path, find_any_config, infer_output_path, load_experiment, resolve_logdir,
    ExperimentToml,
};
use crate::results::EvaluationFile;

/// Where the experiment config comes from, shared by the decoding commands.
#[derive(Debug, Clone)]
pub struct ConfigSource {
    /// Experiment logdir; the checkpoint lives under it.
    pub logdir: PathBuf,
    /// Explicit config file. Defaults to the first `config-*.toml` in `logdir`.
    pub config: Option<PathBuf>,
    /// JSON object merged over the config.
    pub config_args: Option<String>,
    /// Root for relative data, preprocessing and fixture paths.
    pub data_path: Option<PathBuf>,
}

impl ConfigSource {
    fn config_path(&self) -> anyhow::Result<PathBuf> {
        match &self.config {
            Some(path) => Ok(path.clone()),
            None => find_any_config(&self.logdir),
        }
    }

    fn load(&self) -> anyhow::Result<ExperimentToml> {
        let mut experiment = load_experiment(&self.config_path()?, self.config_args.as_deref())?;
        if let Some(root) = &self.data_path {
            experiment.rebase(root);
        }
        Ok(experiment)
    }

    /// Arguments that make a child `decode-worker` load the same config.
    fn worker_args(&self, step: Option<u64>, options: &DecodeOptions) -> anyhow::Result<Vec<String>> {
        let config = std::fs::canonicalize(self.config_path()?)?;
        let mut args = vec![
            "decode-worker".to_string(),
            "--logdir".to_string(),
            self.logdir.display().to_string(),
            "--config".to_string(),
            config.display().to_string(),
            "--decode-max-time-step".to_string(),
            options.decode_max_time_step.to_string(),
        ];
        if let Some(config_args) = &self.config_args {
            args.extend(["--config-args".to_string(), config_args.clone()]);
        }
        if let Some(root) = &self.data_path {
            args.extend(["--data-path".to_string(), root.display().to_string()]);
        }
        if let Some(step) = step {
            args.extend(["--step".to_string(), step.to_string()]);
        }
        if options.from_heuristic {
            args.push("--from-heuristic".to_string());
        }
        Ok(args)
    }
}

/// Arguments for the `infer` subcommand.
#[derive(Debug)]
pub struct InferArgs {
    pub source: ConfigSource,
    /// Output JSONL path. Defaults to `<logdir>/infer-<section>[-step<N>].jsonl`.
    pub output_path: Option<PathBuf>,
    pub step: Option<u64>,
    pub section: String,
    pub beam_size: usize,
    pub output_history: bool,
    pub start_offset: usize,
    pub limit: Option<usize>,
    pub nproc: usize,
    pub decode_max_time_step: usize,
    pub from_heuristic: bool,
    /// Append to an existing output file instead of truncating it.
    pub append: bool,
}

/// Arguments for the `eval` subcommand.
#[derive(Debug)]
pub struct EvalArgs {
    pub config: PathBuf,
    pub config_args: Option<String>,
    pub section: String,
    /// Inference JSONL file to score.
    pub inferred: PathBuf,
    pub logdir: Option<PathBuf>,
    pub output_path: Option<PathBuf>,
    pub evaluate_beams_individually: bool,
    pub data_path: Option<PathBuf>,
}

/// Arguments for the `preprocess` subcommand.
#[derive(Debug)]
pub struct PreprocessArgs {
    pub config: PathBuf,
    pub config_args: Option<String>,
    pub sections: Vec<String>,
    pub data_path: Option<PathBuf>,
}

/// Arguments for the `summary` subcommand.
#[derive(Debug)]
pub struct SummaryArgs {
    pub input: PathBuf,
    pub json: bool,
}

/// Arguments for the hidden `decode-worker` subcommand.
#[derive(Debug)]
pub struct DecodeWorkerArgs {
    pub source: ConfigSource,
    pub step: Option<u64>,
    pub decode_max_time_step: usize,
    pub from_heuristic: bool,
}

async fn open_worker(
    experiment: &ExperimentToml,
    checkpoint: Checkpoint,
    options: DecodeOptions,
) -> anyhow::Result<(ModelBackend, DecodeWorker)> {
    let backend = ModelBackend::open(experiment.model()?, checkpoint)
        .await
        .context("failed to open model")?;
    let worker = DecodeWorker::new(Arc::new(backend.clone()), options);
    Ok((backend, worker))
}

/// Decode a dataset section and stream one record per example to JSONL.
pub async fn run_infer(args: InferArgs) -> anyhow::Result<()> {
    let start = Instant::now();

    // 1. Load config and resolve paths
    let experiment = args.source.load()?;
    let logdir = resolve_logdir(&args.source.logdir, experiment.model_name.as_deref());
    let output = args
        .output_path
        .clone()
        .unwrap_or_else(|| infer_output_path(&logdir, &args.section, args.step));

    // 2. Load the section and its preprocessed pair
    let dataset = experiment.section(&args.section)?.load()?;
    let store = PreprocessedStore::load(&experiment.preproc.save_path, &args.section)?;
    store.ensure_paired(&dataset)?;

    let range = task_range(dataset.len(), args.start_offset, args.limit);
    let tasks = build_tasks(
        &dataset,
        &store,
        range.clone(),
        args.beam_size,
        args.output_history,
    );
    tracing::info!(
        section = %args.section,
        start = range.start,
        end = range.end,
        "Prepared decode tasks"
    );

    // 3. Pick the execution strategy and build the dispatcher
    let options = DecodeOptions {
        transition_system: experiment.preproc.transition_system,
        from_heuristic: args.from_heuristic,
        decode_max_time_step: args.decode_max_time_step,
    };
    let strategy = Strategy::probe(experiment.runtime.device, args.nproc);
    tracing::info!(strategy = strategy.name(), nproc = args.nproc, "Selected dispatch strategy");

    let mut backend = None;
    let dispatcher: Box<dyn Dispatcher> = match strategy {
        Strategy::Sequential => {
            let checkpoint = Checkpoint {
                logdir: logdir.clone(),
                step: args.step,
            };
            let (model, worker) = open_worker(&experiment, checkpoint, options).await?;
            backend = Some(model);
            Box::new(SequentialDispatcher::new(worker))
        }
        Strategy::ProcessPool { num_workers } => {
            let program = std::env::current_exe().context("failed to locate sqlbeam binary")?;
            let worker_args = args.source.worker_args(args.step, &options)?;
            Box::new(ProcessPool::spawn(PoolConfig::new(num_workers, program, worker_args)).await?)
        }
    };

    // 4. Stream records to the writer
    if !args.append && output_exists(&output) {
        tracing::warn!(path = %output.display(), "Overwriting existing inference output");
    }
    let mut writer = if args.append {
        RecordWriter::append(&output)
    } else {
        RecordWriter::create(&output)
    }
    .with_context(|| format!("failed to open {}", output.display()))?;

    let mut stream = dispatcher.map(tasks).await?;
    let pb = ProgressBar::new(stream.total() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
            .expect("valid progress bar template")
            .progress_chars("=> "),
    );

    while let Some(line) = stream.next().await {
        let index = writer.write_line(&line)?;
        pb.set_message(format!("#{index}"));
        pb.inc(1);
    }
    pb.finish_with_message("done");

    // 5. Release workers and the model
    dispatcher.shutdown().await;
    if let Some(model) = backend {
        model.close().await;
    }

    let summary = writer.finish(range)?;
    if !summary.is_complete() {
        tracing::warn!(
            missing = ?summary.missing,
            duplicates = ?summary.duplicates,
            "Inference output does not cover the requested range exactly once"
        );
    }

    let elapsed = start.elapsed();
    println!("\n--- Inference Summary ---");
    println!("Strategy: {}", strategy.name());
    println!("Records: {}", summary.written);
    println!("Failed: {}", summary.failed);
    println!("Empty beams: {}", summary.empty);
    if !summary.missing.is_empty() {
        println!("Missing indices: {:?}", summary.missing);
    }
    match &summary.repaired_tail {
        Some(TailRepair::Truncated { bytes }) => {
            println!("Dropped incomplete last line of previous run ({bytes} bytes)")
        }
        Some(TailRepair::Terminated { index }) => {
            println!("Terminated last record of previous run (index {index})")
        }
        None => {}
    }
    println!("Output: {}", output.display());
    println!("Elapsed: {:.1}s", elapsed.as_secs_f64());

    Ok(())
}

/// Score an inference file against its dataset section and write the report.
pub fn run_eval(args: EvalArgs) -> anyhow::Result<()> {
    let mut experiment = load_experiment(&args.config, args.config_args.as_deref())?;
    if let Some(root) = &args.data_path {
        experiment.rebase(root);
    }

    // Fail before touching the dataset or the inference file.
    ensure_scorable(experiment.preproc.transition_system)?;
    let output_path = match (&args.output_path, &args.logdir) {
        (Some(path), _) => path.clone(),
        (None, Some(logdir)) => eval_output_path(
            &resolve_logdir(logdir, experiment.model_name.as_deref()),
            &args.section,
        ),
        (None, None) => anyhow::bail!("eval needs --output-path or --logdir to know where to write results"),
    };
    let dataset = experiment.section(&args.section)?;

    let output = compute_metrics(
        experiment.preproc.transition_system,
        dataset,
        &args.inferred,
        args.evaluate_beams_individually,
        SpiderScorer,
    )?;
    let exact = output.exact();

    let file = EvaluationFile {
        section: args.section,
        inferred: args.inferred.display().to_string(),
        output,
    };
    file.write(&output_path)?;

    println!("Wrote eval results to {}", output_path.display());
    println!("Exact match: {exact}");
    Ok(())
}

/// Tokenize dataset sections into `<save_path>/<section>.jsonl`.
pub fn run_preprocess(args: PreprocessArgs) -> anyhow::Result<()> {
    let mut experiment = load_experiment(&args.config, args.config_args.as_deref())?;
    if let Some(root) = &args.data_path {
        experiment.rebase(root);
    }
    let tokenizer = QuestionTokenizer::from_config(&experiment.preproc.tokenizer)?;

    // Resolve every section up front so a typo fails before any work.
    let sections = args
        .sections
        .iter()
        .map(|name| experiment.section(name).map(|config| (name, config)))
        .collect::<anyhow::Result<Vec<_>>>()?;

    println!("--- Preprocess Summary ---");
    for (name, config) in sections {
        let dataset = config.load()?;
        let store = PreprocessedStore::build(&dataset, &tokenizer)?;
        let path = store.save(&experiment.preproc.save_path, name)?;
        println!("{name}: {} examples -> {}", store.len(), path.display());
    }
    Ok(())
}

/// Print statistics from an inference file.
pub fn run_summary(args: SummaryArgs) -> anyhow::Result<()> {
    let summary = RecordReader::read_summary(&args.input)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("--- Inference File Summary ---");
    println!("File: {}", args.input.display());
    println!("Total records: {}", summary.total_records);
    println!("Decoded: {}", summary.decoded);
    println!("Failed: {}", summary.failed);
    println!("Empty beams: {}", summary.empty_beams);
    println!("Malformed lines: {}", summary.malformed);
    println!("Unique indices: {}", summary.unique_indices);
    if !summary.duplicate_indices.is_empty() {
        println!("Duplicate indices: {:?}", summary.duplicate_indices);
    }
    if !summary.missing_indices.is_empty() {
        println!("Missing indices: {:?}", summary.missing_indices);
    }
    if summary.total_records > 0 {
        let rate = summary.failed as f64 / summary.total_records as f64 * 100.0;
        println!("Failure rate: {rate:.1}%");
    }

    Ok(())
}

/// Child side of the process pool: open the model, then answer task lines
/// on stdin with record lines on stdout until stdin closes.
pub async fn run_decode_worker(args: DecodeWorkerArgs) -> anyhow::Result<()> {
    let experiment = args.source.load()?;
    let logdir = resolve_logdir(&args.source.logdir, experiment.model_name.as_deref());
    let options = DecodeOptions {
        transition_system: experiment.preproc.transition_system,
        from_heuristic: args.from_heuristic,
        decode_max_time_step: args.decode_max_time_step,
    };
    let checkpoint = Checkpoint {
        logdir,
        step: args.step,
    };
    let (backend, worker) = open_worker(&experiment, checkpoint, options).await?;

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let served = dispatch::serve(&worker, stdin, tokio::io::stdout()).await?;
    tracing::debug!(served, pid = std::process::id(), "Decode worker exiting");

    backend.close().await;
    Ok(())
}

fn output_exists(path: &Path) -> bool {
    path.metadata().map(|m| m.len() > 0).unwrap_or(false)
}
