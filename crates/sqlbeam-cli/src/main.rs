mod config;
mod pipeline;
pub mod results;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use pipeline::{ConfigSource, DecodeWorkerArgs, EvalArgs, InferArgs, PreprocessArgs, SummaryArgs};

/// sqlbeam: batched text-to-SQL inference and exact-match evaluation.
#[derive(Parser)]
#[command(name = "sqlbeam", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

/// Config flags shared by the commands that decode.
#[derive(Args, Debug)]
struct SourceFlags {
    /// Experiment log directory holding the checkpoint.
    #[arg(long)]
    logdir: PathBuf,
    /// Experiment config TOML. Defaults to the first config-*.toml in --logdir.
    #[arg(long)]
    config: Option<PathBuf>,
    /// JSON object merged over the config, e.g. '{"model": {"url": "..."}}'.
    #[arg(long, alias = "config_args")]
    config_args: Option<String>,
    /// Root directory for relative data, preprocessing and fixture paths.
    #[arg(long, alias = "data_path")]
    data_path: Option<PathBuf>,
}

impl From<SourceFlags> for ConfigSource {
    fn from(flags: SourceFlags) -> Self {
        Self {
            logdir: flags.logdir,
            config: flags.config,
            config_args: flags.config_args,
            data_path: flags.data_path,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Decode a dataset section and write one JSONL record per example.
    Infer {
        #[command(flatten)]
        source: SourceFlags,
        /// Output JSONL path. Defaults to <logdir>/infer-<section>[-step<N>].jsonl.
        #[arg(long, alias = "output_path")]
        output_path: Option<PathBuf>,
        /// Checkpoint step. Defaults to the latest.
        #[arg(long)]
        step: Option<u64>,
        /// Dataset section to decode.
        #[arg(long, default_value = "val")]
        section: String,
        /// Beams kept per example.
        #[arg(long, alias = "beam_size", default_value_t = 1)]
        beam_size: usize,
        /// Include per-step choice and score histories in every beam.
        #[arg(long, alias = "output_history")]
        output_history: bool,
        /// First dataset index to decode.
        #[arg(long, alias = "start_offset", default_value_t = 0)]
        start_offset: usize,
        /// Maximum number of examples to decode, starting at --start-offset.
        #[arg(long)]
        limit: Option<usize>,
        /// Number of decode processes. Ignored on accelerators.
        #[arg(long, default_value_t = 1)]
        nproc: usize,
        /// Maximum decoder steps per example.
        #[arg(long, alias = "decode_max_time_step", default_value_t = 500)]
        decode_max_time_step: usize,
        /// Drop the predicted FROM clause of trees that only reference `*`.
        #[arg(long, alias = "from_heuristic")]
        from_heuristic: bool,
        /// Append to the output file instead of truncating it (for resuming
        /// with --start-offset).
        #[arg(long)]
        append: bool,
    },
    /// Score an inference file against its dataset section.
    Eval {
        /// Experiment config TOML.
        #[arg(long)]
        config: PathBuf,
        /// JSON object merged over the config.
        #[arg(long, alias = "config_args")]
        config_args: Option<String>,
        /// Dataset section the inference file was decoded from.
        #[arg(long)]
        section: String,
        /// Inference JSONL file.
        #[arg(long)]
        inferred: PathBuf,
        /// Log directory; results go to <logdir>/eval-<section>.json.
        #[arg(long)]
        logdir: Option<PathBuf>,
        /// Explicit result path. Takes priority over --logdir.
        #[arg(long, alias = "output_path")]
        output_path: Option<PathBuf>,
        /// Score every beam and report the oracle rate.
        #[arg(long, alias = "evaluate_beams_individually")]
        evaluate_beams_individually: bool,
        /// Root directory for relative dataset paths.
        #[arg(long, alias = "data_path")]
        data_path: Option<PathBuf>,
    },
    /// Tokenize dataset sections for the model.
    Preprocess {
        /// Experiment config TOML.
        #[arg(long)]
        config: PathBuf,
        /// JSON object merged over the config.
        #[arg(long, alias = "config_args")]
        config_args: Option<String>,
        /// Sections to preprocess.
        #[arg(long, num_args = 1.., default_values_t = vec!["train".to_string(), "val".to_string()])]
        sections: Vec<String>,
        /// Root directory for relative data and output paths.
        #[arg(long, alias = "data_path")]
        data_path: Option<PathBuf>,
    },
    /// Print statistics from an inference file.
    Summary {
        /// Inference JSONL file.
        #[arg(long)]
        input: PathBuf,
        /// Output as JSON instead of human-readable text.
        #[arg(long)]
        json: bool,
    },
    /// Serve decode tasks over stdin/stdout for a parent `infer --nproc N`.
    #[command(hide = true)]
    DecodeWorker {
        #[command(flatten)]
        source: SourceFlags,
        #[arg(long)]
        step: Option<u64>,
        #[arg(long, default_value_t = 500)]
        decode_max_time_step: usize,
        #[arg(long)]
        from_heuristic: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Stdout carries records for decode workers, so logs always go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Infer {
            source,
            output_path,
            step,
            section,
            beam_size,
            output_history,
            start_offset,
            limit,
            nproc,
            decode_max_time_step,
            from_heuristic,
            append,
        } => {
            pipeline::run_infer(InferArgs {
                source: source.into(),
                output_path,
                step,
                section,
                beam_size,
                output_history,
                start_offset,
                limit,
                nproc,
                decode_max_time_step,
                from_heuristic,
                append,
            })
            .await
        }
        Command::Eval {
            config,
            config_args,
            section,
            inferred,
            logdir,
            output_path,
            evaluate_beams_individually,
            data_path,
        } => pipeline::run_eval(EvalArgs {
            config,
            config_args,
            section,
            inferred,
            logdir,
            output_path,
            evaluate_beams_individually,
            data_path,
        }),
        Command::Preprocess {
            config,
            config_args,
            sections,
            data_path,
        } => pipeline::run_preprocess(PreprocessArgs {
            config,
            config_args,
            sections,
            data_path,
        }),
        Command::Summary { input, json } => pipeline::run_summary(SummaryArgs { input, json }),
        Command::DecodeWorker {
            source,
            step,
            decode_max_time_step,
            from_heuristic,
        } => {
            pipeline::run_decode_worker(DecodeWorkerArgs {
                source: source.into(),
                step,
                decode_max_time_step,
                from_heuristic,
            })
            .await
        }
    }
}
