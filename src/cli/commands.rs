//! CLI command definitions for floweval.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;

use crate::acquire::Acquirer;
use crate::batch::{BatchOrchestrator, PipelineEvaluator};
use crate::report::TemplatedReporter;
use crate::roster;
use crate::sandbox::{Disabled, SandboxConfig, DEFAULT_IMAGE};
use crate::scoring::ScoringConfig;

const DEFAULT_OUTPUT_FILE: &str = "./results.jsonl";
const DEFAULT_WORKDIR: &str = "./temp_repos";
const DEFAULT_SCORING_CONFIG: &str = "./scoring.yaml";
const DEFAULT_TIMEOUT_SECS: u64 = 180;
const DEFAULT_CONCURRENCY: usize = 4;

/// Batch evaluator for data-pipeline candidate repositories.
#[derive(Parser)]
#[command(name = "floweval")]
#[command(about = "Evaluate data-pipeline repositories in a sandboxed batch run")]
#[command(version)]
#[command(
    long_about = "floweval clones each repository from a JSON Lines roster, runs its pipeline \
in a time-bounded Docker sandbox, collects bounded evidence, scores it with a deterministic \
check registry, and writes one result row per input row in input order.\n\nExample usage:\n  \
floweval evaluate --file students.jsonl --output results.jsonl --concurrency 4"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Evaluate every repository in a JSON Lines roster.
    #[command(alias = "eval")]
    Evaluate(EvaluateArgs),
}

/// Arguments for `floweval evaluate`.
#[derive(Parser, Debug)]
pub struct EvaluateArgs {
    /// Input roster: JSON Lines, one object with a `repo_url` field per row.
    #[arg(short, long)]
    pub file: PathBuf,

    /// Output file for result rows (JSON Lines, input order).
    #[arg(short, long, default_value = DEFAULT_OUTPUT_FILE)]
    pub output: PathBuf,

    /// Directory where working copies are cloned (can also be set via
    /// FLOWEVAL_WORKDIR env var).
    #[arg(short, long, env = "FLOWEVAL_WORKDIR", default_value = DEFAULT_WORKDIR)]
    pub workdir: PathBuf,

    /// Scoring config file (weights, aggregation, caps).
    #[arg(short = 'c', long, default_value = DEFAULT_SCORING_CONFIG)]
    pub scoring_config: PathBuf,

    /// Docker image the candidate pipelines run in (can also be set via
    /// FLOWEVAL_IMAGE env var).
    #[arg(long, env = "FLOWEVAL_IMAGE", default_value = DEFAULT_IMAGE)]
    pub image: String,

    /// Wall-clock budget per pipeline run, in seconds.
    #[arg(short = 't', long, default_value_t = DEFAULT_TIMEOUT_SECS)]
    pub timeout_secs: u64,

    /// Maximum repositories evaluated concurrently.
    #[arg(short = 'n', long, default_value_t = DEFAULT_CONCURRENCY)]
    pub concurrency: usize,

    /// Skip entrypoint auto-discovery and resolve run commands from the
    /// README instead.
    #[arg(long)]
    pub readme_fallback: bool,
}

/// Parse the CLI arguments without running a command.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Execute an already-parsed CLI invocation.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Evaluate(args) => run_evaluate_command(args).await,
    }
}

async fn run_evaluate_command(args: EvaluateArgs) -> anyhow::Result<()> {
    // Config problems are fatal before any repository is touched.
    let scoring = ScoringConfig::load(Some(args.scoring_config.as_path()))?;
    let rows = roster::read_rows(&args.file)?;
    if rows.is_empty() {
        info!(file = %args.file.display(), "No evaluable rows in roster; nothing to do");
        roster::write_rows(&[], &args.output)?;
        return Ok(());
    }

    info!(
        rows = rows.len(),
        image = %args.image,
        timeout_secs = args.timeout_secs,
        "Starting evaluation"
    );

    let sandbox_config = SandboxConfig::new(&args.image)
        .with_timeout(Duration::from_secs(args.timeout_secs))
        .with_transcript_cap(scoring.transcript_cap_chars)
        .with_bypass_probe(args.readme_fallback);
    let evaluator = PipelineEvaluator::new(
        Acquirer::new(&args.workdir),
        sandbox_config,
        scoring,
        Arc::new(Disabled),
        Arc::new(TemplatedReporter),
    );
    let orchestrator = BatchOrchestrator::new(Arc::new(evaluator), args.concurrency);
    let results = orchestrator.run(rows).await;

    let output_rows: Vec<_> = results.iter().map(|r| r.to_json_row()).collect();
    roster::write_rows(&output_rows, &args.output)?;

    let succeeded = results.iter().filter(|r| r.card.pipeline_runs).count();
    let mean_score = if results.is_empty() {
        0.0
    } else {
        results.iter().map(|r| r.card.final_score).sum::<f64>() / results.len() as f64
    };
    info!(
        results = results.len(),
        pipelines_ran = succeeded,
        mean_score = format!("{mean_score:.2}"),
        output = %args.output.display(),
        "Evaluation complete"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_evaluate() {
        let cli = Cli::try_parse_from([
            "floweval",
            "evaluate",
            "--file",
            "rows.jsonl",
            "--concurrency",
            "8",
            "--timeout-secs",
            "60",
        ])
        .unwrap();
        let Commands::Evaluate(args) = cli.command;
        assert_eq!(args.file, PathBuf::from("rows.jsonl"));
        assert_eq!(args.concurrency, 8);
        assert_eq!(args.timeout_secs, 60);
        assert_eq!(args.output, PathBuf::from(DEFAULT_OUTPUT_FILE));
        assert!(!args.readme_fallback);
    }

    #[test]
    fn test_cli_eval_alias_and_flags() {
        let cli = Cli::try_parse_from([
            "floweval",
            "eval",
            "--file",
            "rows.jsonl",
            "--readme-fallback",
            "--image",
            "python:3.11-slim",
        ])
        .unwrap();
        let Commands::Evaluate(args) = cli.command;
        assert!(args.readme_fallback);
        assert_eq!(args.image, "python:3.11-slim");
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(Cli::try_parse_from(["floweval", "evaluate"]).is_err());
    }

    #[test]
    fn test_image_env_fallback_and_flag_override() {
        std::env::set_var("FLOWEVAL_IMAGE", "python:3.10-slim");
        let cli =
            Cli::try_parse_from(["floweval", "evaluate", "--file", "rows.jsonl"]).unwrap();
        let Commands::Evaluate(args) = cli.command;
        assert_eq!(args.image, "python:3.10-slim");

        // An explicit flag still wins over the environment.
        let cli = Cli::try_parse_from([
            "floweval",
            "evaluate",
            "--file",
            "rows.jsonl",
            "--image",
            "python:3.12-slim",
        ])
        .unwrap();
        let Commands::Evaluate(args) = cli.command;
        assert_eq!(args.image, "python:3.12-slim");
        std::env::remove_var("FLOWEVAL_IMAGE");
    }
}
