//! CLI command definitions for judge-forge.
//!
//! This module provides the command-line surface for running evaluations,
//! checking report artifacts offline, and serving the interactive shell tools.

use crate::execution::{DrainOptions, PtySpawnConfig, SessionMultiplexer, DEFAULT_SHELL};
use crate::llm::SessionClient;
use crate::error::ConfigError;
use crate::pipeline::{load_for_project, EvalConfig, JobRunner, Settings};
use crate::report::{
    aggregate_complete, aggregate_report_path, classify_metric_report, metric_report_path,
    MetricReportState, ReportMode, ReportValidator,
};
use crate::scaffold::{Dispatcher, ExecutionContext};
use crate::scheduler::{
    discover_jobs, Coordinator, EvalMode, Job, JobStatus, RetryScheduler, RunSummary,
    REPORT_DIR_NAME,
};
use clap::Parser;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Evaluates code submissions against metric checklists through a remote agent.
#[derive(Parser)]
#[command(name = "judge-forge")]
#[command(about = "Drive agent-based evaluation of many jobs with bounded retries")]
#[command(version)]
#[command(
    long_about = "judge-forge discovers job directories, asks a remote agent to score each metric of each job's checklist, and retries only what is still missing.\n\nExample usage:\n  judge-forge run --root-path ./jobs --local-port 8000 --mode per_metric --max-workers 8"
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
    /// Evaluate every job under the root path.
    #[command(alias = "eval")]
    Run(RunArgs),

    /// Check report files or job directories without contacting the agent.
    Check(CheckArgs),

    /// Serve the interactive shell tools over JSON lines on stdin/stdout.
    Tools(ToolsArgs),
}

/// Arguments for `judge-forge run`.
#[derive(Parser, Debug, Default)]
pub struct RunArgs {
    /// YAML configuration file.
    #[arg(short = 'c', long, env = "JUDGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Port of an agent runtime on localhost.
    #[arg(short = 'p', long)]
    pub local_port: Option<u16>,

    /// Full agent runtime URL (wins over --local-port).
    #[arg(long)]
    pub base_url: Option<String>,

    /// Model name recorded with the run.
    #[arg(short = 'm', long)]
    pub model_name: Option<String>,

    /// Directory containing one subdirectory per job.
    #[arg(short = 'r', long)]
    pub root_path: Option<PathBuf>,

    /// Evaluation round number.
    #[arg(long)]
    pub round: Option<u32>,

    /// Maximum retries per job.
    #[arg(long)]
    pub retry_count: Option<u32>,

    /// Jobs evaluated concurrently.
    #[arg(short = 'w', long)]
    pub max_workers: Option<usize>,

    /// Upper bound on scheduler loop iterations per job.
    #[arg(long)]
    pub max_rounds: Option<u32>,

    /// Evaluation mode: per_metric or whole_job.
    #[arg(long)]
    pub mode: Option<EvalMode>,

    /// Comma-separated job ids to evaluate.
    #[arg(long, value_delimiter = ',')]
    pub jobs: Vec<String>,

    /// Root of per-job auxiliary evaluation assets.
    #[arg(long)]
    pub asset_root: Option<PathBuf>,

    /// Output JSON summary.
    #[arg(short = 'j', long)]
    pub json: bool,
}

impl RunArgs {
    /// Overlays flags that were given on the command line.
    pub fn apply(&self, settings: &mut Settings) {
        let eval = &mut settings.eval;
        if let Some(v) = &self.root_path {
            eval.root_path = v.clone();
        }
        if let Some(v) = self.round {
            eval.round = v;
        }
        if let Some(v) = self.retry_count {
            eval.max_retries = v;
        }
        if let Some(v) = self.max_workers {
            eval.max_workers = v;
        }
        if let Some(v) = self.max_rounds {
            eval.max_rounds = v;
        }
        if let Some(v) = self.mode {
            eval.mode = v;
        }
        if !self.jobs.is_empty() {
            eval.job_filter = self.jobs.clone();
        }
        if let Some(v) = &self.asset_root {
            eval.asset_root = Some(v.clone());
        }

        let agent = std::mem::take(&mut settings.agent);
        let mut agent = match (&self.base_url, self.local_port) {
            (Some(url), _) => agent.with_base_url(url.clone()),
            (None, Some(port)) => agent.with_local_port(port),
            (None, None) => agent,
        };
        if let Some(v) = &self.model_name {
            agent = agent.with_model_name(v.clone());
        }
        settings.agent = agent;
    }
}

/// Arguments for `judge-forge check`.
#[derive(Parser, Debug)]
pub struct CheckArgs {
    /// Report files, job directories, or a root of job directories.
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    /// YAML configuration file (segment thresholds, mode, round).
    #[arg(short = 'c', long, env = "JUDGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Evaluation mode used for job directories [default: per_metric].
    #[arg(long)]
    pub mode: Option<EvalMode>,

    /// Round whose aggregate report is checked in whole_job mode [default: 1].
    #[arg(long)]
    pub round: Option<u32>,

    /// Output JSON.
    #[arg(short = 'j', long)]
    pub json: bool,
}

impl CheckArgs {
    /// Loads the evaluation settings and overlays the flags given here.
    pub fn eval_config(&self) -> Result<EvalConfig, ConfigError> {
        let mut eval = Settings::load(self.config.as_deref())?.eval;
        self.apply(&mut eval);
        eval.validate()?;
        Ok(eval)
    }

    fn apply(&self, eval: &mut EvalConfig) {
        if let Some(mode) = self.mode {
            eval.mode = mode;
        }
        if let Some(round) = self.round {
            eval.round = round;
        }
    }
}

/// Arguments for `judge-forge tools`.
#[derive(Parser, Debug)]
pub struct ToolsArgs {
    /// Working directory for new sessions.
    #[arg(short = 'd', long, default_value = ".")]
    pub workdir: PathBuf,

    /// Shell that interprets session commands.
    #[arg(long, default_value = DEFAULT_SHELL)]
    pub shell: String,

    /// Maximum seconds per tool call.
    #[arg(long, default_value = "30")]
    pub timeout: u64,

    /// Output kept per step, in bytes.
    #[arg(long, default_value = "65536")]
    pub max_output_bytes: usize,

    /// Seconds one step waits for output.
    #[arg(long, default_value = "1")]
    pub drain_timeout: u64,

    /// Print the tool schemas and exit.
    #[arg(long)]
    pub list: bool,
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to access CLI arguments (like log_level) before running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run(args) => run_evaluation_command(args).await,
        Commands::Check(args) => run_check_command(args),
        Commands::Tools(args) => run_tools_command(args).await,
    }
}

// ============================================================================
// Run
// ============================================================================

/// Keeps the jobs named in `filter`; an empty filter keeps everything.
fn filter_jobs(jobs: Vec<Job>, filter: &[String]) -> Vec<Job> {
    if filter.is_empty() {
        return jobs;
    }
    for name in filter {
        if !jobs.iter().any(|j| &j.id == name) {
            warn!(job_id = %name, "Requested job not found under root path");
        }
    }
    jobs.into_iter()
        .filter(|j| filter.iter().any(|name| name == &j.id))
        .collect()
}

async fn run_evaluation_command(args: RunArgs) -> anyhow::Result<()> {
    let mut settings = Settings::load(args.config.as_deref())?;
    args.apply(&mut settings);
    settings.validate()?;
    let eval = settings.eval.clone();

    if !eval.root_path.is_dir() {
        return Err(anyhow::anyhow!(
            "Root path does not exist: {}",
            eval.root_path.display()
        ));
    }

    let jobs = filter_jobs(discover_jobs(&eval.root_path)?, &eval.job_filter);
    info!(
        root = %eval.root_path.display(),
        jobs = jobs.len(),
        mode = %eval.mode,
        round = eval.round,
        agent = %settings.agent.base_url,
        model = %settings.agent.model_name,
        "Starting evaluation"
    );

    let client = Arc::new(SessionClient::new(settings.agent.clone())?);
    let runner = Arc::new(JobRunner::new(
        client,
        eval.clone(),
        settings.agent.query_max_retries,
    ));
    let scheduler = Arc::new(RetryScheduler::new(runner, eval.clone()));
    let coordinator = Coordinator::new(scheduler, eval.max_workers);

    let summary = coordinator.run_all(jobs).await;
    let summary_path = eval.summary_path();
    summary.write_to(&summary_path)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary, &summary_path);
    }

    if summary.all_complete() {
        Ok(())
    } else {
        Err(anyhow::anyhow!(
            "{} of {} jobs did not complete",
            summary.total - summary.succeeded,
            summary.total
        ))
    }
}

fn print_summary(summary: &RunSummary, summary_path: &Path) {
    println!("\n=== Evaluation Results ===");
    println!("Jobs:               {}", summary.total);
    println!("Complete:           {}", summary.succeeded);
    println!("Partially complete: {}", summary.partially_complete);
    println!("Exhausted:          {}", summary.exhausted);
    println!(
        "Failed:             {}",
        summary
            .results
            .iter()
            .filter(|r| r.status == JobStatus::Failed)
            .count()
    );
    println!("Not complete:       {}", summary.failed);
    println!(
        "Avg job time:       {:.1}s",
        summary.pool.average_job_duration.as_secs_f64()
    );
    println!("Summary file:       {}", summary_path.display());
    println!();

    for r in &summary.results {
        let total = r.completed_metrics.len() + r.missing_metrics.len();
        println!(
            "  {} [{}] metrics={}/{} retries={} attempts={} time={:.1}s",
            r.job_id,
            r.status,
            r.completed_metrics.len(),
            total,
            r.retry_count,
            r.attempts,
            Duration::from_millis(r.duration_ms).as_secs_f64(),
        );
        if !r.missing_metrics.is_empty() {
            println!("    missing: {}", r.missing_metrics.join(", "));
        }
        if let Some(err) = &r.error {
            println!("    error: {err}");
        }
    }
}

// ============================================================================
// Check
// ============================================================================

/// Offline verdict for one report file or job directory.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckReport {
    pub path: PathBuf,
    pub kind: &'static str,
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grammar: Option<&'static str>,
    pub scored_entries: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub completed: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub missing: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CheckReport {
    fn new(path: &Path, kind: &'static str) -> Self {
        Self {
            path: path.to_path_buf(),
            kind,
            valid: false,
            grammar: None,
            scored_entries: 0,
            completed: Vec::new(),
            missing: Vec::new(),
            error: None,
        }
    }
}

/// Validates one report file.
///
/// `.json` files are per-metric reports and must hold one scored object;
/// anything else goes through the tolerant grammar chain, with `.jsonl` using
/// the aggregate threshold. Thresholds come from `eval`.
pub fn check_report_file(path: &Path, eval: &EvalConfig) -> CheckReport {
    let mut report = CheckReport::new(path, "report");
    let extension = path.extension().and_then(|e| e.to_str());
    if extension == Some("json") && path.is_file() {
        let state = classify_metric_report(path);
        report.grammar = Some("json");
        report.valid = state == MetricReportState::Completed;
        if report.valid {
            report.scored_entries = 1;
        } else {
            report.error = Some(format!("report is {:?}", state).to_lowercase());
        }
        return report;
    }

    let mode = match extension {
        Some("jsonl") => ReportMode::WholeJob,
        _ => ReportMode::SingleMetric,
    };
    match fs::read(path) {
        Ok(bytes) => {
            let inspection = ReportValidator::with_min_segments(eval.min_segments(mode))
                .inspect(&String::from_utf8_lossy(&bytes));
            report.valid = inspection.valid;
            report.grammar = inspection.grammar;
            report.scored_entries = inspection.scored_entries().count();
            report.error = inspection.rejection;
        }
        Err(e) => report.error = Some(e.to_string()),
    }
    report
}

/// Reports completion for one job directory in `eval.mode` and `eval.round`.
/// Never modifies the directory.
pub fn check_job_dir(project_dir: &Path, eval: &EvalConfig) -> CheckReport {
    let round = eval.round;
    let mut report = CheckReport::new(project_dir, "job");
    let checklist = match load_for_project(project_dir) {
        Ok(checklist) => checklist,
        Err(e) => {
            report.error = Some(e.to_string());
            return report;
        }
    };
    let report_dir = project_dir.join(REPORT_DIR_NAME);

    match eval.mode {
        EvalMode::WholeJob => {
            let path = aggregate_report_path(&report_dir, round);
            let min_segments = eval.min_segments(ReportMode::WholeJob);
            report.valid = aggregate_complete(&report_dir, round, min_segments);
            if report.valid {
                report.scored_entries = check_report_file(&path, eval).scored_entries;
                report.completed = checklist.names();
            } else {
                report.missing = checklist.names();
            }
        }
        EvalMode::PerMetric => {
            for name in checklist.names() {
                match classify_metric_report(&metric_report_path(&report_dir, &name)) {
                    MetricReportState::Completed => report.completed.push(name),
                    _ => report.missing.push(name),
                }
            }
            report.scored_entries = report.completed.len();
            report.valid = report.missing.is_empty();
        }
    }
    report
}

/// Expands `path` into check reports: a file, a job directory, or a root of jobs.
pub fn check_path(path: &Path, eval: &EvalConfig) -> Vec<CheckReport> {
    if path.is_file() {
        return vec![check_report_file(path, eval)];
    }
    if path.join("evaluation").is_dir() {
        return vec![check_job_dir(path, eval)];
    }
    match discover_jobs(path) {
        Ok(jobs) => jobs
            .iter()
            .map(|job| check_job_dir(&job.project_dir, eval))
            .collect(),
        Err(e) => {
            let mut report = CheckReport::new(path, "path");
            report.error = Some(e.to_string());
            vec![report]
        }
    }
}

fn run_check_command(args: CheckArgs) -> anyhow::Result<()> {
    let eval = args.eval_config()?;
    let reports: Vec<CheckReport> = args
        .paths
        .iter()
        .flat_map(|p| check_path(p, &eval))
        .collect();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        for r in &reports {
            let mark = if r.valid { "✓" } else { "✗" };
            println!("{} {} ({})", mark, r.path.display(), r.kind);
            if let Some(grammar) = r.grammar {
                println!("    grammar: {} scored entries: {}", grammar, r.scored_entries);
            }
            if !r.missing.is_empty() {
                println!("    missing: {}", r.missing.join(", "));
            }
            if let Some(err) = &r.error {
                println!("    error: {err}");
            }
        }
    }

    let invalid = reports.iter().filter(|r| !r.valid).count();
    if invalid == 0 {
        Ok(())
    } else {
        Err(anyhow::anyhow!(
            "{} of {} checks failed",
            invalid,
            reports.len()
        ))
    }
}

// ============================================================================
// Tools
// ============================================================================

async fn run_tools_command(args: ToolsArgs) -> anyhow::Result<()> {
    // Sessions start in the context's working directory.
    let spawn_config = PtySpawnConfig::default().with_shell(args.shell.clone());
    let multiplexer = Arc::new(SessionMultiplexer::new(spawn_config).with_drain_options(
        DrainOptions {
            timeout: Duration::from_secs(args.drain_timeout.max(1)),
            max_bytes: args.max_output_bytes,
            ..DrainOptions::default()
        },
    ));
    let context = ExecutionContext::new(args.workdir.clone()).with_timeout(args.timeout);
    let dispatcher = Dispatcher::new(multiplexer, context);

    if args.list {
        println!(
            "{}",
            serde_json::to_string_pretty(&dispatcher.registry().to_json_schema())?
        );
        return Ok(());
    }

    info!(workdir = %args.workdir.display(), "Serving tools on stdin/stdout");
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let stats = dispatcher.run(stdin, tokio::io::stdout()).await?;
    info!(calls = stats.calls, failures = stats.failures, "Tool session closed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use tempfile::TempDir;

    #[test]
    fn test_cli_parses() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_command_with_options() {
        let cli = Cli::try_parse_from([
            "judge-forge",
            "run",
            "--local-port",
            "9000",
            "--root-path",
            "/data/jobs",
            "--round",
            "2",
            "--retry-count",
            "5",
            "--max-workers",
            "8",
            "--mode",
            "whole_job",
            "--jobs",
            "1,7",
            "-j",
        ])
        .expect("should parse");

        let Commands::Run(args) = cli.command else {
            panic!("Expected Run command");
        };
        assert_eq!(args.local_port, Some(9000));
        assert_eq!(args.mode, Some(EvalMode::WholeJob));
        assert_eq!(args.jobs, vec!["1", "7"]);
        assert!(args.json);

        let mut settings = Settings::default();
        args.apply(&mut settings);
        assert_eq!(settings.eval.root_path, PathBuf::from("/data/jobs"));
        assert_eq!(settings.eval.round, 2);
        assert_eq!(settings.eval.max_retries, 5);
        assert_eq!(settings.eval.max_workers, 8);
        assert_eq!(settings.eval.job_filter, vec!["1", "7"]);
        assert_eq!(settings.agent.base_url, "http://localhost:9000");
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_run_defaults_leave_settings_untouched() {
        let cli = Cli::try_parse_from(["judge-forge", "run"]).expect("should parse");
        let Commands::Run(args) = cli.command else {
            panic!("Expected Run command");
        };
        let mut settings = Settings::default();
        args.apply(&mut settings);
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_base_url_wins_over_port() {
        let args = RunArgs {
            base_url: Some("http://agent:8080".to_string()),
            local_port: Some(9000),
            ..RunArgs::default()
        };
        let mut settings = Settings::default();
        args.apply(&mut settings);
        assert_eq!(settings.agent.base_url, "http://agent:8080");
    }

    #[test]
    fn test_invalid_mode_rejected() {
        assert!(Cli::try_parse_from(["judge-forge", "run", "--mode", "batch"]).is_err());
    }

    #[test]
    fn test_check_requires_paths() {
        assert!(Cli::try_parse_from(["judge-forge", "check"]).is_err());
        let cli = Cli::try_parse_from(["judge-forge", "check", "a.json"]).expect("should parse");
        let Commands::Check(args) = cli.command else {
            panic!("Expected Check command");
        };
        assert!(args.mode.is_none());
        assert!(args.round.is_none());

        let mut eval = EvalConfig::default();
        args.apply(&mut eval);
        assert_eq!(eval.mode, EvalMode::PerMetric);
        assert_eq!(eval.round, 1);

        let cli = Cli::try_parse_from([
            "judge-forge", "check", "jobs", "--mode", "whole_job", "--round", "3",
        ])
        .expect("should parse");
        let Commands::Check(args) = cli.command else {
            panic!("Expected Check command");
        };
        args.apply(&mut eval);
        assert_eq!(eval.mode, EvalMode::WholeJob);
        assert_eq!(eval.round, 3);
    }

    #[test]
    fn test_tools_defaults() {
        let cli = Cli::try_parse_from(["judge-forge", "tools"]).expect("should parse");
        let Commands::Tools(args) = cli.command else {
            panic!("Expected Tools command");
        };
        assert_eq!(args.shell, DEFAULT_SHELL);
        assert_eq!(args.timeout, 30);
        assert!(!args.list);
    }

    #[test]
    fn test_filter_jobs() {
        let jobs = vec![Job::new("1", "/j/1"), Job::new("2", "/j/2"), Job::new("3", "/j/3")];
        let kept = filter_jobs(jobs.clone(), &["3".to_string(), "9".to_string()]);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].id, "3");
        assert_eq!(filter_jobs(jobs, &[]).len(), 3);
    }

    fn write_job(root: &Path, id: &str, metrics: &[&str]) -> PathBuf {
        let dir = root.join(id);
        fs::create_dir_all(dir.join("evaluation")).unwrap();
        fs::create_dir_all(dir.join(REPORT_DIR_NAME)).unwrap();
        let checklist: Vec<serde_json::Value> = metrics
            .iter()
            .map(|m| serde_json::json!({"metric": m, "description": "d"}))
            .collect();
        fs::write(
            dir.join("evaluation/detailed_test_plan.json"),
            serde_json::to_string(&checklist).unwrap(),
        )
        .unwrap();
        dir
    }

    #[test]
    fn test_check_report_file() {
        let eval = EvalConfig::default();
        let temp = TempDir::new().unwrap();
        let good = temp.path().join("m1.json");
        fs::write(&good, r#"{"metric":"m1","score":2}"#).unwrap();
        let report = check_report_file(&good, &eval);
        assert!(report.valid);
        assert_eq!(report.scored_entries, 1);

        let bad = temp.path().join("m2.json");
        fs::write(&bad, "   ").unwrap();
        let report = check_report_file(&bad, &eval);
        assert!(!report.valid);
        assert_eq!(report.error.as_deref(), Some("report is corrupt"));
        assert!(bad.exists());

        let aggregate = temp.path().join("round1.jsonl");
        let lines: Vec<String> = (1..=3)
            .map(|i| format!(r#"{{"metric":"m{i}","score":{i}}}"#))
            .collect();
        fs::write(&aggregate, lines.join("\n")).unwrap();
        let report = check_report_file(&aggregate, &eval);
        assert!(report.valid);
        assert_eq!(report.grammar, Some("jsonl"));
        assert_eq!(report.scored_entries, 3);

        let missing = check_report_file(&temp.path().join("nope.json"), &eval);
        assert!(missing.error.is_some());
    }

    #[test]
    fn test_check_job_dir_per_metric_is_read_only() {
        let temp = TempDir::new().unwrap();
        let dir = write_job(temp.path(), "1", &["m1", "m2", "m3"]);
        let reports = dir.join(REPORT_DIR_NAME);
        fs::write(reports.join("m1.json"), r#"{"score":1}"#).unwrap();
        fs::write(reports.join("m2.json"), "{not json").unwrap();

        let report = check_job_dir(&dir, &EvalConfig::default());
        assert!(!report.valid);
        assert_eq!(report.completed, vec!["m1"]);
        assert_eq!(report.missing, vec!["m2", "m3"]);
        assert!(reports.join("m2.json").exists());
    }

    #[test]
    fn test_check_path_over_root() {
        let temp = TempDir::new().unwrap();
        let dir = write_job(temp.path(), "1", &["m1"]);
        fs::write(dir.join(REPORT_DIR_NAME).join("m1.json"), r#"{"score":1}"#).unwrap();
        write_job(temp.path(), "2", &["m1"]);

        let reports = check_path(temp.path(), &EvalConfig::default());
        assert_eq!(reports.len(), 2);
        assert!(reports[0].valid);
        assert!(!reports[1].valid);

        let whole = check_path(&dir, &EvalConfig::default().with_mode(EvalMode::WholeJob));
        assert_eq!(whole.len(), 1);
        assert!(!whole[0].valid);
        assert_eq!(whole[0].missing, vec!["m1"]);
    }

    #[test]
    fn test_check_honours_configured_thresholds() {
        let temp = TempDir::new().unwrap();
        let dir = write_job(temp.path(), "1", &["m1", "m2"]);
        let segmented = r#"{"metric":"m1","score":1} {"metric":"m2","score":2}"#;
        let aggregate = dir.join(REPORT_DIR_NAME).join("round1.jsonl");
        fs::write(&aggregate, segmented).unwrap();
        let loose = dir.join(REPORT_DIR_NAME).join("notes.txt");
        fs::write(&loose, segmented).unwrap();

        let strict = EvalConfig::default().with_mode(EvalMode::WholeJob);
        assert!(!check_job_dir(&dir, &strict).valid);
        assert!(!check_report_file(&aggregate, &strict).valid);
        assert!(!check_report_file(&loose, &strict).valid);

        let relaxed = EvalConfig {
            single_metric_min_segments: 2,
            whole_job_min_segments: 2,
            ..strict
        };
        let report = check_job_dir(&dir, &relaxed);
        assert!(report.valid);
        assert_eq!(report.completed, vec!["m1", "m2"]);
        assert_eq!(report.scored_entries, 2);
        assert!(check_report_file(&loose, &relaxed).valid);
    }
}
