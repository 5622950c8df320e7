//! Job definitions for the scheduler.
//!
//! This module defines the core job types used by the retry scheduler and the
//! parallel coordinator:
//!
//! - `Job`: one submission directory under evaluation
//! - `JobState`: per-job retry bookkeeping owned by the retry scheduler
//! - `JobStatus`: lifecycle state of a job
//! - `JobOutcome`: serializable per-job result surfaced in the run summary
//! - `EvalMode`: whole-job aggregate report or per-metric reports

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::report::ReportMode;

/// Name of the per-job report directory.
pub const REPORT_DIR_NAME: &str = "reports";

/// How a job is evaluated and how its reports are laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvalMode {
    /// One query per job, aggregate `reports/round{N}.jsonl`.
    WholeJob,
    /// One query per metric, `reports/{metric}.json` each.
    #[default]
    PerMetric,
}

impl EvalMode {
    /// Report grammar mode matching this evaluation mode.
    pub fn report_mode(self) -> ReportMode {
        match self {
            EvalMode::WholeJob => ReportMode::WholeJob,
            EvalMode::PerMetric => ReportMode::SingleMetric,
        }
    }
}

impl fmt::Display for EvalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvalMode::WholeJob => write!(f, "whole_job"),
            EvalMode::PerMetric => write!(f, "per_metric"),
        }
    }
}

impl FromStr for EvalMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "whole_job" | "job" | "whole" => Ok(EvalMode::WholeJob),
            "per_metric" | "metric" => Ok(EvalMode::PerMetric),
            other => Err(format!(
                "unknown evaluation mode '{}', expected whole_job or per_metric",
                other
            )),
        }
    }
}

/// One code submission under evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    /// Job identifier (the directory name under the root path).
    pub id: String,
    /// Submission source tree.
    pub project_dir: PathBuf,
    /// Directory holding score reports and transport logs.
    pub report_dir: PathBuf,
}

impl Job {
    /// Creates a job rooted at `project_dir`, with reports under `project_dir/reports`.
    pub fn new(id: impl Into<String>, project_dir: impl Into<PathBuf>) -> Self {
        let project_dir = project_dir.into();
        let report_dir = project_dir.join(REPORT_DIR_NAME);
        Self {
            id: id.into(),
            project_dir,
            report_dir,
        }
    }

    /// Overrides the report directory.
    pub fn with_report_dir(mut self, report_dir: impl Into<PathBuf>) -> Self {
        self.report_dir = report_dir.into();
        self
    }
}

/// Discovers jobs as the immediate, non-hidden subdirectories of `root`.
///
/// Jobs are returned sorted by name, with digit runs compared numerically so `2`
/// sorts before `10`.
pub fn discover_jobs(root: &Path) -> io::Result<Vec<Job>> {
    let mut jobs = Vec::new();
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }
        jobs.push(Job::new(name, entry.path()));
    }
    jobs.sort_by(|a, b| natural_cmp(&a.id, &b.id));
    Ok(jobs)
}

/// Compares two names treating runs of ASCII digits as numbers.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut ai = a.chars().peekable();
    let mut bi = b.chars().peekable();

    loop {
        match (ai.peek().copied(), bi.peek().copied()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) if x.is_ascii_digit() && y.is_ascii_digit() => {
                let na = take_digits(&mut ai);
                let nb = take_digits(&mut bi);
                let ta = na.trim_start_matches('0');
                let tb = nb.trim_start_matches('0');
                let ord = ta
                    .len()
                    .cmp(&tb.len())
                    .then_with(|| ta.cmp(tb))
                    .then_with(|| na.len().cmp(&nb.len()));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            (Some(x), Some(y)) => {
                if x != y {
                    return x.cmp(&y);
                }
                ai.next();
                bi.next();
            }
        }
    }
}

fn take_digits(it: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    let mut out = String::new();
    while let Some(c) = it.peek().copied() {
        if !c.is_ascii_digit() {
            break;
        }
        out.push(c);
        it.next();
    }
    out
}

/// Lifecycle state of a job in the retry scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Not yet scheduled.
    Pending,
    /// Inside the retry loop.
    Running,
    /// Every metric (or the aggregate report) is validly scored.
    Complete,
    /// Retries ran out with some, but not all, metrics scored.
    PartiallyComplete,
    /// Retries ran out with nothing usable.
    Exhausted,
    /// The job could not be evaluated at all (missing checklist, worker panic).
    Failed,
}

impl JobStatus {
    /// Returns true for states the scheduler never leaves.
    pub fn is_terminal(self) -> bool {
        !matches!(self, JobStatus::Pending | JobStatus::Running)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Complete => write!(f, "complete"),
            JobStatus::PartiallyComplete => write!(f, "partially_complete"),
            JobStatus::Exhausted => write!(f, "exhausted"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Retry bookkeeping for one job. Owned by the retry scheduler for that job.
#[derive(Debug, Clone)]
pub struct JobState {
    pub job: Job,
    /// Retries consumed so far. Never exceeds `max_retries`.
    pub retry_count: u32,
    pub max_retries: u32,
    pub status: JobStatus,
    /// Total runner invocations (job queries or metric queries).
    pub attempts: u32,
    /// Loop iterations, bounded by the outer round cap.
    pub loop_rounds: u32,
    pub completed: BTreeSet<String>,
    pub missing: Vec<String>,
    pub last_error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobState {
    pub fn new(job: Job, max_retries: u32) -> Self {
        Self {
            job,
            retry_count: 0,
            max_retries,
            status: JobStatus::Pending,
            attempts: 0,
            loop_rounds: 0,
            completed: BTreeSet::new(),
            missing: Vec::new(),
            last_error: None,
            started_at: None,
            finished_at: None,
        }
    }

    /// Transitions `Pending -> Running`.
    pub fn start(&mut self) {
        if self.status == JobStatus::Pending {
            self.status = JobStatus::Running;
            self.started_at = Some(Utc::now());
        }
    }

    /// Returns whether another retry is allowed.
    pub fn should_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Returns the number of remaining retries.
    pub fn remaining_retries(&self) -> u32 {
        self.max_retries.saturating_sub(self.retry_count)
    }

    /// Consumes one retry. Saturates at `max_retries`.
    pub fn increment_retry(&mut self) {
        if self.retry_count < self.max_retries {
            self.retry_count += 1;
        }
    }

    /// Enters a terminal state.
    pub fn finish(&mut self, status: JobStatus) {
        self.status = status;
        self.finished_at = Some(Utc::now());
    }

    /// Wall-clock time spent in the scheduler, if started.
    pub fn elapsed(&self) -> Option<Duration> {
        let start = self.started_at?;
        let end = self.finished_at.unwrap_or_else(Utc::now);
        (end - start).to_std().ok()
    }
}

/// Result of one job, as reported by the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobOutcome {
    pub job_id: String,
    pub status: JobStatus,
    pub retry_count: u32,
    pub attempts: u32,
    #[serde(default)]
    pub completed_metrics: Vec<String>,
    #[serde(default)]
    pub missing_metrics: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl JobOutcome {
    /// Builds an outcome from a finished job state.
    pub fn from_state(state: &JobState) -> Self {
        Self {
            job_id: state.job.id.clone(),
            status: state.status,
            retry_count: state.retry_count,
            attempts: state.attempts,
            completed_metrics: state.completed.iter().cloned().collect(),
            missing_metrics: state.missing.clone(),
            error: state.last_error.clone(),
            duration_ms: state
                .elapsed()
                .map(|d| d.as_millis() as u64)
                .unwrap_or_default(),
        }
    }

    /// Builds a failed outcome for a job that never produced a state.
    pub fn failure(job_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            status: JobStatus::Failed,
            retry_count: 0,
            attempts: 0,
            completed_metrics: Vec::new(),
            missing_metrics: Vec::new(),
            error: Some(error.into()),
            duration_ms: 0,
        }
    }

    /// Returns true if the job reached `Complete`.
    pub fn is_success(&self) -> bool {
        self.status == JobStatus::Complete
    }
}
