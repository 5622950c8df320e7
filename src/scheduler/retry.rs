//! Bounded retry loop around the job runner.
//!
//! Per job the scheduler moves `Pending -> Running` and then loops:
//!
//! 1. run the incomplete work (the whole job, or each missing metric in checklist order)
//! 2. re-check completion on disk
//! 3. if still incomplete and retries remain, delete the stale artifacts of the
//!    incomplete subset, consume one retry and go again
//!
//! A unit of work is therefore invoked at most `max_retries + 1` times. The loop is
//! additionally capped at `max_rounds` iterations so a job always terminates.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::pipeline::checklist::{load_for_project, Checklist};
use crate::pipeline::config::EvalConfig;
use crate::pipeline::runner::JobExecutor;
use crate::report::{
    aggregate_complete, completed_metrics, remove_stale_aggregate_artifacts,
    remove_stale_metric_artifacts,
};

use super::job::{EvalMode, Job, JobState, JobStatus};

/// Drives one job to a terminal state.
pub struct RetryScheduler {
    executor: Arc<dyn JobExecutor>,
    config: EvalConfig,
}

impl RetryScheduler {
    pub fn new(executor: Arc<dyn JobExecutor>, config: EvalConfig) -> Self {
        Self { executor, config }
    }

    pub fn config(&self) -> &EvalConfig {
        &self.config
    }

    /// Runs `job` until it is complete, out of retries, or out of rounds.
    ///
    /// Never returns an error: failures end up in the returned state.
    pub async fn run(&self, job: Job) -> JobState {
        let mut state = JobState::new(job, self.config.max_retries);
        state.start();
        info!(job_id = %state.job.id, mode = %self.config.mode, "Job started");

        if let Err(e) = self.executor.prepare(&state.job).await {
            warn!(job_id = %state.job.id, error = %e, "Job preparation failed");
            state.last_error = Some(e.to_string());
            state.finish(JobStatus::Failed);
            return state;
        }

        let checklist = match load_for_project(&state.job.project_dir) {
            Ok(checklist) => checklist,
            Err(e) => {
                warn!(job_id = %state.job.id, error = %e, "Checklist unavailable");
                state.last_error = Some(e.to_string());
                state.finish(JobStatus::Failed);
                return state;
            }
        };

        match self.config.mode {
            EvalMode::WholeJob => self.run_whole_job(&mut state, &checklist).await,
            EvalMode::PerMetric => self.run_per_metric(&mut state, &checklist).await,
        }

        info!(
            job_id = %state.job.id,
            status = %state.status,
            retry_count = state.retry_count,
            attempts = state.attempts,
            completed = state.completed.len(),
            missing = state.missing.len(),
            "Job finished"
        );
        state
    }

    async fn run_whole_job(&self, state: &mut JobState, checklist: &Checklist) {
        let round = self.config.round;
        let min_segments = self.config.whole_job_min_segments;
        let report_dir = state.job.report_dir.clone();
        let names = checklist.names();

        if aggregate_complete(&report_dir, round, min_segments) {
            info!(job_id = %state.job.id, round, "Report already valid, skipping");
            state.completed = names.into_iter().collect();
            state.finish(JobStatus::Complete);
            return;
        }

        loop {
            state.loop_rounds += 1;
            state.attempts += 1;
            let retry_round = state.retry_count;

            match self
                .executor
                .run_job(&state.job, checklist, round, retry_round)
                .await
            {
                Ok(true) => {}
                Ok(false) => {
                    state.last_error = Some(format!(
                        "agent query failed on attempt {} (see round{}.log)",
                        state.attempts, round
                    ));
                }
                Err(e) => state.last_error = Some(e.to_string()),
            }

            if aggregate_complete(&report_dir, round, min_segments) {
                state.completed = names.iter().cloned().collect();
                state.missing.clear();
                state.last_error = None;
                state.finish(JobStatus::Complete);
                return;
            }

            if !self.may_continue(state) {
                state.missing = names.clone();
                let attempts = state.attempts;
                state
                    .last_error
                    .get_or_insert_with(|| format!("no valid report after {} attempts", attempts));
                state.finish(JobStatus::Exhausted);
                return;
            }

            match remove_stale_aggregate_artifacts(&report_dir, round, min_segments) {
                Ok(removed) if !removed.is_empty() => {
                    debug!(job_id = %state.job.id, removed = removed.len(), "Removed stale aggregate artifacts");
                }
                Ok(_) => {}
                Err(e) => warn!(job_id = %state.job.id, error = %e, "Failed to remove stale artifacts"),
            }
            state.increment_retry();
            info!(job_id = %state.job.id, retry = state.retry_count, "Retrying job");
        }
    }

    async fn run_per_metric(&self, state: &mut JobState, checklist: &Checklist) {
        let round = self.config.round;
        let report_dir = state.job.report_dir.clone();
        let names = checklist.names();

        self.refresh_completion(state, &names);
        if state.missing.is_empty() {
            info!(job_id = %state.job.id, "All metrics already scored, skipping");
            state.finish(JobStatus::Complete);
            return;
        }

        loop {
            state.loop_rounds += 1;
            let retry_round = state.retry_count;

            for name in state.missing.clone() {
                let Some(metric) = checklist.get(&name) else {
                    continue;
                };
                state.attempts += 1;
                match self
                    .executor
                    .run_metric(&state.job, metric, round, retry_round)
                    .await
                {
                    Ok(true) => {}
                    Ok(false) => {
                        state.last_error = Some(format!("agent query failed for metric '{}'", name));
                    }
                    Err(e) => {
                        warn!(job_id = %state.job.id, metric = %name, error = %e, "Metric run failed");
                        state.last_error = Some(format!("metric '{}': {}", name, e));
                    }
                }
            }

            self.refresh_completion(state, &names);
            if state.missing.is_empty() {
                state.last_error = None;
                state.finish(JobStatus::Complete);
                return;
            }

            if !self.may_continue(state) {
                let summary = format!(
                    "{} metric(s) without a valid report after {} retries",
                    state.missing.len(),
                    state.retry_count
                );
                state.last_error.get_or_insert(summary);
                let status = if state.completed.is_empty() {
                    JobStatus::Exhausted
                } else {
                    JobStatus::PartiallyComplete
                };
                state.finish(status);
                return;
            }

            for name in &state.missing {
                if let Err(e) = remove_stale_metric_artifacts(&report_dir, name) {
                    warn!(job_id = %state.job.id, metric = %name, error = %e, "Failed to remove stale artifacts");
                }
            }
            state.increment_retry();
            info!(
                job_id = %state.job.id,
                retry = state.retry_count,
                missing = state.missing.len(),
                "Retrying incomplete metrics"
            );
        }
    }

    /// Recomputes the completed set and the missing list (in checklist order).
    fn refresh_completion(&self, state: &mut JobState, names: &[String]) {
        let done: BTreeSet<String> = completed_metrics(&state.job.report_dir, names);
        state.missing = names
            .iter()
            .filter(|n| !done.contains(*n))
            .cloned()
            .collect();
        state.completed = done;
    }

    fn may_continue(&self, state: &JobState) -> bool {
        if !state.should_retry() {
            info!(job_id = %state.job.id, retry_count = state.retry_count, "Retry budget exhausted");
            return false;
        }
        if state.loop_rounds >= self.config.max_rounds {
            warn!(job_id = %state.job.id, rounds = state.loop_rounds, "Round cap reached");
            return false;
        }
        true
    }
}
