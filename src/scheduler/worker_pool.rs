//! Fixed-size worker pool that runs the retry scheduler for every job.
//!
//! Jobs are pushed into a bounded channel shared by `min(max_workers, jobs)` workers.
//! Each job runs in its own spawned task, so a panic inside one job surfaces as a
//! `JoinError`, is recorded as that job's failure, and never takes the worker or its
//! siblings down.
//!
//! # Features
//!
//! - No ordering between jobs; results are reported in discovery order
//! - Per-job failure isolation
//! - Pool statistics tracking

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::job::{Job, JobOutcome, JobStatus};
use super::retry::RetryScheduler;

/// Statistics about the worker pool.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Total number of workers in the pool.
    pub num_workers: usize,
    /// Number of workers currently processing jobs.
    pub active_workers: usize,
    /// Jobs that reached `Complete`.
    pub jobs_completed: u64,
    /// Jobs that ended in any other state.
    pub jobs_failed: u64,
    /// Average job processing duration.
    pub average_job_duration: Duration,
}

impl PoolStats {
    /// Returns the total number of jobs processed (completed + failed).
    pub fn total_processed(&self) -> u64 {
        self.jobs_completed + self.jobs_failed
    }

    /// Returns the success rate as a percentage.
    pub fn success_rate(&self) -> f64 {
        let total = self.total_processed();
        if total == 0 {
            return 0.0;
        }
        (self.jobs_completed as f64 / total as f64) * 100.0
    }
}

/// Shared state for tracking pool statistics.
#[derive(Default)]
struct SharedPoolStats {
    jobs_completed: AtomicU64,
    jobs_failed: AtomicU64,
    total_duration_ms: AtomicU64,
    active_workers: AtomicU64,
}

impl SharedPoolStats {
    fn record_completion(&self, duration: Duration) {
        self.jobs_completed.fetch_add(1, Ordering::SeqCst);
        self.total_duration_ms
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }

    fn record_failure(&self, duration: Duration) {
        self.jobs_failed.fetch_add(1, Ordering::SeqCst);
        self.total_duration_ms
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }

    fn increment_active(&self) {
        self.active_workers.fetch_add(1, Ordering::SeqCst);
    }

    fn decrement_active(&self) {
        self.active_workers.fetch_sub(1, Ordering::SeqCst);
    }

    fn to_pool_stats(&self, num_workers: usize) -> PoolStats {
        let completed = self.jobs_completed.load(Ordering::SeqCst);
        let failed = self.jobs_failed.load(Ordering::SeqCst);
        let total_duration_ms = self.total_duration_ms.load(Ordering::SeqCst);
        let active = self.active_workers.load(Ordering::SeqCst);

        let total_jobs = completed + failed;
        let average_duration = if total_jobs > 0 {
            Duration::from_millis(total_duration_ms / total_jobs)
        } else {
            Duration::ZERO
        };

        PoolStats {
            num_workers,
            active_workers: active as usize,
            jobs_completed: completed,
            jobs_failed: failed,
            average_job_duration: average_duration,
        }
    }
}

/// Final result of a run over all jobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total: usize,
    /// Jobs that reached `Complete`.
    pub succeeded: usize,
    /// Jobs that did not.
    pub failed: usize,
    pub partially_complete: usize,
    pub exhausted: usize,
    pub results: Vec<JobOutcome>,
    pub pool: PoolStats,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunSummary {
    fn from_outcomes(
        results: Vec<JobOutcome>,
        pool: PoolStats,
        started_at: DateTime<Utc>,
    ) -> Self {
        let count = |s: JobStatus| results.iter().filter(|r| r.status == s).count();
        let succeeded = count(JobStatus::Complete);
        Self {
            total: results.len(),
            succeeded,
            failed: results.len() - succeeded,
            partially_complete: count(JobStatus::PartiallyComplete),
            exhausted: count(JobStatus::Exhausted),
            results,
            pool,
            started_at,
            finished_at: Utc::now(),
        }
    }

    /// Returns true when every job reached `Complete`.
    pub fn all_complete(&self) -> bool {
        self.failed == 0
    }

    /// Outcomes that did not reach `Complete`.
    pub fn failures(&self) -> impl Iterator<Item = &JobOutcome> {
        self.results.iter().filter(|r| !r.is_success())
    }

    /// Writes the summary as pretty-printed JSON.
    pub fn write_to(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, json)
    }
}

/// Runs the retry scheduler over many jobs with bounded parallelism.
pub struct Coordinator {
    scheduler: Arc<RetryScheduler>,
    max_workers: usize,
    stats: Arc<SharedPoolStats>,
}

impl Coordinator {
    pub fn new(scheduler: Arc<RetryScheduler>, max_workers: usize) -> Self {
        Self {
            scheduler,
            max_workers: max_workers.max(1),
            stats: Arc::new(SharedPoolStats::default()),
        }
    }

    /// Number of workers used for `job_count` jobs.
    pub fn worker_count(&self, job_count: usize) -> usize {
        self.max_workers.min(job_count)
    }

    /// Returns current pool statistics.
    pub fn stats(&self, num_workers: usize) -> PoolStats {
        self.stats.to_pool_stats(num_workers)
    }

    /// Runs every job to a terminal state and returns the summary.
    pub async fn run_all(&self, jobs: Vec<Job>) -> RunSummary {
        let started_at = Utc::now();
        let total = jobs.len();
        let num_workers = self.worker_count(total);
        if num_workers == 0 {
            return RunSummary::from_outcomes(Vec::new(), self.stats(0), started_at);
        }

        info!(jobs = total, workers = num_workers, "Starting worker pool");

        let (job_tx, job_rx) = mpsc::channel::<(usize, Job)>(total);
        for (index, job) in jobs.into_iter().enumerate() {
            // Capacity equals the job count, so this never waits.
            if job_tx.send((index, job)).await.is_err() {
                break;
            }
        }
        drop(job_tx);

        let job_rx = Arc::new(Mutex::new(job_rx));
        let (result_tx, mut result_rx) = mpsc::unbounded_channel::<(usize, JobOutcome)>();

        let handles: Vec<JoinHandle<()>> = (0..num_workers)
            .map(|i| {
                let worker = Worker {
                    id: format!("worker-{}", i),
                    jobs: Arc::clone(&job_rx),
                    results: result_tx.clone(),
                    scheduler: Arc::clone(&self.scheduler),
                    stats: Arc::clone(&self.stats),
                };
                tokio::spawn(worker.run())
            })
            .collect();
        drop(result_tx);

        let mut results: Vec<(usize, JobOutcome)> = Vec::with_capacity(total);
        while let Some(item) = result_rx.recv().await {
            results.push(item);
        }
        for joined in futures::future::join_all(handles).await {
            if let Err(e) = joined {
                error!(error = %e, "Worker task panicked");
            }
        }

        results.sort_by_key(|(index, _)| *index);
        let outcomes: Vec<JobOutcome> = results.into_iter().map(|(_, o)| o).collect();
        let summary = RunSummary::from_outcomes(outcomes, self.stats(num_workers), started_at);
        info!(
            total = summary.total,
            succeeded = summary.succeeded,
            failed = summary.failed,
            "Worker pool finished"
        );
        summary
    }
}

/// A single worker that pulls jobs until the channel is drained.
struct Worker {
    id: String,
    jobs: Arc<Mutex<mpsc::Receiver<(usize, Job)>>>,
    results: mpsc::UnboundedSender<(usize, JobOutcome)>,
    scheduler: Arc<RetryScheduler>,
    stats: Arc<SharedPoolStats>,
}

impl Worker {
    async fn run(self) {
        debug!(worker_id = %self.id, "Worker started");

        loop {
            let next = { self.jobs.lock().await.recv().await };
            let Some((index, job)) = next else {
                break;
            };
            let outcome = self.process_job(job).await;
            if self.results.send((index, outcome)).is_err() {
                break;
            }
        }

        debug!(worker_id = %self.id, "Worker stopped");
    }

    async fn process_job(&self, job: Job) -> JobOutcome {
        let job_id = job.id.clone();
        let start = Instant::now();
        self.stats.increment_active();

        let scheduler = Arc::clone(&self.scheduler);
        let outcome = match tokio::spawn(async move { scheduler.run(job).await }).await {
            Ok(state) => JobOutcome::from_state(&state),
            Err(e) => {
                error!(worker_id = %self.id, job_id = %job_id, error = %e, "Job task panicked");
                JobOutcome::failure(&job_id, format!("job task failed: {}", e))
            }
        };

        self.stats.decrement_active();
        let duration = start.elapsed();
        if outcome.is_success() {
            self.stats.record_completion(duration);
        } else {
            self.stats.record_failure(duration);
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RunnerError;
    use crate::pipeline::checklist::{Checklist, MetricSpec};
    use crate::pipeline::config::EvalConfig;
    use crate::pipeline::runner::JobExecutor;
    use crate::report::metric_report_path;
    use async_trait::async_trait;
    use std::fs;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    /// Writes a valid report for every metric, except that it panics on job "2".
    struct PanickyExecutor {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    #[async_trait]
    impl JobExecutor for PanickyExecutor {
        async fn prepare(&self, job: &Job) -> Result<(), RunnerError> {
            fs::create_dir_all(&job.report_dir)?;
            Ok(())
        }

        async fn run_job(
            &self,
            _job: &Job,
            _checklist: &Checklist,
            _round: u32,
            _retry_round: u32,
        ) -> Result<bool, RunnerError> {
            Ok(false)
        }

        async fn run_metric(
            &self,
            job: &Job,
            metric: &MetricSpec,
            _round: u32,
            _retry_round: u32,
        ) -> Result<bool, RunnerError> {
            if job.id == "2" {
                panic!("simulated crash in job 2");
            }
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            fs::write(
                metric_report_path(&job.report_dir, &metric.metric_name),
                r#"{"score": 2}"#,
            )?;
            Ok(true)
        }
    }

    fn seed_jobs(root: &Path, ids: &[&str]) -> Vec<Job> {
        ids.iter()
            .map(|id| {
                let dir = root.join(id);
                fs::create_dir_all(dir.join("evaluation")).unwrap();
                fs::write(
                    dir.join("evaluation/metric.json"),
                    r#"[{"metric": "a"}, {"metric": "b"}]"#,
                )
                .unwrap();
                Job::new(*id, dir)
            })
            .collect()
    }

    fn coordinator(max_workers: usize) -> (Coordinator, Arc<PanickyExecutor>) {
        let executor = Arc::new(PanickyExecutor {
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        });
        let scheduler = Arc::new(RetryScheduler::new(
            executor.clone(),
            EvalConfig::default().with_max_retries(1),
        ));
        (Coordinator::new(scheduler, max_workers), executor)
    }

    #[test]
    fn test_pool_stats() {
        let stats = SharedPoolStats::default();
        stats.record_completion(Duration::from_millis(100));
        stats.record_failure(Duration::from_millis(300));
        let snapshot = stats.to_pool_stats(2);
        assert_eq!(snapshot.total_processed(), 2);
        assert_eq!(snapshot.average_job_duration, Duration::from_millis(200));
        assert!((snapshot.success_rate() - 50.0).abs() < f64::EPSILON);
        assert_eq!(PoolStats::default().success_rate(), 0.0);
    }

    #[test]
    fn test_worker_count() {
        let (coordinator, _) = coordinator(4);
        assert_eq!(coordinator.worker_count(2), 2);
        assert_eq!(coordinator.worker_count(10), 4);
        assert_eq!(coordinator.worker_count(0), 0);
    }

    #[tokio::test]
    async fn test_panicking_job_is_isolated() {
        let tmp = TempDir::new().unwrap();
        let jobs = seed_jobs(tmp.path(), &["1", "2", "3"]);
        let (coordinator, _) = coordinator(3);

        let summary = coordinator.run_all(jobs).await;
        assert_eq!(summary.total, 3);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed, 1);
        assert!(!summary.all_complete());

        let ids: Vec<_> = summary.results.iter().map(|r| r.job_id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
        assert_eq!(summary.results[1].status, JobStatus::Failed);
        assert!(summary.results[1].error.as_deref().unwrap().contains("job task failed"));
        assert_eq!(summary.results[0].status, JobStatus::Complete);
        assert_eq!(summary.results[2].status, JobStatus::Complete);
        assert_eq!(summary.pool.jobs_completed, 2);
        assert_eq!(summary.pool.jobs_failed, 1);
    }

    #[tokio::test]
    async fn test_parallelism_is_bounded() {
        let tmp = TempDir::new().unwrap();
        let jobs = seed_jobs(tmp.path(), &["1", "3", "4", "5", "6"]);
        let (coordinator, executor) = coordinator(2);

        let summary = coordinator.run_all(jobs).await;
        assert!(summary.all_complete());
        assert_eq!(summary.pool.num_workers, 2);
        assert!(executor.max_in_flight.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_empty_run_and_summary_file() {
        let tmp = TempDir::new().unwrap();
        let (coordinator, _) = coordinator(4);
        let summary = coordinator.run_all(Vec::new()).await;
        assert_eq!(summary.total, 0);
        assert!(summary.all_complete());

        let path = tmp.path().join("summary.json");
        summary.write_to(&path).unwrap();
        let parsed: RunSummary =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed, summary);
    }
}
