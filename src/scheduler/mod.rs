//! Job scheduling: bounded retries per job and bounded parallelism across jobs.
//!
//! - **Job**: job identity, discovery, per-job retry state and outcomes
//! - **RetryScheduler**: drives one job to `Complete`, `PartiallyComplete` or `Exhausted`
//! - **Coordinator**: fans jobs out over a fixed-size worker pool
//!
//! # Architecture
//!
//! ```text
//!                 ┌──────────────┐
//!                 │ discover_jobs│
//!                 └──────┬───────┘
//!                        │
//!                 ┌──────▼───────┐
//!                 │  job channel │
//!                 └──────┬───────┘
//!         ┌──────────────┼──────────────┐
//!         ▼              ▼              ▼
//!    ┌─────────┐    ┌─────────┐    ┌─────────┐
//!    │ Worker 1│    │ Worker 2│    │ Worker N│   N = min(max_workers, jobs)
//!    └────┬────┘    └────┬────┘    └────┬────┘
//!         ▼              ▼              ▼
//!    RetryScheduler → JobRunner → agent session
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use judge_forge::pipeline::{AgentConfig, EvalConfig, JobRunner};
//! use judge_forge::llm::SessionClient;
//! use judge_forge::scheduler::{discover_jobs, Coordinator, RetryScheduler};
//! use std::sync::Arc;
//!
//! let eval = EvalConfig::new().with_root_path("./jobs");
//! let client = Arc::new(SessionClient::new(AgentConfig::new().with_local_port(8000))?);
//! let runner = Arc::new(JobRunner::new(client, eval.clone(), 5));
//! let scheduler = Arc::new(RetryScheduler::new(runner, eval.clone()));
//!
//! let jobs = discover_jobs(&eval.root_path)?;
//! let summary = Coordinator::new(scheduler, eval.max_workers).run_all(jobs).await;
//! summary.write_to(&eval.summary_path())?;
//! ```

pub mod job;
pub mod retry;
pub mod worker_pool;

pub use job::{discover_jobs, EvalMode, Job, JobOutcome, JobState, JobStatus, REPORT_DIR_NAME};
pub use retry::RetryScheduler;
pub use worker_pool::{Coordinator, PoolStats, RunSummary};
