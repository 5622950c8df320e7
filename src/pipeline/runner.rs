//! Job runner: drives one agent query for a job or a single metric.
//!
//! The runner reports whether the query completed at the transport level. It does
//! not judge the report the agent wrote; that is the completion tracker's job, so
//! a successful call with an unusable artifact still counts as `Ok(true)` here.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::RunnerError;
use crate::llm::AgentApi;
use crate::report::{
    aggregate_complete, aggregate_log_path, aggregate_report_path, classify_metric_report,
    metric_log_path, metric_report_path, MetricReportState,
};
use crate::scheduler::job::Job;

use super::assets::copy_job_assets;
use super::checklist::{Checklist, MetricSpec};
use super::config::EvalConfig;
use super::prompts::{render_metric_prompt, render_whole_job_prompt};

/// Mints the remote session id for one attempt.
///
/// The id is unique per `(job, metric, round, retry_round)`, so a retry never reuses
/// a session from an earlier attempt.
pub fn mint_session_id(job_id: &str, metric: Option<&str>, round: u32, retry_round: u32) -> String {
    match metric {
        Some(metric) => format!(
            "{}_{}_r{}_t{}",
            slug(job_id),
            slug(metric),
            round,
            retry_round
        ),
        None => format!("{}_r{}_t{}", slug(job_id), round, retry_round),
    }
}

/// ASCII alphanumerics pass through; every other byte becomes `-XX`.
///
/// Slugs never contain `_`, so the separators in a session id stay unambiguous.
fn slug(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        if byte.is_ascii_alphanumeric() {
            out.push(byte as char);
        } else {
            out.push_str(&format!("-{:02X}", byte));
        }
    }
    out
}

/// Work units the retry scheduler asks for.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    /// One-time setup before the checklist is read (asset copy).
    async fn prepare(&self, job: &Job) -> Result<(), RunnerError>;

    /// Evaluates the whole job in one session.
    async fn run_job(
        &self,
        job: &Job,
        checklist: &Checklist,
        round: u32,
        retry_round: u32,
    ) -> Result<bool, RunnerError>;

    /// Evaluates one metric in its own session.
    async fn run_metric(
        &self,
        job: &Job,
        metric: &MetricSpec,
        round: u32,
        retry_round: u32,
    ) -> Result<bool, RunnerError>;
}

/// Job runner backed by an [`AgentApi`].
pub struct JobRunner {
    agent: Arc<dyn AgentApi>,
    config: EvalConfig,
    query_max_retries: u32,
}

impl JobRunner {
    pub fn new(agent: Arc<dyn AgentApi>, config: EvalConfig, query_max_retries: u32) -> Self {
        Self {
            agent,
            config,
            query_max_retries,
        }
    }

    fn copy_assets(&self, job: &Job) -> Result<(), RunnerError> {
        if let Some(asset_root) = &self.config.asset_root {
            copy_job_assets(asset_root, &job.id, &job.project_dir)?;
        }
        Ok(())
    }

    /// Creates the session, sends the prompt and persists the raw response.
    async fn query_and_log(
        &self,
        session_id: &str,
        prompt: &str,
        log_path: &Path,
    ) -> Result<bool, RunnerError> {
        let created = self.agent.create_session(session_id).await;
        if let Some(err) = &created.error {
            tracing::debug!(session_id, error = %err, "Continuing without a fresh session");
        }

        let result = self
            .agent
            .query(prompt, session_id, self.query_max_retries)
            .await;

        let log_body = match &result {
            Ok(body) => body.clone(),
            Err(err) => format!("ERROR: {}", err),
        };
        fs::write(log_path, log_body)?;

        match result {
            Ok(_) => Ok(true),
            Err(err) => {
                tracing::warn!(session_id, error = %err, "Agent query failed");
                Ok(false)
            }
        }
    }
}

#[async_trait]
impl JobExecutor for JobRunner {
    async fn prepare(&self, job: &Job) -> Result<(), RunnerError> {
        self.copy_assets(job)?;
        fs::create_dir_all(&job.report_dir)?;
        Ok(())
    }

    async fn run_job(
        &self,
        job: &Job,
        checklist: &Checklist,
        round: u32,
        retry_round: u32,
    ) -> Result<bool, RunnerError> {
        let min_segments = self.config.whole_job_min_segments;
        if aggregate_complete(&job.report_dir, round, min_segments) {
            tracing::info!(job_id = %job.id, round, "Valid report exists, skipping");
            return Ok(true);
        }

        self.prepare(job).await?;

        let report_path = aggregate_report_path(&job.report_dir, round);
        let prompt = render_whole_job_prompt(
            &job.id,
            &job.project_dir,
            round,
            &checklist.metrics,
            &report_path,
        )?;
        let session_id = mint_session_id(&job.id, None, round, retry_round);

        tracing::info!(job_id = %job.id, round, retry_round, session_id = %session_id, "Running job");
        self.query_and_log(
            &session_id,
            &prompt,
            &aggregate_log_path(&job.report_dir, round),
        )
        .await
    }

    async fn run_metric(
        &self,
        job: &Job,
        metric: &MetricSpec,
        round: u32,
        retry_round: u32,
    ) -> Result<bool, RunnerError> {
        let report_path = metric_report_path(&job.report_dir, &metric.metric_name);
        if classify_metric_report(&report_path) == MetricReportState::Completed {
            tracing::info!(job_id = %job.id, metric = %metric.metric_name, "Valid report exists, skipping");
            return Ok(true);
        }

        self.prepare(job).await?;

        let rewritten = metric.rewrite_paths(&job.project_dir);
        let prompt = render_metric_prompt(&job.id, &job.project_dir, &rewritten, &report_path)?;
        let session_id = mint_session_id(&job.id, Some(&metric.metric_name), round, retry_round);

        tracing::info!(
            job_id = %job.id,
            metric = %metric.metric_name,
            retry_round,
            session_id = %session_id,
            "Running metric"
        );
        self.query_and_log(
            &session_id,
            &prompt,
            &metric_log_path(&job.report_dir, &metric.metric_name),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SessionError;
    use crate::llm::SessionCreateResult;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Agent that records every call and answers from a fixed script.
    struct ScriptedAgent {
        answer: Result<String, SessionError>,
        sessions: Mutex<Vec<String>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedAgent {
        fn new(answer: Result<String, SessionError>) -> Arc<Self> {
            Arc::new(Self {
                answer,
                sessions: Mutex::new(Vec::new()),
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl AgentApi for ScriptedAgent {
        async fn create_session(&self, session_id: &str) -> SessionCreateResult {
            self.sessions.lock().unwrap().push(session_id.to_string());
            SessionCreateResult {
                session_id: session_id.to_string(),
                deleted: false,
                created: true,
                error: None,
            }
        }

        async fn query(
            &self,
            prompt: &str,
            _session_id: &str,
            _max_retries: u32,
        ) -> Result<String, SessionError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.answer.clone()
        }
    }

    fn job_in(tmp: &TempDir) -> Job {
        let dir = tmp.path().join("1");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("main.py"), "").unwrap();
        Job::new("1", dir)
    }

    fn checklist() -> Checklist {
        Checklist {
            path: PathBuf::from("evaluation/metric.json"),
            metrics: vec![
                MetricSpec::new("1.1 run").with_testcase(Some("python main.py"), None),
                MetricSpec::new("1.2 i/o"),
            ],
        }
    }

    #[test]
    fn test_mint_session_id() {
        assert_eq!(mint_session_id("7", None, 1, 0), "7_r1_t0");
        assert_eq!(
            mint_session_id("7", Some("2.1 input/output"), 1, 2),
            "7_2-2E1-20input-2Foutput_r1_t2"
        );
        assert_ne!(
            mint_session_id("7", Some("m"), 1, 0),
            mint_session_id("7", Some("m"), 1, 1)
        );
    }

    #[test]
    fn test_session_ids_do_not_collide() {
        let ids: std::collections::HashSet<String> = [
            ("1", Some("1.1 x")),
            ("1", Some("1_1 x")),
            ("1", Some("1-1 x")),
            ("a_b", Some("c")),
            ("a", Some("b_c")),
            ("a", None),
        ]
        .iter()
        .map(|(job, metric)| mint_session_id(job, *metric, 1, 0))
        .collect();
        assert_eq!(ids.len(), 6);
        assert!(ids.contains("a_r1_t0"));
    }

    #[tokio::test]
    async fn test_run_job_writes_log_and_reports_transport_success() {
        let tmp = TempDir::new().unwrap();
        let job = job_in(&tmp);
        let agent = ScriptedAgent::new(Ok("agent transcript".to_string()));
        let runner = JobRunner::new(agent.clone(), EvalConfig::default(), 0);

        let ok = runner.run_job(&job, &checklist(), 1, 0).await.unwrap();
        assert!(ok);
        assert_eq!(
            fs::read_to_string(aggregate_log_path(&job.report_dir, 1)).unwrap(),
            "agent transcript"
        );
        assert_eq!(agent.sessions.lock().unwrap().as_slice(), ["1_r1_t0"]);
        assert!(agent.prompts.lock().unwrap()[0].contains("round1.jsonl"));
    }

    #[tokio::test]
    async fn test_run_job_failure_still_logged() {
        let tmp = TempDir::new().unwrap();
        let job = job_in(&tmp);
        let agent = ScriptedAgent::new(Err(SessionError::PermanentRemote {
            status: 500,
            body: "boom".to_string(),
        }));
        let runner = JobRunner::new(agent, EvalConfig::default(), 0);

        let ok = runner.run_job(&job, &checklist(), 2, 1).await.unwrap();
        assert!(!ok);
        let log = fs::read_to_string(aggregate_log_path(&job.report_dir, 2)).unwrap();
        assert!(log.starts_with("ERROR:"));
        assert!(log.contains("boom"));
    }

    #[tokio::test]
    async fn test_run_job_skips_valid_report() {
        let tmp = TempDir::new().unwrap();
        let job = job_in(&tmp);
        fs::create_dir_all(&job.report_dir).unwrap();
        let lines: Vec<String> = (0..2)
            .map(|i| format!(r#"{{"metric":"m{}","score":2}}"#, i))
            .collect();
        fs::write(aggregate_report_path(&job.report_dir, 1), lines.join("\n")).unwrap();

        let agent = ScriptedAgent::new(Ok(String::new()));
        let runner = JobRunner::new(agent.clone(), EvalConfig::default(), 0);
        assert!(runner.run_job(&job, &checklist(), 1, 0).await.unwrap());
        assert!(agent.sessions.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_run_metric_rewrites_paths() {
        let tmp = TempDir::new().unwrap();
        let job = job_in(&tmp);
        let agent = ScriptedAgent::new(Ok("ok".to_string()));
        let runner = JobRunner::new(agent.clone(), EvalConfig::default(), 0);

        let metric = &checklist().metrics[0];
        assert!(runner.run_metric(&job, metric, 1, 3).await.unwrap());

        let prompt = agent.prompts.lock().unwrap()[0].clone();
        let expected = format!(
            "cd {} && python {}",
            job.project_dir.display(),
            job.project_dir.join("main.py").display()
        );
        assert!(prompt.contains(&expected));
        assert_eq!(agent.sessions.lock().unwrap()[0], "1_1-2E1-20run_r1_t3");
        assert!(metric_log_path(&job.report_dir, "1.1 run").exists());
    }

    #[tokio::test]
    async fn test_run_metric_skips_completed() {
        let tmp = TempDir::new().unwrap();
        let job = job_in(&tmp);
        fs::create_dir_all(&job.report_dir).unwrap();
        fs::write(
            metric_report_path(&job.report_dir, "1.2 i/o"),
            r#"{"metric":"1.2 i/o","score":1}"#,
        )
        .unwrap();

        let agent = ScriptedAgent::new(Ok(String::new()));
        let runner = JobRunner::new(agent.clone(), EvalConfig::default(), 0);
        assert!(runner
            .run_metric(&job, &checklist().metrics[1], 1, 0)
            .await
            .unwrap());
        assert!(agent.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_prepare_copies_assets() {
        let tmp = TempDir::new().unwrap();
        let job = job_in(&tmp);
        let assets = tmp.path().join("assets");
        fs::create_dir_all(assets.join("1/evaluation")).unwrap();
        fs::write(assets.join("1/evaluation/metric.json"), "[]").unwrap();

        let config = EvalConfig::default().with_asset_root(&assets);
        let runner = JobRunner::new(ScriptedAgent::new(Ok(String::new())), config, 0);
        runner.prepare(&job).await.unwrap();

        assert!(job.project_dir.join("evaluation/metric.json").exists());
        assert!(job.report_dir.is_dir());
    }
}
