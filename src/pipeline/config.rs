//! Evaluation and agent configuration.
//!
//! Settings are layered in this order, later layers winning:
//!
//! 1. `Default` values
//! 2. An optional YAML file (`eval:` and `agent:` sections)
//! 3. `JUDGE_*` environment variables
//! 4. CLI flags (applied by the `cli` module)

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::report::validator::{SINGLE_METRIC_MIN_SEGMENTS, WHOLE_JOB_MIN_SEGMENTS};
use crate::report::ReportMode;
use crate::scheduler::job::EvalMode;

/// Default outer cap on scheduler loop iterations per job.
pub const DEFAULT_MAX_ROUNDS: u32 = 10;

/// Configuration for the evaluation run.
#[derive(Debug, Clone, PartialEq)]
pub struct EvalConfig {
    /// Directory containing one subdirectory per job.
    pub root_path: PathBuf,
    /// Evaluation round whose reports are produced.
    pub round: u32,
    /// Whole-job or per-metric evaluation.
    pub mode: EvalMode,
    /// Retry ceiling per job (total invocations per unit is at most `max_retries + 1`).
    pub max_retries: u32,
    /// Upper bound on concurrent jobs.
    pub max_workers: usize,
    /// Outer cap on scheduler loop iterations, independent of `max_retries`.
    pub max_rounds: u32,
    /// Root of per-job auxiliary assets (`<asset_root>/<job_id>`).
    pub asset_root: Option<PathBuf>,
    /// Segment minimum for the single-metric grammar.
    pub single_metric_min_segments: usize,
    /// Segment minimum for the whole-job grammar.
    pub whole_job_min_segments: usize,
    /// Restricts the run to these job ids when non-empty.
    pub job_filter: Vec<String>,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            root_path: PathBuf::from("./jobs"),
            round: 1,
            mode: EvalMode::default(),
            max_retries: 3,
            max_workers: 4,
            max_rounds: DEFAULT_MAX_ROUNDS,
            asset_root: None,
            single_metric_min_segments: SINGLE_METRIC_MIN_SEGMENTS,
            whole_job_min_segments: WHOLE_JOB_MIN_SEGMENTS,
            job_filter: Vec::new(),
        }
    }
}

impl EvalConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Segment minimum used for the given report mode.
    pub fn min_segments(&self, mode: ReportMode) -> usize {
        match mode {
            ReportMode::SingleMetric => self.single_metric_min_segments,
            ReportMode::WholeJob => self.whole_job_min_segments,
        }
    }

    /// Path of the run summary artifact.
    pub fn summary_path(&self) -> PathBuf {
        self.root_path.join("summary.json")
    }

    /// Applies `JUDGE_*` overrides read through `lookup`.
    ///
    /// # Environment Variables
    ///
    /// - `JUDGE_ROOT_PATH`: job root directory
    /// - `JUDGE_ROUND`: evaluation round (default: 1)
    /// - `JUDGE_MODE`: `whole_job` or `per_metric` (default: per_metric)
    /// - `JUDGE_MAX_RETRIES`: retry ceiling per job (default: 3)
    /// - `JUDGE_MAX_WORKERS`: concurrent jobs (default: 4)
    /// - `JUDGE_MAX_ROUNDS`: outer loop cap (default: 10)
    /// - `JUDGE_ASSET_ROOT`: auxiliary asset root
    /// - `JUDGE_JOBS`: comma-separated job filter
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(val) = lookup("JUDGE_ROOT_PATH") {
            self.root_path = PathBuf::from(val);
        }
        if let Some(val) = lookup("JUDGE_ROUND") {
            self.round = parse_env_value(&val, "JUDGE_ROUND")?;
        }
        if let Some(val) = lookup("JUDGE_MODE") {
            self.mode = val.parse().map_err(|message| ConfigError::InvalidValue {
                key: "JUDGE_MODE".to_string(),
                message,
            })?;
        }
        if let Some(val) = lookup("JUDGE_MAX_RETRIES") {
            self.max_retries = parse_env_value(&val, "JUDGE_MAX_RETRIES")?;
        }
        if let Some(val) = lookup("JUDGE_MAX_WORKERS") {
            self.max_workers = parse_env_value(&val, "JUDGE_MAX_WORKERS")?;
        }
        if let Some(val) = lookup("JUDGE_MAX_ROUNDS") {
            self.max_rounds = parse_env_value(&val, "JUDGE_MAX_ROUNDS")?;
        }
        if let Some(val) = lookup("JUDGE_ASSET_ROOT") {
            self.asset_root = Some(PathBuf::from(val));
        }
        if let Some(val) = lookup("JUDGE_JOBS") {
            self.job_filter = split_list(&val);
        }
        Ok(())
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.root_path.as_os_str().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "root_path cannot be empty".to_string(),
            ));
        }

        if self.max_workers == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_workers must be greater than 0".to_string(),
            ));
        }

        if self.max_rounds == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_rounds must be greater than 0".to_string(),
            ));
        }

        if self.single_metric_min_segments == 0 || self.whole_job_min_segments == 0 {
            return Err(ConfigError::ValidationFailed(
                "min_segments thresholds must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn with_root_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.root_path = path.into();
        self
    }

    pub fn with_round(mut self, round: u32) -> Self {
        self.round = round;
        self
    }

    pub fn with_mode(mut self, mode: EvalMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }

    pub fn with_max_workers(mut self, max: usize) -> Self {
        self.max_workers = max;
        self
    }

    pub fn with_max_rounds(mut self, max: u32) -> Self {
        self.max_rounds = max;
        self
    }

    pub fn with_asset_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.asset_root = Some(path.into());
        self
    }

    pub fn with_job_filter(mut self, jobs: Vec<String>) -> Self {
        self.job_filter = jobs;
        self
    }
}

/// Configuration for the remote agent runtime.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentConfig {
    /// Base URL of the agent runtime, e.g. `http://localhost:8000`.
    pub base_url: String,
    /// Application name in session paths and query bodies.
    pub app_name: String,
    /// User id in session paths and query bodies.
    pub user_id: String,
    /// Model the remote agent is expected to run. Informational.
    pub model_name: String,
    /// Per-request timeout.
    pub request_timeout: Duration,
    /// Sleep before retrying a quota-limited query.
    pub quota_backoff: Duration,
    /// Sleep before retrying after a connection-level failure.
    pub transport_backoff: Duration,
    /// Retries allowed per query on transient failures.
    pub query_max_retries: u32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            base_url: local_url(8000),
            app_name: "judge_agent".to_string(),
            user_id: "judge".to_string(),
            model_name: "default".to_string(),
            request_timeout: Duration::from_secs(3600),
            quota_backoff: Duration::from_secs(3),
            transport_backoff: Duration::from_secs(2),
            query_max_retries: 5,
        }
    }
}

impl AgentConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies `JUDGE_*` overrides read through `lookup`.
    ///
    /// # Environment Variables
    ///
    /// - `JUDGE_AGENT_URL`: agent base URL
    /// - `JUDGE_LOCAL_PORT`: port on localhost (ignored when `JUDGE_AGENT_URL` is set)
    /// - `JUDGE_APP_NAME`, `JUDGE_USER_ID`, `JUDGE_MODEL_NAME`
    /// - `JUDGE_REQUEST_TIMEOUT_SECS` (default: 3600)
    /// - `JUDGE_QUOTA_BACKOFF_MS` (default: 3000)
    /// - `JUDGE_TRANSPORT_BACKOFF_MS` (default: 2000)
    /// - `JUDGE_QUERY_MAX_RETRIES` (default: 5)
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(val) = lookup("JUDGE_AGENT_URL") {
            self.base_url = val;
        } else if let Some(val) = lookup("JUDGE_LOCAL_PORT") {
            let port: u16 = parse_env_value(&val, "JUDGE_LOCAL_PORT")?;
            self.base_url = local_url(port);
        }
        if let Some(val) = lookup("JUDGE_APP_NAME") {
            self.app_name = val;
        }
        if let Some(val) = lookup("JUDGE_USER_ID") {
            self.user_id = val;
        }
        if let Some(val) = lookup("JUDGE_MODEL_NAME") {
            self.model_name = val;
        }
        if let Some(val) = lookup("JUDGE_REQUEST_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "JUDGE_REQUEST_TIMEOUT_SECS")?;
            self.request_timeout = Duration::from_secs(secs);
        }
        if let Some(val) = lookup("JUDGE_QUOTA_BACKOFF_MS") {
            let ms: u64 = parse_env_value(&val, "JUDGE_QUOTA_BACKOFF_MS")?;
            self.quota_backoff = Duration::from_millis(ms);
        }
        if let Some(val) = lookup("JUDGE_TRANSPORT_BACKOFF_MS") {
            let ms: u64 = parse_env_value(&val, "JUDGE_TRANSPORT_BACKOFF_MS")?;
            self.transport_backoff = Duration::from_millis(ms);
        }
        if let Some(val) = lookup("JUDGE_QUERY_MAX_RETRIES") {
            self.query_max_retries = parse_env_value(&val, "JUDGE_QUERY_MAX_RETRIES")?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_url.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "base_url cannot be empty".to_string(),
            ));
        }

        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(ConfigError::ValidationFailed(format!(
                "base_url must start with http:// or https://, got '{}'",
                self.base_url
            )));
        }

        if self.app_name.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "app_name cannot be empty".to_string(),
            ));
        }

        if self.user_id.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "user_id cannot be empty".to_string(),
            ));
        }

        if self.request_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "request_timeout must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Points the client at `http://localhost:{port}`.
    pub fn with_local_port(mut self, port: u16) -> Self {
        self.base_url = local_url(port);
        self
    }

    pub fn with_app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    pub fn with_user_id(mut self, user: impl Into<String>) -> Self {
        self.user_id = user.into();
        self
    }

    pub fn with_model_name(mut self, model: impl Into<String>) -> Self {
        self.model_name = model.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets both retry backoffs.
    pub fn with_backoffs(mut self, quota: Duration, transport: Duration) -> Self {
        self.quota_backoff = quota;
        self.transport_backoff = transport;
        self
    }

    pub fn with_query_max_retries(mut self, max: u32) -> Self {
        self.query_max_retries = max;
        self
    }
}

/// Both configuration halves, as loaded for one run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Settings {
    pub eval: EvalConfig,
    pub agent: AgentConfig,
}

impl Settings {
    /// Loads defaults, then the YAML file if given, then the process environment.
    ///
    /// Validation is left to the caller so CLI overrides can be applied first.
    pub fn load(config_file: Option<&Path>) -> Result<Self, ConfigError> {
        let mut settings = Self::default();
        if let Some(path) = config_file {
            settings.apply_file(&ConfigFile::from_path(path)?);
        }
        settings.apply_env(|key| std::env::var(key).ok())?;
        Ok(settings)
    }

    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        self.eval.apply_env(&lookup)?;
        self.agent.apply_env(&lookup)
    }

    /// Overlays every value present in the file.
    pub fn apply_file(&mut self, file: &ConfigFile) {
        let eval = &file.eval;
        let cfg = &mut self.eval;
        if let Some(v) = &eval.root_path {
            cfg.root_path = v.clone();
        }
        if let Some(v) = eval.round {
            cfg.round = v;
        }
        if let Some(v) = eval.mode {
            cfg.mode = v;
        }
        if let Some(v) = eval.max_retries {
            cfg.max_retries = v;
        }
        if let Some(v) = eval.max_workers {
            cfg.max_workers = v;
        }
        if let Some(v) = eval.max_rounds {
            cfg.max_rounds = v;
        }
        if let Some(v) = &eval.asset_root {
            cfg.asset_root = Some(v.clone());
        }
        if let Some(v) = eval.single_metric_min_segments {
            cfg.single_metric_min_segments = v;
        }
        if let Some(v) = eval.whole_job_min_segments {
            cfg.whole_job_min_segments = v;
        }
        if let Some(v) = &eval.jobs {
            cfg.job_filter = v.clone();
        }

        let agent = &file.agent;
        let cfg = &mut self.agent;
        if let Some(v) = &agent.base_url {
            cfg.base_url = v.clone();
        } else if let Some(port) = agent.local_port {
            cfg.base_url = local_url(port);
        }
        if let Some(v) = &agent.app_name {
            cfg.app_name = v.clone();
        }
        if let Some(v) = &agent.user_id {
            cfg.user_id = v.clone();
        }
        if let Some(v) = &agent.model_name {
            cfg.model_name = v.clone();
        }
        if let Some(v) = agent.request_timeout_secs {
            cfg.request_timeout = Duration::from_secs(v);
        }
        if let Some(v) = agent.quota_backoff_ms {
            cfg.quota_backoff = Duration::from_millis(v);
        }
        if let Some(v) = agent.transport_backoff_ms {
            cfg.transport_backoff = Duration::from_millis(v);
        }
        if let Some(v) = agent.query_max_retries {
            cfg.query_max_retries = v;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.eval.validate()?;
        self.agent.validate()
    }
}

/// On-disk YAML configuration. Every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    pub eval: EvalSection,
    pub agent: AgentSection,
}

impl ConfigFile {
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EvalSection {
    pub root_path: Option<PathBuf>,
    pub round: Option<u32>,
    pub mode: Option<EvalMode>,
    pub max_retries: Option<u32>,
    pub max_workers: Option<usize>,
    pub max_rounds: Option<u32>,
    pub asset_root: Option<PathBuf>,
    pub single_metric_min_segments: Option<usize>,
    pub whole_job_min_segments: Option<usize>,
    pub jobs: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AgentSection {
    pub base_url: Option<String>,
    pub local_port: Option<u16>,
    pub app_name: Option<String>,
    pub user_id: Option<String>,
    pub model_name: Option<String>,
    pub request_timeout_secs: Option<u64>,
    pub quota_backoff_ms: Option<u64>,
    pub transport_backoff_ms: Option<u64>,
    pub query_max_retries: Option<u32>,
}

fn local_url(port: u16) -> String {
    format!("http://localhost:{}", port)
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Parse an environment variable value into a type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}
