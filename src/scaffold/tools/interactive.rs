//! Interactive shell tools backed by the session multiplexer.
//!
//! `interactive_shell` starts a command in a PTY or continues an existing
//! session; `terminate_session` kills one. Both run the blocking multiplexer
//! calls on tokio's blocking pool.

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

use super::{ExecutionContext, Tool, ToolError, ToolResult};
use crate::execution::{SessionMultiplexer, StepRequest, StepResponse};

/// Default timeout for one tool call in seconds.
const DEFAULT_TIMEOUT_SECONDS: u64 = 30;

/// Prompt tails that mean the child is reading stdin. Matched against the last line.
const PROMPT_PATTERNS: [&str; 5] = [
    r"^(?:>>>|\.\.\.) ?$",
    r"[:?] $",
    r"(?i)\[y(?:es)?/n(?:o)?\]\s*$",
    r"(?i)\(y(?:es)?/n(?:o)?\)\s*$",
    r"(?i)password:\s*$",
];

/// Guesses whether drained output ends at an input prompt.
pub struct PromptDetector {
    patterns: Vec<Regex>,
}

impl Default for PromptDetector {
    fn default() -> Self {
        Self {
            patterns: PROMPT_PATTERNS
                .iter()
                .filter_map(|p| Regex::new(p).ok())
                .collect(),
        }
    }
}

impl PromptDetector {
    pub fn with_pattern(mut self, pattern: &str) -> Result<Self, regex::Error> {
        self.patterns.push(Regex::new(pattern)?);
        Ok(self)
    }

    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_waiting(&self, output: &str) -> bool {
        let last_line = output.rsplit('\n').next().unwrap_or_default();
        let last_line = last_line.rsplit('\r').next().unwrap_or_default();
        if last_line.is_empty() {
            return false;
        }
        self.patterns.iter().any(|re| re.is_match(last_line))
    }
}

/// Parameters for the interactive shell tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct InteractiveShellParams {
    /// Session to continue; absent to start a new one.
    #[serde(default)]
    session_id: Option<String>,
    /// Command to start a session with.
    #[serde(default)]
    command: Option<String>,
    /// Input for a running session.
    #[serde(default)]
    input: Option<String>,
    #[serde(default)]
    timeout_seconds: Option<u64>,
}

/// Appends a newline unless `input` already ends in one or is a control key.
fn terminate_line(input: &str) -> String {
    let is_control_key = input.chars().count() == 1 && input.chars().all(|c| c.is_control());
    if input.ends_with('\n') || is_control_key {
        input.to_string()
    } else {
        format!("{}\n", input)
    }
}

async fn run_blocking<T, F>(seconds: u64, f: F) -> Result<T, ToolError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ToolError> + Send + 'static,
{
    timeout(Duration::from_secs(seconds), tokio::task::spawn_blocking(f))
        .await
        .map_err(|_| ToolError::Timeout { seconds })?
        .map_err(|e| ToolError::ExecutionFailed(format!("Blocking task failed: {}", e)))?
}

/// Tool that starts or continues a PTY session.
pub struct InteractiveShellTool {
    multiplexer: Arc<SessionMultiplexer>,
    detector: Arc<PromptDetector>,
}

impl InteractiveShellTool {
    pub fn new(multiplexer: Arc<SessionMultiplexer>) -> Self {
        Self {
            multiplexer,
            detector: Arc::new(PromptDetector::default()),
        }
    }

    pub fn with_detector(mut self, detector: PromptDetector) -> Self {
        self.detector = Arc::new(detector);
        self
    }

    /// New sessions start in the context's working directory.
    fn request(
        params: InteractiveShellParams,
        ctx: &ExecutionContext,
    ) -> Result<StepRequest, ToolError> {
        match params.session_id {
            Some(session_id) => {
                let input = params.input.or(params.command).map(|i| terminate_line(&i));
                Ok(StepRequest {
                    session_id: Some(session_id),
                    input,
                    ..StepRequest::default()
                })
            }
            None => {
                let command = params
                    .command
                    .filter(|c| !c.trim().is_empty())
                    .ok_or_else(|| {
                        ToolError::InvalidParameters(
                            "`command` is required when no session_id is given".to_string(),
                        )
                    })?;
                Ok(StepRequest::start(command).with_cwd(ctx.working_dir.clone()))
            }
        }
    }
}

fn step_data(response: &StepResponse) -> Value {
    serde_json::json!({
        "session_id": response.session_id,
        "waiting": response.waiting,
        "finished": response.finished,
        "truncated": response.truncated,
        "exit_code": response.exit_code,
        "kind": response.kind,
    })
}

#[async_trait]
impl Tool for InteractiveShellTool {
    fn name(&self) -> &str {
        "interactive_shell"
    }

    fn description(&self) -> &str {
        "Run a command in a pseudo-terminal, or send input to a running session. Returns the output produced so far, the session_id, and whether the process is waiting for input or has finished."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "session_id": {
                    "type": "string",
                    "description": "Session returned by a previous call. Omit to start a new session."
                },
                "command": {
                    "type": "string",
                    "description": "Command to start a new session with"
                },
                "input": {
                    "type": "string",
                    "description": "Text to send to the running session; a trailing newline is added unless it is a single control character"
                },
                "timeout_seconds": {
                    "type": "integer",
                    "description": "Maximum time for this call in seconds (default: 30)",
                    "minimum": 1
                }
            }
        })
    }

    async fn execute(&self, args: Value, ctx: &ExecutionContext) -> Result<ToolResult, ToolError> {
        let params: InteractiveShellParams = serde_json::from_value(args)
            .map_err(|e| ToolError::InvalidParameters(format!("Invalid parameters: {}", e)))?;
        let seconds = params
            .timeout_seconds
            .unwrap_or(ctx.default_timeout.max(DEFAULT_TIMEOUT_SECONDS))
            .max(1);
        let request = Self::request(params, ctx)?;

        let multiplexer = Arc::clone(&self.multiplexer);
        let detector = Arc::clone(&self.detector);
        let response = run_blocking(seconds, move || {
            let mut response = multiplexer.step(request)?;
            if !response.finished {
                let waiting = if response.output.is_empty() {
                    response.waiting
                } else {
                    detector.is_waiting(&response.output)
                };
                multiplexer.set_waiting(&response.session_id, waiting)?;
                response.waiting = waiting;
            }
            Ok(response)
        })
        .await?;

        debug!(
            session_id = %response.session_id,
            waiting = response.waiting,
            finished = response.finished,
            "interactive_shell step"
        );

        let data = step_data(&response);
        let result = if response.truncated {
            ToolResult::partial(response.output, "Output truncated")
        } else {
            ToolResult::success(response.output)
        };
        Ok(result.with_data(data))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TerminateParams {
    session_id: String,
}

/// Tool that force-kills a PTY session.
pub struct TerminateSessionTool {
    multiplexer: Arc<SessionMultiplexer>,
}

impl TerminateSessionTool {
    pub fn new(multiplexer: Arc<SessionMultiplexer>) -> Self {
        Self { multiplexer }
    }
}

#[async_trait]
impl Tool for TerminateSessionTool {
    fn name(&self) -> &str {
        "terminate_session"
    }

    fn description(&self) -> &str {
        "Force-kill an interactive session and its child processes. Terminating an unknown or finished session is not an error."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "session_id": {
                    "type": "string",
                    "description": "Session to terminate"
                }
            },
            "required": ["session_id"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ExecutionContext) -> Result<ToolResult, ToolError> {
        let params: TerminateParams = serde_json::from_value(args)
            .map_err(|e| ToolError::InvalidParameters(format!("Invalid parameters: {}", e)))?;
        let session_id = params.session_id.clone();
        let multiplexer = Arc::clone(&self.multiplexer);
        let seconds = ctx.default_timeout.max(DEFAULT_TIMEOUT_SECONDS);
        let terminated = run_blocking(seconds, move || {
            multiplexer.terminate(&session_id).map_err(ToolError::from)
        })
        .await?;

        let message = if terminated {
            format!("Session {} terminated", params.session_id)
        } else {
            format!("Session {} was not running", params.session_id)
        };
        Ok(ToolResult::success(message).with_data(serde_json::json!({
            "session_id": params.session_id,
            "terminated": terminated,
        })))
    }
}
