//! Tool definitions and registry for the agent-facing tool surface.
//!
//! This module defines the `Tool` trait and provides a registry for managing
//! the tools a remote agent can invoke against a job's codebase.

pub mod interactive;

pub use interactive::{InteractiveShellTool, PromptDetector, TerminateSessionTool};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

use crate::error::PtyError;
use crate::execution::SessionMultiplexer;

/// Errors that can occur during tool execution.
#[derive(Debug, Error)]
pub enum ToolError {
    /// Invalid parameters provided to the tool.
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    /// Tool execution failed.
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    /// Tool execution timed out.
    #[error("Execution timed out after {seconds} seconds")]
    Timeout { seconds: u64 },

    /// Tool is not registered.
    #[error("Tool not available: {0}")]
    NotAvailable(String),

    /// Command refused by the session policy.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
}

impl From<PtyError> for ToolError {
    fn from(err: PtyError) -> Self {
        match err {
            PtyError::CommandRejected(reason) => ToolError::PermissionDenied(reason),
            PtyError::MissingCommand | PtyError::SessionNotFound(_) => {
                ToolError::InvalidParameters(err.to_string())
            }
            other => ToolError::ExecutionFailed(other.to_string()),
        }
    }
}

/// Result of a tool execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Whether the tool execution was successful.
    pub success: bool,
    /// Output from the tool execution.
    pub output: String,
    /// Error message if execution failed.
    pub error: Option<String>,
    /// Structured fields alongside the text output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ToolResult {
    /// Create a successful tool result.
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: None,
            data: None,
        }
    }

    /// Create a failed tool result.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: Some(error.into()),
            data: None,
        }
    }

    /// Create a result with both output and error (partial success).
    pub fn partial(output: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
            error: Some(error.into()),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Context for tool execution.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Job directory the tools operate in.
    pub working_dir: PathBuf,
    /// Upper bound on one tool call, in seconds.
    pub default_timeout: u64,
}

impl ExecutionContext {
    /// Create a new execution context.
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
            default_timeout: 30,
        }
    }

    /// Set the default timeout for tool calls.
    pub fn with_timeout(mut self, timeout_seconds: u64) -> Self {
        self.default_timeout = timeout_seconds;
        self
    }
}

/// Trait for tools that can be executed by the agent.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Returns the unique name of the tool.
    fn name(&self) -> &str;

    /// Returns a description of what the tool does.
    fn description(&self) -> &str;

    /// Returns the JSON schema for the tool's parameters.
    fn parameters_schema(&self) -> Value;

    /// Execute the tool with the given arguments and context.
    async fn execute(&self, args: Value, ctx: &ExecutionContext) -> Result<ToolResult, ToolError>;
}

/// Registry for managing available tools.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Create a new empty tool registry.
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Registry with the interactive session tools bound to `multiplexer`.
    pub fn with_session_tools(multiplexer: Arc<SessionMultiplexer>) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(InteractiveShellTool::new(Arc::clone(&multiplexer))));
        registry.register(Arc::new(TerminateSessionTool::new(multiplexer)));
        registry
    }

    /// Register a new tool in the registry.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Registered tool names, sorted.
    pub fn list_tools(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Get the number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Runs `name`, folding every error into a failed [`ToolResult`].
    pub async fn invoke(&self, name: &str, args: Value, ctx: &ExecutionContext) -> ToolResult {
        let Some(tool) = self.get(name) else {
            return ToolResult::failure(ToolError::NotAvailable(name.to_string()).to_string());
        };
        match tool.execute(args, ctx).await {
            Ok(result) => result,
            Err(err) => ToolResult::failure(err.to_string()),
        }
    }

    /// Generate a JSON schema for all registered tools.
    ///
    /// Returns a JSON array of tool definitions suitable for LLM function calling.
    pub fn to_json_schema(&self) -> Value {
        let tools: Vec<Value> = self
            .list_tools()
            .into_iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| {
                serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": tool.name(),
                        "description": tool.description(),
                        "parameters": tool.parameters_schema()
                    }
                })
            })
            .collect();

        Value::Array(tools)
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
