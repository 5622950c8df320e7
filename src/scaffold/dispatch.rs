//! Single-threaded JSON-lines tool dispatcher.
//!
//! Each input line is `{"tool": "...", "args": {...}}` with an optional `id`
//! echoed back. Every line gets exactly one result line. At end of input all
//! live sessions are terminated.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{info, warn};

use super::tools::{ExecutionContext, ToolRegistry, ToolResult};
use crate::execution::SessionMultiplexer;

/// One tool invocation read from the input stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool: String,
    #[serde(default)]
    pub args: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
}

/// One line written to the output stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub tool: String,
    #[serde(flatten)]
    pub result: ToolResult,
}

/// Counters for one dispatcher run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    pub calls: usize,
    pub failures: usize,
    pub sessions_terminated: usize,
}

pub struct Dispatcher {
    registry: ToolRegistry,
    context: ExecutionContext,
    multiplexer: Arc<SessionMultiplexer>,
}

impl Dispatcher {
    pub fn new(multiplexer: Arc<SessionMultiplexer>, context: ExecutionContext) -> Self {
        Self {
            registry: ToolRegistry::with_session_tools(Arc::clone(&multiplexer)),
            context,
            multiplexer,
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Handles one input line; blank lines yield `None`.
    pub async fn handle_line(&self, line: &str) -> Option<ToolResponse> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let call: ToolCall = match serde_json::from_str(line) {
            Ok(call) => call,
            Err(e) => {
                warn!(error = %e, "Malformed tool call");
                return Some(ToolResponse {
                    id: None,
                    tool: String::new(),
                    result: ToolResult::failure(format!("Invalid request: {}", e)),
                });
            }
        };
        let args = if call.args.is_null() {
            Value::Object(Default::default())
        } else {
            call.args
        };
        let result = self.registry.invoke(&call.tool, args, &self.context).await;
        Some(ToolResponse {
            id: call.id,
            tool: call.tool,
            result,
        })
    }

    /// Serves `reader` until EOF, then terminates every live session.
    pub async fn run<R, W>(&self, reader: R, mut writer: W) -> std::io::Result<DispatchStats>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut stats = DispatchStats::default();
        let mut lines = reader.lines();
        let outcome = async {
            while let Some(line) = lines.next_line().await? {
                let Some(response) = self.handle_line(&line).await else {
                    continue;
                };
                stats.calls += 1;
                if !response.result.success {
                    stats.failures += 1;
                }
                let mut encoded = serde_json::to_string(&response)?;
                encoded.push('\n');
                writer.write_all(encoded.as_bytes()).await?;
                writer.flush().await?;
            }
            Ok::<(), std::io::Error>(())
        }
        .await;

        let multiplexer = Arc::clone(&self.multiplexer);
        stats.sessions_terminated = tokio::task::spawn_blocking(move || multiplexer.terminate_all())
            .await
            .unwrap_or(0);
        info!(
            calls = stats.calls,
            failures = stats.failures,
            sessions_terminated = stats.sessions_terminated,
            "Tool dispatcher finished"
        );
        outcome.map(|_| stats)
    }
}
