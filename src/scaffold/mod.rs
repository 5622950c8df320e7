//! Agent-facing tool surface.
//!
//! The remote agent reaches a job's codebase through a small set of tools:
//! 1. `interactive_shell` starts or continues a PTY session
//! 2. `terminate_session` force-kills one
//!
//! [`Dispatcher`] serves those tools over JSON lines, one call at a time.
//!
//! # Example
//!
//! ```ignore
//! use judge_forge::execution::SessionMultiplexer;
//! use judge_forge::scaffold::{Dispatcher, ExecutionContext};
//! use std::sync::Arc;
//!
//! let mux = Arc::new(SessionMultiplexer::default().with_cwd("./jobs/1"));
//! let dispatcher = Dispatcher::new(mux, ExecutionContext::new("./jobs/1"));
//! let stdin = tokio::io::BufReader::new(tokio::io::stdin());
//! dispatcher.run(stdin, tokio::io::stdout()).await?;
//! ```

pub mod dispatch;
pub mod tools;

pub use dispatch::{DispatchStats, Dispatcher, ToolCall, ToolResponse};
pub use tools::{
    ExecutionContext, InteractiveShellTool, PromptDetector, TerminateSessionTool, Tool, ToolError,
    ToolRegistry, ToolResult,
};
