//! judge-forge: agent-driven evaluation of code submissions.
//!
//! This library drives many independent jobs through a remote agent with
//! bounded, missing-only retries, and provides the PTY-backed interactive
//! shell the agent uses to run commands against each job.

pub mod cli;
pub mod error;
pub mod execution;
pub mod llm;
pub mod pipeline;
pub mod report;
pub mod scaffold;
pub mod scheduler;
pub mod utils;

// Re-export commonly used error types
pub use error::{ChecklistError, ConfigError, PtyError, RunnerError, SessionError};
