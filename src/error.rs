//! Error types for judge-forge operations.
//!
//! Defines error types for the major subsystems:
//! - Remote agent sessions (transport, quota, permanent remote failures)
//! - Metric checklist loading
//! - Job execution
//! - Interactive PTY sessions
//! - Configuration
//!
//! Malformed report artifacts and exhausted retry budgets are deliberately absent:
//! both are ordinary outcomes that drive scheduling, not errors.

use thiserror::Error;

/// Errors that can occur while talking to the remote agent runtime.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SessionError {
    /// Connection refused, reset, or timed out before a response arrived.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Non-200 response whose body carries a token/quota-limit marker.
    #[error("Quota limited ({status}): {body}")]
    Quota { status: u16, body: String },

    /// Any other non-200 response. Not retried at the transport layer.
    #[error("Remote error ({status}): {body}")]
    PermanentRemote { status: u16, body: String },

    /// Every allowed attempt failed with a retryable error.
    #[error("Retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },

    /// A 200 response whose body could not be read.
    #[error("Failed to decode response: {0}")]
    Decode(String),
}

impl SessionError {
    /// Returns true for errors the session client retries with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SessionError::Transport(_) | SessionError::Quota { .. })
    }
}

/// Errors that can occur while loading a job's metric checklist.
#[derive(Debug, Error)]
pub enum ChecklistError {
    #[error("No metric checklist found under '{0}'")]
    NotFound(String),

    #[error("Malformed checklist '{path}': {message}")]
    Malformed { path: String, message: String },

    #[error("Duplicate metric '{0}' in checklist")]
    DuplicateMetric(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur while running a single job or metric.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("Checklist error: {0}")]
    Checklist(#[from] ChecklistError),

    #[error("Prompt rendering failed: {0}")]
    Prompt(#[from] tera::Error),

    #[error("Asset copy failed for '{path}': {reason}")]
    AssetCopy { path: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur in the interactive session multiplexer.
#[derive(Debug, Error)]
pub enum PtyError {
    #[error("Failed to spawn '{command}': {reason}")]
    SpawnFailed { command: String, reason: String },

    #[error("Session '{0}' not found")]
    SessionNotFound(String),

    #[error("Command rejected by policy: {0}")]
    CommandRejected(String),

    #[error("A command is required to start a session")]
    MissingCommand,

    #[error("Session '{0}' has already finished")]
    SessionFinished(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur while building configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
