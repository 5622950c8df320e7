//! Per-session interpreter state and the command policy.
//!
//! A session is either a plain shell or an interactive Python REPL. The kind is
//! tracked on each session and decides whether input is screened: shell commands
//! go through [`CommandPolicy`], REPL input does not.

use std::fmt;
use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::PtyError;

/// Interpreter currently reading a session's input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    #[default]
    Shell,
    PythonRepl,
}

impl SessionKind {
    /// Kind of a session whose startup command is `command`.
    pub fn for_command(command: &str) -> Self {
        if starts_python_repl(command) {
            SessionKind::PythonRepl
        } else {
            SessionKind::Shell
        }
    }

    /// Kind after `input` has been sent to a session of this kind.
    pub fn after_input(self, input: &str) -> Self {
        match self {
            SessionKind::PythonRepl if leaves_python_repl(input) => SessionKind::Shell,
            SessionKind::Shell if starts_python_repl(input) => SessionKind::PythonRepl,
            kind => kind,
        }
    }
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionKind::Shell => write!(f, "shell"),
            SessionKind::PythonRepl => write!(f, "python_repl"),
        }
    }
}

/// `python`, `python3`, `python3.11`, optionally with flags but without a script.
fn starts_python_repl(command: &str) -> bool {
    let mut tokens = command.split_whitespace();
    let Some(program) = tokens.next() else {
        return false;
    };
    let name = Path::new(program)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(program);
    let is_python = name == "python"
        || name
            .strip_prefix("python3")
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('.'));
    is_python && tokens.all(|t| matches!(t, "-i" | "-u" | "-q" | "-B" | "-E"))
}

fn leaves_python_repl(input: &str) -> bool {
    let trimmed = input.trim();
    matches!(trimmed, "exit()" | "quit()" | "exit" | "quit") || input.contains('\u{4}')
}

struct DenyRule {
    name: &'static str,
    pattern: Regex,
}

/// Rejects dangerous commands in shell sessions.
pub struct CommandPolicy {
    rules: Vec<DenyRule>,
}

/// Built-in deny-list: `(name, pattern)`.
const DEFAULT_RULES: [(&str, &str); 5] = [
    (
        "recursive root deletion",
        r"\brm\s+(?:-\S+\s+)*-(?:\S*[rR]\S*|-recursive)\s+(?:-\S+\s+)*(?:/\*?|~/?|\$HOME/?)(?:\s|[;&|]|$)",
    ),
    ("filesystem creation", r"\bmkfs(?:\.\w+)?\b"),
    (
        "system shutdown",
        r"(?:^\s*|[;&|]\s*|\bsudo\s+)(?:shutdown|reboot|halt|poweroff)\b",
    ),
    ("fork bomb", r":\(\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;\s*:"),
    (
        "raw block device write",
        r"(?:\bof=|>\s*)/dev/(?:sd[a-z]|hd[a-z]|vd[a-z]|xvd[a-z]|nvme\d|mmcblk\d|disk\d)",
    ),
];

impl Default for CommandPolicy {
    fn default() -> Self {
        let rules = DEFAULT_RULES
            .iter()
            .filter_map(|(name, pattern)| {
                Regex::new(pattern)
                    .ok()
                    .map(|pattern| DenyRule { name, pattern })
            })
            .collect();
        Self { rules }
    }
}

impl CommandPolicy {
    /// A policy that allows everything.
    pub fn permissive() -> Self {
        Self { rules: Vec::new() }
    }

    /// Adds a deny rule.
    pub fn with_rule(mut self, name: &'static str, pattern: &str) -> Result<Self, regex::Error> {
        self.rules.push(DenyRule {
            name,
            pattern: Regex::new(pattern)?,
        });
        Ok(self)
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Name of the first rule `command` violates, if any.
    pub fn violation(&self, command: &str) -> Option<&'static str> {
        self.rules
            .iter()
            .find(|rule| rule.pattern.is_match(command))
            .map(|rule| rule.name)
    }

    /// Screens `input` for a session of `kind`. Only shell sessions are screened.
    pub fn check(&self, kind: SessionKind, input: &str) -> Result<(), PtyError> {
        if kind != SessionKind::Shell {
            return Ok(());
        }
        match self.violation(input) {
            Some(rule) => Err(PtyError::CommandRejected(format!(
                "{} ({})",
                rule,
                input.trim()
            ))),
            None => Ok(()),
        }
    }
}
