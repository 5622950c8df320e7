//! Registry of live PTY sessions with start/step/terminate.
//!
//! Calls for different session ids may come from different threads; the map
//! lock is only held long enough to look a session up, and each session has its
//! own lock. Concurrent calls for the same id are serialized by that lock.
//!
//! Sessions that finish on their own stay registered so callers can still read
//! `finished = true`, but only the most recent [`DEFAULT_FINISHED_RETENTION`]
//! of them are kept; older ones are evicted.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::policy::{CommandPolicy, SessionKind};
use super::pty::{DrainOptions, PtySession, PtySpawnConfig};
use crate::error::PtyError;

type SharedSession = Arc<Mutex<PtySession>>;

/// Finished sessions kept answerable before the oldest is evicted.
pub const DEFAULT_FINISHED_RETENTION: usize = 64;

/// One `step` call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepRequest {
    /// Existing session; absent to start a new one.
    #[serde(default)]
    pub session_id: Option<String>,
    /// Command for a new session.
    #[serde(default)]
    pub command: Option<String>,
    /// Raw input for an existing session.
    #[serde(default)]
    pub input: Option<String>,
    /// Working directory for a new session; the multiplexer default when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
}

impl StepRequest {
    pub fn start(command: impl Into<String>) -> Self {
        Self {
            command: Some(command.into()),
            ..Self::default()
        }
    }

    pub fn input(session_id: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            session_id: Some(session_id.into()),
            input: Some(input.into()),
            ..Self::default()
        }
    }

    pub fn poll(session_id: impl Into<String>) -> Self {
        Self {
            session_id: Some(session_id.into()),
            ..Self::default()
        }
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }
}

/// Result of one `step` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepResponse {
    pub session_id: String,
    pub output: String,
    pub waiting: bool,
    pub finished: bool,
    #[serde(default)]
    pub truncated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<u32>,
    pub kind: SessionKind,
}

/// Snapshot of a registered session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub command: String,
    pub kind: SessionKind,
    pub waiting: bool,
    pub finished: bool,
    pub exit_code: Option<u32>,
}

impl SessionInfo {
    fn of(session: &PtySession) -> Self {
        Self {
            session_id: session.id().to_string(),
            command: session.command().to_string(),
            kind: session.kind(),
            waiting: session.is_waiting(),
            finished: session.is_finished(),
            exit_code: session.exit_code(),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Process-wide table of PTY sessions keyed by session id.
pub struct SessionMultiplexer {
    sessions: Mutex<HashMap<String, SharedSession>>,
    /// Ids of naturally finished sessions, oldest first.
    finished: Mutex<VecDeque<String>>,
    finished_retention: usize,
    spawn_config: PtySpawnConfig,
    drain: DrainOptions,
    policy: CommandPolicy,
}

impl Default for SessionMultiplexer {
    fn default() -> Self {
        Self::new(PtySpawnConfig::default())
    }
}

impl SessionMultiplexer {
    pub fn new(spawn_config: PtySpawnConfig) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            finished: Mutex::new(VecDeque::new()),
            finished_retention: DEFAULT_FINISHED_RETENTION,
            spawn_config,
            drain: DrainOptions::default(),
            policy: CommandPolicy::default(),
        }
    }

    pub fn with_drain_options(mut self, drain: DrainOptions) -> Self {
        self.drain = drain;
        self
    }

    pub fn with_finished_retention(mut self, retention: usize) -> Self {
        self.finished_retention = retention;
        self
    }

    pub fn with_policy(mut self, policy: CommandPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.spawn_config.cwd = Some(cwd.into());
        self
    }

    pub fn policy(&self) -> &CommandPolicy {
        &self.policy
    }

    /// Spawns `command` and registers it. The session starts idle.
    pub fn start(&self, command: &str) -> Result<String, PtyError> {
        self.start_in(command, None)
    }

    /// Like [`start`](Self::start), running the command in `cwd` when given.
    pub fn start_in(&self, command: &str, cwd: Option<&Path>) -> Result<String, PtyError> {
        if command.trim().is_empty() {
            return Err(PtyError::MissingCommand);
        }
        // The startup command always runs in the shell.
        self.policy.check(SessionKind::Shell, command)?;

        let session = match cwd {
            Some(dir) => PtySession::spawn(command, &self.spawn_config.clone().with_cwd(dir))?,
            None => PtySession::spawn(command, &self.spawn_config)?,
        };
        let id = session.id().to_string();
        lock(&self.sessions).insert(id.clone(), Arc::new(Mutex::new(session)));
        Ok(id)
    }

    /// Starts or continues a session, then drains available output.
    ///
    /// A finished session answers immediately with `finished = true`.
    pub fn step(&self, request: StepRequest) -> Result<StepResponse, PtyError> {
        let session_id = match request.session_id {
            Some(id) => id,
            None => {
                let command = request.command.ok_or(PtyError::MissingCommand)?;
                self.start_in(&command, request.cwd.as_deref())?
            }
        };
        let shared = self.get(&session_id)?;
        let mut session = lock(&shared);

        if session.is_finished() {
            return Ok(Self::response(&session, String::new(), false));
        }
        let response = self.advance(&mut session, &session_id, request.input.as_deref())?;
        drop(session);

        if response.finished {
            self.retire(&session_id);
        }
        Ok(response)
    }

    fn advance(
        &self,
        session: &mut PtySession,
        session_id: &str,
        input: Option<&str>,
    ) -> Result<StepResponse, PtyError> {
        if let Some(input) = input.filter(|i| !i.is_empty()) {
            self.policy.check(session.kind(), input)?;
            session.write_input(input)?;
            let next = session.kind().after_input(input);
            if next != session.kind() {
                debug!(session_id = %session_id, kind = %next, "Session interpreter changed");
                session.set_kind(next);
            }
        }

        let drained = session.drain(&self.drain)?;
        Ok(Self::response(session, drained.output, drained.truncated))
    }

    /// Records a session that just finished and evicts the oldest beyond the retention.
    fn retire(&self, session_id: &str) {
        let evicted: Vec<String> = {
            let mut finished = lock(&self.finished);
            finished.push_back(session_id.to_string());
            let excess = finished.len().saturating_sub(self.finished_retention);
            finished.drain(..excess).collect()
        };
        for id in evicted {
            let removed = lock(&self.sessions).remove(&id);
            if let Some(shared) = removed {
                lock(&shared).kill();
                debug!(session_id = %id, "Evicted finished session");
            }
        }
    }

    /// Kills and forgets a session. Unknown or already terminated ids return `Ok(false)`.
    pub fn terminate(&self, session_id: &str) -> Result<bool, PtyError> {
        let removed = lock(&self.sessions).remove(session_id);
        lock(&self.finished).retain(|id| id != session_id);
        match removed {
            Some(shared) => {
                lock(&shared).kill();
                info!(session_id = %session_id, "Terminated session");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Kills every registered session; returns how many there were.
    pub fn terminate_all(&self) -> usize {
        let drained: Vec<(String, SharedSession)> = lock(&self.sessions).drain().collect();
        lock(&self.finished).clear();
        let count = drained.len();
        for (_, shared) in drained {
            lock(&shared).kill();
        }
        if count > 0 {
            info!(count, "Terminated all sessions");
        }
        count
    }

    /// Records the caller's prompt heuristic on a session.
    pub fn set_waiting(&self, session_id: &str, waiting: bool) -> Result<(), PtyError> {
        let shared = self.get(session_id)?;
        lock(&shared).set_waiting(waiting);
        Ok(())
    }

    pub fn session_info(&self, session_id: &str) -> Option<SessionInfo> {
        let shared = lock(&self.sessions).get(session_id).cloned()?;
        let session = lock(&shared);
        Some(SessionInfo::of(&session))
    }

    pub fn list(&self) -> Vec<SessionInfo> {
        let shared: Vec<SharedSession> = lock(&self.sessions).values().cloned().collect();
        let mut infos: Vec<SessionInfo> = shared
            .iter()
            .map(|s| SessionInfo::of(&lock(s)))
            .collect();
        infos.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        infos
    }

    pub fn len(&self) -> usize {
        lock(&self.sessions).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get(&self, session_id: &str) -> Result<SharedSession, PtyError> {
        lock(&self.sessions)
            .get(session_id)
            .cloned()
            .ok_or_else(|| PtyError::SessionNotFound(session_id.to_string()))
    }

    fn response(session: &PtySession, output: String, truncated: bool) -> StepResponse {
        StepResponse {
            session_id: session.id().to_string(),
            output,
            waiting: session.is_waiting(),
            finished: session.is_finished(),
            truncated,
            exit_code: session.exit_code(),
            kind: session.kind(),
        }
    }
}

impl Drop for SessionMultiplexer {
    fn drop(&mut self) {
        self.terminate_all();
    }
}
