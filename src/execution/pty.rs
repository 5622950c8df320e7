//! PTY-backed subprocess sessions.
//!
//! A [`PtySession`] owns one child process (started as `shell -c command` in its
//! own session, so it leads its own process group) and the master side of its
//! pseudo-terminal. Output is only read inside [`PtySession::drain`]; there is
//! no background reader.

use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::sync::OnceLock;
use std::thread;
use std::time::{Duration, Instant};

use portable_pty::{native_pty_system, Child, ChildKiller, CommandBuilder, MasterPty, PtySize};
use regex::Regex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::policy::SessionKind;
use crate::error::PtyError;

/// Shell used to interpret session commands.
pub const DEFAULT_SHELL: &str = "/bin/sh";

/// Default per-step output budget.
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 64 * 1024;

const READ_CHUNK: usize = 4096;
const REAP_TIMEOUT: Duration = Duration::from_millis(500);
const REAP_POLL: Duration = Duration::from_millis(10);

/// How a session's child process is spawned.
#[derive(Debug, Clone)]
pub struct PtySpawnConfig {
    pub shell: String,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub rows: u16,
    pub cols: u16,
}

impl Default for PtySpawnConfig {
    fn default() -> Self {
        Self {
            shell: DEFAULT_SHELL.to_string(),
            cwd: None,
            env: vec![
                ("TERM".to_string(), "dumb".to_string()),
                ("PYTHONUNBUFFERED".to_string(), "1".to_string()),
            ],
            rows: 24,
            cols: 200,
        }
    }
}

impl PtySpawnConfig {
    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

/// Bounds on a single drain.
#[derive(Debug, Clone, Copy)]
pub struct DrainOptions {
    /// Upper bound on the whole drain.
    pub timeout: Duration,
    /// Once some output has arrived, stop after this long without more.
    pub quiet_period: Duration,
    /// Bytes kept per drain; the rest is read and discarded.
    pub max_bytes: usize,
}

impl Default for DrainOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(1),
            quiet_period: Duration::from_millis(100),
            max_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        }
    }
}

/// Output collected by one drain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainResult {
    pub output: String,
    pub truncated: bool,
    pub eof: bool,
}

struct PtyIo {
    master: Box<dyn MasterPty + Send>,
    reader: Box<dyn Read + Send>,
    writer: Box<dyn Write + Send>,
}

/// One interactive child process behind a pseudo-terminal.
pub struct PtySession {
    id: String,
    command: String,
    kind: SessionKind,
    waiting: bool,
    finished: bool,
    exit_code: Option<u32>,
    pid: Option<u32>,
    /// Process group led by the child; cleared once the group has been signalled.
    pgid: Option<u32>,
    io: Option<PtyIo>,
    child: Box<dyn Child + Send + Sync>,
}

fn spawn_failed(command: &str, err: impl std::fmt::Display) -> PtyError {
    PtyError::SpawnFailed {
        command: command.to_string(),
        reason: err.to_string(),
    }
}

impl PtySession {
    /// Spawns `command` under `config.shell -c` with a fresh session id.
    pub fn spawn(command: &str, config: &PtySpawnConfig) -> Result<Self, PtyError> {
        let pair = native_pty_system()
            .openpty(PtySize {
                rows: config.rows,
                cols: config.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| spawn_failed(command, e))?;

        let mut builder = CommandBuilder::new(&config.shell);
        builder.arg("-c");
        builder.arg(command);
        if let Some(cwd) = &config.cwd {
            builder.cwd(cwd);
        }
        for (key, value) in &config.env {
            builder.env(key, value);
        }

        let child = pair
            .slave
            .spawn_command(builder)
            .map_err(|e| spawn_failed(command, e))?;
        // The child holds its own copy; keeping ours would hide EOF.
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| spawn_failed(command, e))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| spawn_failed(command, e))?;

        let id = Uuid::new_v4().to_string();
        let pid = child.process_id();
        let pgid = pid.and_then(led_process_group);
        info!(session_id = %id, pid = ?pid, pgid = ?pgid, command = %command, "Spawned PTY session");

        Ok(Self {
            id,
            command: command.to_string(),
            kind: SessionKind::for_command(command),
            waiting: false,
            finished: false,
            exit_code: None,
            pid,
            pgid,
            io: Some(PtyIo {
                master: pair.master,
                reader,
                writer,
            }),
            child,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn kind(&self) -> SessionKind {
        self.kind
    }

    pub fn set_kind(&mut self, kind: SessionKind) {
        self.kind = kind;
    }

    pub fn is_waiting(&self) -> bool {
        self.waiting
    }

    pub fn set_waiting(&mut self, waiting: bool) {
        self.waiting = waiting && !self.finished;
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn exit_code(&self) -> Option<u32> {
        self.exit_code
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Writes `input` verbatim to the child's terminal.
    pub fn write_input(&mut self, input: &str) -> Result<(), PtyError> {
        if self.finished {
            return Err(PtyError::SessionFinished(self.id.clone()));
        }
        let Some(pty_io) = self.io.as_mut() else {
            return Err(PtyError::SessionFinished(self.id.clone()));
        };
        pty_io.writer.write_all(input.as_bytes())?;
        pty_io.writer.flush()?;
        self.waiting = false;
        Ok(())
    }

    /// Reads whatever output is available, bounded by `opts`.
    ///
    /// Returns as soon as the output goes quiet, the timeout elapses or the
    /// stream reaches EOF. On EOF the child is reaped and the session is marked
    /// finished. Draining a finished session returns immediately.
    #[cfg(unix)]
    pub fn drain(&mut self, opts: &DrainOptions) -> Result<DrainResult, PtyError> {
        if self.finished {
            return Ok(DrainResult {
                eof: true,
                ..DrainResult::default()
            });
        }
        let Some(pty_io) = self.io.as_mut() else {
            self.finished = true;
            return Ok(DrainResult {
                eof: true,
                ..DrainResult::default()
            });
        };
        let Some(fd) = pty_io.master.as_raw_fd() else {
            return Err(PtyError::Io(io::Error::new(
                io::ErrorKind::Unsupported,
                "pty master has no file descriptor",
            )));
        };

        let deadline = Instant::now() + opts.timeout;
        let mut collected: Vec<u8> = Vec::new();
        let mut truncated = false;
        let mut eof = false;
        let mut buf = [0u8; READ_CHUNK];

        loop {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let remaining = deadline - now;
            let wait = if collected.is_empty() && !truncated {
                remaining
            } else {
                opts.quiet_period.min(remaining)
            };
            if !poll_readable(fd, wait)? {
                if !collected.is_empty() || truncated {
                    break;
                }
                continue;
            }
            match pty_io.reader.read(&mut buf) {
                Ok(0) => {
                    eof = true;
                    break;
                }
                Ok(n) => {
                    let room = opts.max_bytes.saturating_sub(collected.len());
                    if n > room {
                        truncated = true;
                    }
                    collected.extend_from_slice(&buf[..n.min(room)]);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                // Linux reports a closed slave as EIO.
                Err(e) if e.raw_os_error() == Some(libc::EIO) => {
                    eof = true;
                    break;
                }
                Err(e) => return Err(e.into()),
            }
        }

        if eof {
            self.mark_finished();
        }

        Ok(DrainResult {
            output: clean_output(&collected),
            truncated,
            eof,
        })
    }

    #[cfg(not(unix))]
    pub fn drain(&mut self, _opts: &DrainOptions) -> Result<DrainResult, PtyError> {
        Err(PtyError::Io(io::Error::new(
            io::ErrorKind::Unsupported,
            "non-blocking PTY draining requires a unix platform",
        )))
    }

    /// Force-kills the child's process group and releases the terminal.
    ///
    /// The group is signalled even after the shell itself has exited, so background
    /// jobs it left behind do not outlive the session.
    pub fn kill(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            if let Err(err) = kill_process_group(pgid) {
                warn!(session_id = %self.id, pgid, error = %err, "Failed to kill process group");
            }
        }
        if self.finished && self.io.is_none() {
            return;
        }
        if let Err(err) = self.child.kill() {
            debug!(session_id = %self.id, error = %err, "Child already gone");
        }
        self.reap();
        self.finished = true;
        self.waiting = false;
        self.io = None;
        info!(session_id = %self.id, exit_code = ?self.exit_code, "Killed PTY session");
    }

    fn mark_finished(&mut self) {
        self.reap();
        self.finished = true;
        self.waiting = false;
        self.io = None;
        debug!(session_id = %self.id, exit_code = ?self.exit_code, "PTY session reached EOF");
    }

    fn reap(&mut self) {
        let deadline = Instant::now() + REAP_TIMEOUT;
        loop {
            match self.child.try_wait() {
                Ok(Some(status)) => {
                    self.exit_code = Some(status.exit_code());
                    return;
                }
                Ok(None) if Instant::now() < deadline => thread::sleep(REAP_POLL),
                Ok(None) => return,
                Err(err) => {
                    debug!(session_id = %self.id, error = %err, "try_wait failed");
                    return;
                }
            }
        }
    }
}

impl Drop for PtySession {
    fn drop(&mut self) {
        self.kill();
    }
}

#[cfg(unix)]
fn poll_readable(fd: std::os::unix::io::RawFd, wait: Duration) -> io::Result<bool> {
    let mut pfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };
    let timeout_ms = wait.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;
    loop {
        // SAFETY: `pfd` is a valid pollfd for the duration of the call.
        let rc = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }
        return Ok(rc > 0 && pfd.revents & (libc::POLLIN | libc::POLLHUP | libc::POLLERR) != 0);
    }
}

/// Returns `pid` if it leads its own process group. portable-pty starts every child
/// with `setsid`, so this holds unless the child is already gone.
#[cfg(unix)]
fn led_process_group(pid: u32) -> Option<u32> {
    let raw = libc::pid_t::try_from(pid).ok()?;
    // SAFETY: getpgid has no memory-safety preconditions.
    let pgid = unsafe { libc::getpgid(raw) };
    (pgid == raw).then_some(pid)
}

#[cfg(not(unix))]
fn led_process_group(_pid: u32) -> Option<u32> {
    None
}

/// Sends SIGKILL to every member of `pgid`. An empty group is not an error.
#[cfg(unix)]
fn kill_process_group(pgid: u32) -> io::Result<()> {
    let pgid = libc::pid_t::try_from(pgid)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    // Never signal our own group.
    // SAFETY: getpgrp has no preconditions.
    if pgid <= 1 || pgid == unsafe { libc::getpgrp() } {
        return Ok(());
    }
    // SAFETY: plain signal delivery.
    if unsafe { libc::killpg(pgid, libc::SIGKILL) } == -1 {
        return ignore_missing(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(unix)]
fn ignore_missing(err: io::Error) -> io::Result<()> {
    if err.kind() == io::ErrorKind::NotFound || err.raw_os_error() == Some(libc::ESRCH) {
        Ok(())
    } else {
        Err(err)
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pgid: u32) -> io::Result<()> {
    Ok(())
}

fn ansi_pattern() -> Option<&'static Regex> {
    static ANSI: OnceLock<Option<Regex>> = OnceLock::new();
    ANSI.get_or_init(|| {
        Regex::new(r"\x1b\[[0-?]*[ -/]*[@-~]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)|\x1b[@-Z\\-_]").ok()
    })
    .as_ref()
}

/// Lossy UTF-8 decode, ANSI escapes removed, CRLF folded to LF.
pub fn clean_output(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    let stripped = match ansi_pattern() {
        Some(re) => re.replace_all(&text, "").into_owned(),
        None => text.into_owned(),
    };
    stripped.replace("\r\n", "\n")
}
