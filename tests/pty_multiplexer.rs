//! Session multiplexer behaviour against real shell children.
#![cfg(unix)]

use std::time::{Duration, Instant};

use judge_forge::execution::{
    DrainOptions, PtySpawnConfig, SessionKind, SessionMultiplexer, StepRequest, StepResponse,
};
use judge_forge::PtyError;
use tempfile::TempDir;

fn multiplexer() -> SessionMultiplexer {
    SessionMultiplexer::new(PtySpawnConfig::default()).with_drain_options(DrainOptions {
        timeout: Duration::from_millis(500),
        ..DrainOptions::default()
    })
}

/// Polls until the session finishes, collecting its output.
fn run_to_end(mux: &SessionMultiplexer, first: StepResponse) -> (String, StepResponse) {
    let mut output = first.output.clone();
    let mut last = first;
    for _ in 0..20 {
        if last.finished {
            break;
        }
        last = mux.step(StepRequest::poll(&last.session_id)).unwrap();
        output.push_str(&last.output);
    }
    (output, last)
}

#[test]
fn test_echo_session_finishes() {
    let mux = multiplexer();
    let first = mux.step(StepRequest::start("echo hello-from-pty")).unwrap();
    let (output, last) = run_to_end(&mux, first);

    assert!(output.contains("hello-from-pty"));
    assert!(last.finished);
    assert!(!last.waiting);
    assert_eq!(last.exit_code, Some(0));
}

#[test]
fn test_exit_code_reported() {
    let mux = multiplexer();
    let first = mux.step(StepRequest::start("exit 3")).unwrap();
    let (_, last) = run_to_end(&mux, first);
    assert!(last.finished);
    assert_eq!(last.exit_code, Some(3));
}

#[test]
fn test_terminate_twice_is_not_an_error() {
    let mux = multiplexer();
    let id = mux.start("sleep 60").unwrap();

    assert!(mux.terminate(&id).unwrap());
    assert!(!mux.terminate(&id).unwrap());
    assert!(mux.session_info(&id).is_none());
    assert!(matches!(
        mux.step(StepRequest::poll(&id)),
        Err(PtyError::SessionNotFound(_))
    ));
}

#[test]
fn test_terminate_kills_process_group() {
    let temp = TempDir::new().unwrap();
    let marker = temp.path().join("marker");
    let mux = multiplexer();
    // The background child writes the marker only if it survives the kill.
    let command = format!("(sleep 1; touch {}) & sleep 60", marker.display());
    let id = mux.start(&command).unwrap();
    std::thread::sleep(Duration::from_millis(100));

    assert!(mux.terminate(&id).unwrap());
    std::thread::sleep(Duration::from_millis(1500));
    assert!(!marker.exists());
}

/// True while `pid` exists and is not a zombie awaiting its reaper.
fn process_alive(pid: i32) -> bool {
    #[cfg(target_os = "linux")]
    {
        match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
            Ok(stat) => stat
                .rsplit(')')
                .next()
                .and_then(|rest| rest.split_whitespace().next())
                .is_some_and(|state| state != "Z" && state != "X"),
            Err(_) => false,
        }
    }
    #[cfg(not(target_os = "linux"))]
    {
        unsafe { libc::kill(pid, 0) == 0 }
    }
}

#[test]
fn test_terminate_after_exit_kills_background_jobs() {
    let mux = multiplexer();
    let first = mux
        .step(StepRequest::start(
            "trap '' HUP; sleep 300 >/dev/null 2>&1 </dev/null & echo bgpid=$!",
        ))
        .unwrap();
    let (output, last) = run_to_end(&mux, first);
    assert!(last.finished);

    let bg_pid: i32 = output
        .split("bgpid=")
        .nth(1)
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|pid| pid.parse().ok())
        .expect("background pid echoed");
    assert!(process_alive(bg_pid));

    assert!(mux.terminate(&last.session_id).unwrap());
    let deadline = Instant::now() + Duration::from_secs(2);
    while process_alive(bg_pid) && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(20));
    }
    assert!(!process_alive(bg_pid));
}

#[test]
fn test_step_on_finished_session_does_not_block() {
    let mux = multiplexer();
    let first = mux.step(StepRequest::start("true")).unwrap();
    let (_, last) = run_to_end(&mux, first);
    assert!(last.finished);

    let started = Instant::now();
    let again = mux.step(StepRequest::poll(&last.session_id)).unwrap();
    assert!(again.finished);
    assert!(again.output.is_empty());
    assert!(started.elapsed() < Duration::from_millis(200));
}

#[test]
fn test_silent_child_returns_promptly() {
    let mux = multiplexer();
    let started = Instant::now();
    let response = mux.step(StepRequest::start("sleep 30")).unwrap();

    assert!(started.elapsed() < Duration::from_secs(3));
    assert!(!response.finished);
    assert!(response.output.is_empty());
    mux.terminate(&response.session_id).unwrap();
}

#[test]
fn test_interactive_input_round_trip() {
    let mux = multiplexer();
    let first = mux
        .step(StepRequest::start("printf 'value? '; read v; echo got=$v"))
        .unwrap();
    assert!(first.output.contains("value?"));
    assert!(!first.finished);

    let reply = mux
        .step(StepRequest::input(&first.session_id, "42\n"))
        .unwrap();
    let (output, last) = run_to_end(&mux, reply);
    assert!(output.contains("got=42"));
    assert!(last.finished);
}

#[test]
fn test_sessions_are_isolated() {
    let mux = multiplexer();
    let a = mux.step(StepRequest::start("cat")).unwrap();
    let b = mux.step(StepRequest::start("cat")).unwrap();
    assert_ne!(a.session_id, b.session_id);

    let out_a = mux
        .step(StepRequest::input(&a.session_id, "only-a\n"))
        .unwrap();
    let out_b = mux.step(StepRequest::poll(&b.session_id)).unwrap();
    assert!(out_a.output.contains("only-a"));
    assert!(!out_b.output.contains("only-a"));

    assert_eq!(mux.terminate_all(), 2);
}

#[test]
fn test_policy_applies_to_shell_input_only() {
    let mux = multiplexer();
    let shell = mux.step(StepRequest::start("cat")).unwrap();
    assert_eq!(shell.kind, SessionKind::Shell);
    assert!(matches!(
        mux.step(StepRequest::input(&shell.session_id, "mkfs.ext4 /dev/sdz\n")),
        Err(PtyError::CommandRejected(_))
    ));
    // Rejected input never reaches the child; the session is still usable.
    let next = mux
        .step(StepRequest::input(&shell.session_id, "still-alive\n"))
        .unwrap();
    assert!(next.output.contains("still-alive"));
    mux.terminate_all();
}
