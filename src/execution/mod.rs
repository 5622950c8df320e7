//! Interactive process execution for the agent's shell tools.
//!
//! This module provides PTY-backed subprocess sessions that can be fed input
//! incrementally and drained without blocking.
//!
//! # Architecture
//!
//! Session states follow this lifecycle:
//! ```text
//! Starting → Idle(waiting=false) ⇄ AwaitingInput(waiting=true) → Finished
//! ```
//!
//! # Example
//!
//! ```ignore
//! use judge_forge::execution::{SessionMultiplexer, StepRequest};
//!
//! let mux = SessionMultiplexer::default();
//! let first = mux.step(StepRequest::start("python3"))?;
//! let next = mux.step(StepRequest::input(&first.session_id, "print(1 + 1)\n"))?;
//! mux.terminate(&first.session_id)?;
//! ```

pub mod multiplexer;
pub mod policy;
pub mod pty;

pub use multiplexer::{
    SessionInfo, SessionMultiplexer, StepRequest, StepResponse, DEFAULT_FINISHED_RETENTION,
};
pub use policy::{CommandPolicy, SessionKind};
pub use pty::{
    clean_output, DrainOptions, DrainResult, PtySession, PtySpawnConfig, DEFAULT_MAX_OUTPUT_BYTES,
    DEFAULT_SHELL,
};
