//! Remote agent runtime integration.
//!
//! The agent runtime is treated as an opaque HTTP service that hosts stateful
//! sessions. [`AgentApi`] is the seam the job runner depends on; [`SessionClient`]
//! is the `reqwest` implementation.

pub mod session_client;

pub use session_client::{
    is_quota_body, wire_session_id, AgentApi, MessagePart, NewMessage, RunRequest,
    SessionClient, SessionCreateResult, SESSION_ID_PREFIX,
};
