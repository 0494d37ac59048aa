use std::time::Duration;

use thiserror::Error;

use crate::state_machine::{JobId, JobStatus};

/// Errors surfaced synchronously to callers of the dispatcher and registry.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Duplicate job id: {0}")]
    DuplicateId(JobId),

    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Classifies why an execution attempt did not finish cleanly.
///
/// These never propagate to the submitter; they are rendered into the
/// job's `stderr` and reflected in its terminal status.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionFailure {
    /// The agent name could not be turned into something runnable.
    #[error("Agent not found: {0}")]
    AgentUnresolved(String),

    /// Non-zero exit, signal death or a communication failure.
    #[error("{0}")]
    ExecutionFailed(String),

    /// The deadline elapsed before the agent exited.
    #[error("agent execution timed out ({})", format_deadline(.deadline))]
    ExecutionTimedOut { deadline: Duration },
}

/// Whole seconds render as `60s`, anything finer as milliseconds.
fn format_deadline(deadline: &Duration) -> String {
    if deadline.subsec_nanos() == 0 {
        format!("{}s", deadline.as_secs())
    } else {
        format!("{}ms", deadline.as_millis())
    }
}
