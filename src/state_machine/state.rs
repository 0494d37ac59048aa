use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::job::{JobOutcome, JobRecord, TIMEOUT_EXIT_CODE};
use crate::error::{DispatchError, ExecutionFailure};

/// Lifecycle status of a job.
///
/// Each job flows through: QUEUED → RUNNING → {DONE, ERROR, TIMEOUT}.
/// An agent that cannot be launched skips RUNNING and goes straight to ERROR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Done,
    Error,
    Timeout,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Error | JobStatus::Timeout)
    }

    /// Whether the state machine permits moving from `self` to `next`.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Queued, JobStatus::Running)
                | (JobStatus::Queued, JobStatus::Error)
                | (JobStatus::Running, JobStatus::Done)
                | (JobStatus::Running, JobStatus::Error)
                | (JobStatus::Running, JobStatus::Timeout)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Queued => write!(f, "queued"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Done => write!(f, "done"),
            JobStatus::Error => write!(f, "error"),
            JobStatus::Timeout => write!(f, "timeout"),
        }
    }
}

/// A requested change to a job record.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// The agent process was spawned and its input is being written.
    Start,
    /// The attempt is over.
    Finish(JobOutcome),
}

impl Transition {
    /// The status a record ends up in after this transition.
    pub fn target(&self) -> JobStatus {
        match self {
            Transition::Start => JobStatus::Running,
            Transition::Finish(JobOutcome::Success { .. }) => JobStatus::Done,
            Transition::Finish(JobOutcome::Failure {
                failure: ExecutionFailure::ExecutionTimedOut { .. },
                ..
            }) => JobStatus::Timeout,
            Transition::Finish(JobOutcome::Failure { .. }) => JobStatus::Error,
        }
    }
}

/// Applies transitions to a `JobRecord`, rejecting anything that would
/// move a job backwards or out of a terminal state.
pub struct StateMachine;

impl StateMachine {
    /// Apply `transition` to `record` and return the new status.
    ///
    /// - `Start` requires `queued`.
    /// - A successful finish requires `running` and records exit code 0.
    /// - A timeout requires `running` and records the sentinel exit code.
    /// - Any other failure is accepted from `queued` (launch never happened,
    ///   exit code stays unset) or from `running`.
    pub fn apply(record: &mut JobRecord, transition: Transition) -> Result<JobStatus, DispatchError> {
        let from = record.status;
        let to = transition.target();

        let launch_failure = matches!(
            &transition,
            Transition::Finish(JobOutcome::Failure { exit_code: None, .. })
        );
        let allowed = if from == JobStatus::Queued && to == JobStatus::Error {
            launch_failure
        } else {
            from.can_transition_to(to)
        };
        if !allowed {
            return Err(DispatchError::InvalidTransition { from, to });
        }

        match transition {
            Transition::Start => {}
            Transition::Finish(JobOutcome::Success { output }) => {
                record.stdout = output;
                record.exit_code = Some(0);
            }
            Transition::Finish(JobOutcome::Failure {
                exit_code,
                output,
                failure,
            }) => {
                record.stdout = output;
                record.stderr = failure.to_string();
                record.exit_code = match failure {
                    ExecutionFailure::ExecutionTimedOut { .. } => Some(TIMEOUT_EXIT_CODE),
                    _ => exit_code,
                };
            }
        }

        record.status = to;
        record.updated_at = Utc::now();
        Ok(to)
    }
}
