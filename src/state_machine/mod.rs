mod job;
mod state;

pub use job::{JobId, JobOutcome, JobRecord, Submission, TIMEOUT_EXIT_CODE};
pub use state::{JobStatus, StateMachine, Transition};
