//! Deadline-bounded agent execution.
//!
//! A [`Dispatcher`] accepts `(agent, payload)` submissions, records each as a
//! queued [`JobRecord`] in the [`JobRegistry`] and runs the agent as an
//! isolated child process through the [`Executor`]. Callers learn the
//! outcome only by polling the registry.

pub mod agents;
pub mod cli;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod registry;
pub mod state_machine;
pub mod ui;

pub use agents::AgentCatalog;
pub use config::AgentrunConfig;
pub use dispatcher::Dispatcher;
pub use error::{DispatchError, ExecutionFailure};
pub use executor::Executor;
pub use registry::JobRegistry;
pub use state_machine::{JobId, JobRecord, JobStatus, Submission};
