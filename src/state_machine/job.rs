use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::state::JobStatus;
use crate::error::{DispatchError, ExecutionFailure};

/// Exit code recorded for jobs that hit the deadline, matching `timeout(1)`.
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Identifier of a job, allocated from a monotonically increasing counter.
///
/// Serialized and displayed as a decimal string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(u64);

impl JobId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = DispatchError;

    /// A string that is not a job id can never name a job, so parse
    /// failures are reported as `NotFound`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u64>()
            .map(JobId)
            .map_err(|_| DispatchError::NotFound(s.to_string()))
    }
}

impl Serialize for JobId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for JobId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// How an execution attempt ended, as reported by the executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// The agent exited with status zero before the deadline.
    Success { output: String },
    /// Anything else. `exit_code` is `None` when the process never started
    /// or its status could not be determined.
    Failure {
        exit_code: Option<i32>,
        output: String,
        failure: ExecutionFailure,
    },
}

/// One execution attempt of an agent, owned by the job registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub agent: String,
    pub status: JobStatus,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    /// A freshly submitted job: queued, no output, no exit code.
    pub fn queued(id: JobId, agent: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            agent,
            status: JobStatus::Queued,
            stdout: String::new(),
            stderr: String::new(),
            exit_code: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Wall-clock time between submission and the last recorded change.
    pub fn elapsed_ms(&self) -> i64 {
        (self.updated_at - self.created_at).num_milliseconds()
    }
}

/// Acknowledgement handed back to a submitter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub job_id: JobId,
    pub agent: String,
    pub status: JobStatus,
}

impl Submission {
    pub fn queued(job_id: JobId, agent: &str) -> Self {
        Self {
            job_id,
            agent: agent.to_string(),
            status: JobStatus::Queued,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_creation_defaults() {
        let record = JobRecord::queued(JobId::new(7), "Recon".into());
        assert_eq!(record.id, JobId::new(7));
        assert_eq!(record.agent, "Recon");
        assert_eq!(record.status, JobStatus::Queued);
        assert!(record.stdout.is_empty());
        assert!(record.stderr.is_empty());
        assert_eq!(record.exit_code, None);
        assert_eq!(record.elapsed_ms(), 0);
    }

    #[test]
    fn job_id_parses_decimal_strings() {
        assert_eq!("42".parse::<JobId>().unwrap(), JobId::new(42));
        assert_eq!(" 3 ".parse::<JobId>().unwrap().get(), 3);
    }

    #[test]
    fn job_id_parse_failure_is_not_found() {
        let err = "abc".parse::<JobId>().unwrap_err();
        assert!(matches!(err, DispatchError::NotFound(ref raw) if raw == "abc"));
        assert!("-1".parse::<JobId>().is_err());
    }

    #[test]
    fn record_serializes_id_as_string() {
        let record = JobRecord::queued(JobId::new(12), "Echo".into());
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["id"], "12");
        assert_eq!(value["status"], "queued");
        assert!(value["exit_code"].is_null());
    }

    #[test]
    fn submission_is_queued() {
        let sub = Submission::queued(JobId::new(1), "Echo");
        let value = serde_json::to_value(&sub).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"job_id": "1", "agent": "Echo", "status": "queued"})
        );
    }
}
