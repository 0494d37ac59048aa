use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::sleep;

use crate::config::AgentrunConfig;
use crate::error::DispatchError;
use crate::executor::Executor;
use crate::registry::JobRegistry;
use crate::state_machine::{JobId, JobRecord};

/// Default interval between registry polls in [`Dispatcher::wait`].
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Accepts job submissions and launches one execution task per job.
pub struct Dispatcher {
    registry: Arc<JobRegistry>,
    executor: Arc<Executor>,
    /// Next id to hand out. Starts at 1 and never goes backwards.
    next_id: AtomicU64,
    poll_interval: Duration,
}

impl Dispatcher {
    /// Create a dispatcher with an empty registry.
    pub fn new(executor: Executor) -> Self {
        Self {
            registry: Arc::new(JobRegistry::new()),
            executor: Arc::new(executor),
            next_id: AtomicU64::new(1),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn from_config(config: &AgentrunConfig) -> Self {
        Self::new(Executor::from_config(config)).with_poll_interval(config.poll_interval())
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    /// Validate a submission, record it as queued and start executing it in
    /// the background. Returns as soon as the record exists.
    ///
    /// Must be called from within a Tokio runtime. The agent name is not
    /// checked here; an unknown agent shows up as an `error` record.
    pub fn submit(&self, agent: &str, payload: impl Into<Vec<u8>>) -> Result<JobId, DispatchError> {
        let payload: Vec<u8> = payload.into();
        if payload.is_empty() {
            return Err(DispatchError::InvalidRequest("empty payload".into()));
        }

        let id = JobId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.registry.insert(JobRecord::queued(id, agent.to_string()))?;
        tracing::info!(job_id = %id, agent, bytes = payload.len(), "Job queued");

        let registry = Arc::clone(&self.registry);
        let executor = Arc::clone(&self.executor);
        let agent = agent.to_string();
        let payload: Arc<[u8]> = payload.into();
        tokio::spawn(async move {
            executor.execute(&registry, id, &agent, payload).await;
        });

        Ok(id)
    }

    /// Current snapshot of a job.
    pub fn get(&self, id: JobId) -> Result<JobRecord, DispatchError> {
        self.registry.get(id)
    }

    /// Like [`get`](Self::get) for ids received as text.
    pub fn get_str(&self, raw: &str) -> Result<JobRecord, DispatchError> {
        self.get(raw.parse()?)
    }

    /// Poll until the job reaches a terminal state and return that record.
    pub async fn wait(&self, id: JobId) -> Result<JobRecord, DispatchError> {
        loop {
            let record = self.get(id)?;
            if record.status.is_terminal() {
                return Ok(record);
            }
            sleep(self.poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::agents::AgentCatalog;
    use crate::state_machine::{JobStatus, TIMEOUT_EXIT_CODE};

    fn dispatcher(deadline: Duration) -> Dispatcher {
        let catalog = AgentCatalog::new("/nonexistent/agents", "python3", "py")
            .with_agent("Echo", vec!["cat".into()])
            .with_agent(
                "Fail",
                vec!["sh".into(), "-c".into(), "cat >/dev/null; exit 7".into()],
            )
            .with_agent("SlowAgent", vec!["sh".into(), "-c".into(), "sleep 120".into()]);
        Dispatcher::new(Executor::new(catalog, deadline)).with_poll_interval(Duration::from_millis(20))
    }

    #[tokio::test]
    async fn echo_scenario() {
        let d = dispatcher(Duration::from_secs(10));
        let id = d.submit("Echo", r#"{"x":1}"#).unwrap();

        let record = d.wait(id).await.unwrap();
        assert_eq!(record.status, JobStatus::Done);
        assert_eq!(record.exit_code, Some(0));
        assert_eq!(record.stdout, r#"{"x":1}"#);
        assert_eq!(record.agent, "Echo");
    }

    #[tokio::test]
    async fn nonzero_exit_scenario() {
        let d = dispatcher(Duration::from_secs(10));
        let id = d.submit("Fail", "payload").unwrap();

        let record = d.wait(id).await.unwrap();
        assert_eq!(record.status, JobStatus::Error);
        assert_eq!(record.exit_code, Some(7));
    }

    #[tokio::test]
    async fn slow_agent_times_out() {
        let d = dispatcher(Duration::from_millis(300));
        let start = std::time::Instant::now();
        let id = d.submit("SlowAgent", "{}").unwrap();

        let record = d.wait(id).await.unwrap();
        assert_eq!(record.status, JobStatus::Timeout);
        assert_eq!(record.exit_code, Some(TIMEOUT_EXIT_CODE));
        assert!(start.elapsed() >= Duration::from_millis(300));
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn submit_returns_immediately_with_queued_or_later() {
        let d = dispatcher(Duration::from_secs(10));
        let id = d.submit("Echo", "x").unwrap();

        let record = d.get(id).unwrap();
        assert_eq!(record.id, id);
        assert!(matches!(
            record.status,
            JobStatus::Queued | JobStatus::Running | JobStatus::Done
        ));
        d.wait(id).await.unwrap();
    }

    #[tokio::test]
    async fn ids_start_at_one_and_increase() {
        let d = dispatcher(Duration::from_secs(10));
        let a = d.submit("Nobody", "x").unwrap();
        let b = d.submit("Nobody", "x").unwrap();
        assert_eq!(a, JobId::new(1));
        assert_eq!(b, JobId::new(2));
    }

    #[tokio::test]
    async fn empty_payload_is_rejected_without_record() {
        let d = dispatcher(Duration::from_secs(10));
        let err = d.submit("Echo", Vec::<u8>::new()).unwrap_err();

        assert!(matches!(err, DispatchError::InvalidRequest(_)));
        assert!(d.registry().is_empty());
        assert!(d.registry().ids().is_empty());
    }

    #[tokio::test]
    async fn unknown_agent_fails_late() {
        let d = dispatcher(Duration::from_secs(10));
        let id = d.submit("Pluto", "x").unwrap();

        let record = d.wait(id).await.unwrap();
        assert_eq!(record.status, JobStatus::Error);
        assert_eq!(record.exit_code, None);
        assert!(record.stderr.contains("Agent not found"));
    }

    #[tokio::test]
    async fn get_unknown_is_not_found() {
        let d = dispatcher(Duration::from_secs(10));
        assert!(matches!(d.get(JobId::new(42)), Err(DispatchError::NotFound(_))));
        assert!(matches!(d.get_str("42"), Err(DispatchError::NotFound(_))));
        assert!(matches!(d.get_str("not-an-id"), Err(DispatchError::NotFound(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_submissions_get_distinct_ids() {
        const N: usize = 128;
        let d = Arc::new(dispatcher(Duration::from_secs(10)));

        let handles: Vec<_> = (0..N)
            .map(|_| {
                let d = Arc::clone(&d);
                tokio::spawn(async move { d.submit("Nobody", "x").unwrap() })
            })
            .collect();

        let mut ids = HashSet::new();
        for h in handles {
            ids.insert(h.await.unwrap());
        }
        assert_eq!(ids.len(), N);
        assert_eq!(d.registry().len(), N);

        for id in ids {
            let record = d.wait(id).await.unwrap();
            assert_eq!(record.status, JobStatus::Error);
        }
    }
}
