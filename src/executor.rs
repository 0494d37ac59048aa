//! Worker execution: runs one agent process per job under a deadline.
//!
//! [`Executor::execute`] resolves the agent, spawns it in its own process
//! group, writes the payload to its stdin, merges stdout and stderr in
//! arrival order and races the exit against the deadline. Every outcome is
//! written into the [`JobRegistry`]; nothing is returned to the submitter.

use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{ChildStdin, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::agents::{AgentCatalog, LaunchSpec};
use crate::config::AgentrunConfig;
use crate::error::ExecutionFailure;
use crate::registry::JobRegistry;
use crate::state_machine::{
    JobId, JobOutcome, JobStatus, StateMachine, TIMEOUT_EXIT_CODE, Transition,
};

/// How long to keep reading output, or writing the payload, after the agent
/// has exited or been killed. Only matters when a descendant escaped the
/// process group and still holds the pipes open.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

const READ_CHUNK: usize = 8 * 1024;

/// Runs agents for the dispatcher.
#[derive(Debug, Clone)]
pub struct Executor {
    catalog: AgentCatalog,
    deadline: Duration,
    max_output_bytes: usize,
}

impl Executor {
    pub fn new(catalog: AgentCatalog, deadline: Duration) -> Self {
        Self {
            catalog,
            deadline,
            max_output_bytes: 10 * 1024 * 1024,
        }
    }

    pub fn from_config(config: &AgentrunConfig) -> Self {
        Self::new(AgentCatalog::from_config(config), config.deadline())
            .with_max_output_bytes(config.max_output_bytes)
    }

    pub fn with_max_output_bytes(mut self, limit: usize) -> Self {
        self.max_output_bytes = limit;
        self
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    pub fn catalog(&self) -> &AgentCatalog {
        &self.catalog
    }

    /// Run job `id` to a terminal state. Records that are no longer queued
    /// are left untouched and the agent is not launched.
    pub async fn execute(
        &self,
        registry: &JobRegistry,
        id: JobId,
        agent: &str,
        payload: Arc<[u8]>,
    ) {
        match registry.get(id) {
            Ok(current) if current.status == JobStatus::Queued => {}
            Ok(current) => {
                tracing::warn!(
                    job_id = %id,
                    agent,
                    status = %current.status,
                    "Job is not queued, not launching agent",
                );
                return;
            }
            Err(e) => {
                tracing::error!(job_id = %id, agent, error = %e, "Cannot execute job");
                return;
            }
        }

        let started = Instant::now();
        let outcome = self.run(registry, id, agent, payload).await;
        if let Some(status) = record(registry, id, Transition::Finish(outcome)) {
            tracing::info!(
                job_id = %id,
                agent,
                %status,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Job finished",
            );
        }
    }

    async fn run(
        &self,
        registry: &JobRegistry,
        id: JobId,
        agent: &str,
        payload: Arc<[u8]>,
    ) -> JobOutcome {
        let spec = match self.catalog.resolve(agent) {
            Ok(spec) => spec,
            Err(failure) => {
                tracing::warn!(
                    job_id = %id,
                    agent,
                    error = %failure,
                    "Agent could not be resolved",
                );
                return launch_failure(failure);
            }
        };

        let mut cmd = build_command(&spec);
        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                tracing::warn!(
                    job_id = %id,
                    agent,
                    program = %spec.program,
                    error = %e,
                    "Failed to spawn agent",
                );
                let failure = match e.kind() {
                    std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                        ExecutionFailure::AgentUnresolved(format!("{agent} ({}: {e})", spec.program))
                    }
                    _ => ExecutionFailure::ExecutionFailed(format!("failed to launch agent: {e}")),
                };
                return launch_failure(failure);
            }
        };
        let pid = child.id();

        let mut writer = tokio::spawn(write_payload(child.stdin.take(), payload));
        let capture = OutputCapture::start(
            child.stdout.take(),
            child.stderr.take(),
            self.max_output_bytes,
        );
        record(registry, id, Transition::Start);
        tracing::info!(job_id = %id, agent, pid, "Job running");

        let waited = tokio::time::timeout(self.deadline, child.wait()).await;

        // The group is only signalled while its leader is still unreaped, so
        // the pgid cannot have been handed to another process yet.
        match waited {
            Err(_elapsed) => {
                tracing::warn!(
                    job_id = %id,
                    agent,
                    deadline_ms = self.deadline.as_millis() as u64,
                    "Job timed out, killing agent",
                );
                if let Some(pid) = pid {
                    kill_process_group(pid);
                }
                let _ = child.start_kill();
                if let Err(e) = child.wait().await {
                    tracing::error!(job_id = %id, error = %e, "Failed to reap timed-out agent");
                }
                writer.abort();
                JobOutcome::Failure {
                    exit_code: Some(TIMEOUT_EXIT_CODE),
                    output: capture.finish().await,
                    failure: ExecutionFailure::ExecutionTimedOut {
                        deadline: self.deadline,
                    },
                }
            }
            Ok(Err(e)) => {
                if let Some(pid) = pid {
                    kill_process_group(pid);
                }
                let _ = child.start_kill();
                let _ = child.wait().await;
                writer.abort();
                JobOutcome::Failure {
                    exit_code: None,
                    output: capture.finish().await,
                    failure: ExecutionFailure::ExecutionFailed(format!(
                        "failed waiting for agent: {e}"
                    )),
                }
            }
            Ok(Ok(status)) => {
                // A descendant outside the group may hold stdin open without
                // reading; after the grace period the write is dropped.
                let write_result = match tokio::time::timeout(DRAIN_GRACE, &mut writer).await {
                    Ok(joined) => joined,
                    Err(_) => {
                        tracing::debug!(job_id = %id, agent, "Dropping unfinished payload write");
                        writer.abort();
                        Ok(Ok(()))
                    }
                };
                let output = capture.finish().await;
                let write_error = match write_result {
                    Ok(Err(e)) => Some(format!("failed to write payload: {e}")),
                    Err(e) => Some(format!("payload writer failed: {e}")),
                    Ok(Ok(())) => None,
                };
                exit_outcome(status, output, write_error)
            }
        }
    }
}

/// Apply a transition through the registry, logging rejected ones.
fn record(registry: &JobRegistry, id: JobId, transition: Transition) -> Option<JobStatus> {
    match registry.update(id, |r| StateMachine::apply(r, transition)) {
        Ok(Ok(status)) => Some(status),
        Ok(Err(e)) | Err(e) => {
            tracing::error!(job_id = %id, error = %e, "Failed to record job transition");
            None
        }
    }
}

fn launch_failure(failure: ExecutionFailure) -> JobOutcome {
    JobOutcome::Failure {
        exit_code: None,
        output: String::new(),
        failure,
    }
}

fn build_command(spec: &LaunchSpec) -> Command {
    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);
    if let Some(dir) = &spec.working_dir {
        cmd.current_dir(dir);
    }
    cmd
}

/// Map an exit status onto an outcome.
fn exit_outcome(status: ExitStatus, output: String, write_error: Option<String>) -> JobOutcome {
    match (status.code(), write_error) {
        (Some(0), None) => JobOutcome::Success { output },
        (Some(code), Some(reason)) => JobOutcome::Failure {
            exit_code: Some(code),
            output,
            failure: ExecutionFailure::ExecutionFailed(reason),
        },
        (Some(code), None) => JobOutcome::Failure {
            exit_code: Some(code),
            output,
            failure: ExecutionFailure::ExecutionFailed(format!("agent exited with status {code}")),
        },
        (None, _) => JobOutcome::Failure {
            exit_code: None,
            output,
            failure: ExecutionFailure::ExecutionFailed(describe_signal(status)),
        },
    }
}

#[cfg(unix)]
fn describe_signal(status: ExitStatus) -> String {
    use std::os::unix::process::ExitStatusExt;
    match status.signal() {
        Some(sig) => format!("agent terminated by signal {sig}"),
        None => "agent terminated without an exit status".to_string(),
    }
}

#[cfg(not(unix))]
fn describe_signal(_status: ExitStatus) -> String {
    "agent terminated without an exit status".to_string()
}

/// SIGKILL every process in the agent's group. The group id equals the
/// child's pid because it was spawned with `process_group(0)`.
#[cfg(unix)]
fn kill_process_group(pgid: u32) {
    // SAFETY: killpg has no memory-safety preconditions.
    let rc = unsafe { libc::killpg(pgid as libc::pid_t, libc::SIGKILL) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            tracing::debug!(pgid, error = %err, "killpg failed");
        }
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pgid: u32) {}

/// Write the payload and close stdin. A broken pipe means the agent exited
/// or closed its input without reading everything, which is not an error.
async fn write_payload(stdin: Option<ChildStdin>, payload: Arc<[u8]>) -> std::io::Result<()> {
    let Some(mut stdin) = stdin else {
        return Ok(());
    };
    match stdin.write_all(&payload).await {
        Ok(()) => Ok(()),
        Err(e)
            if matches!(
                e.kind(),
                std::io::ErrorKind::BrokenPipe | std::io::ErrorKind::ConnectionReset
            ) =>
        {
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Merged capture of a child's stdout and stderr.
struct OutputCapture {
    pumps: Vec<JoinHandle<()>>,
    collector: JoinHandle<Vec<u8>>,
}

impl OutputCapture {
    fn start<O, E>(stdout: Option<O>, stderr: Option<E>, limit: usize) -> Self
    where
        O: AsyncRead + Unpin + Send + 'static,
        E: AsyncRead + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel::<Vec<u8>>(64);
        let mut pumps = Vec::with_capacity(2);
        if let Some(out) = stdout {
            pumps.push(tokio::spawn(pump(out, tx.clone())));
        }
        if let Some(err) = stderr {
            pumps.push(tokio::spawn(pump(err, tx.clone())));
        }
        drop(tx);
        let collector = tokio::spawn(collect(rx, limit));
        Self { pumps, collector }
    }

    /// Wait for both streams to close, then decode. Undecodable bytes are
    /// replaced rather than rejected.
    async fn finish(self) -> String {
        let Self { pumps, mut collector } = self;
        let bytes = match tokio::time::timeout(DRAIN_GRACE, &mut collector).await {
            Ok(joined) => joined.unwrap_or_default(),
            Err(_) => {
                // Dropping the pumps drops their senders, which ends collection.
                for p in &pumps {
                    p.abort();
                }
                collector.await.unwrap_or_default()
            }
        };
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

async fn pump<R: AsyncRead + Unpin>(mut reader: R, tx: mpsc::Sender<Vec<u8>>) {
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if tx.send(buf[..n].to_vec()).await.is_err() {
                    break;
                }
            }
        }
    }
}

/// Accumulate chunks up to `limit` bytes; excess is read and discarded so
/// the agent never blocks on a full pipe.
async fn collect(mut rx: mpsc::Receiver<Vec<u8>>, limit: usize) -> Vec<u8> {
    let mut out = Vec::new();
    while let Some(chunk) = rx.recv().await {
        let room = limit.saturating_sub(out.len());
        out.extend_from_slice(&chunk[..chunk.len().min(room)]);
    }
    out
}
