use anyhow::{Context, Result};
use clap::Parser;
use indicatif::MultiProgress;
use tokio::io::AsyncReadExt;
use tokio::time::sleep;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use agentrun::cli::{Cli, Command};
use agentrun::ui::{self, JobProgress};
use agentrun::{AgentrunConfig, Dispatcher, JobRecord, JobStatus, Submission};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "agentrun=debug" } else { "agentrun=warn" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut config = AgentrunConfig::load(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    if let Some(secs) = cli.deadline_secs {
        anyhow::ensure!(secs > 0, "--deadline-secs must be positive");
        config.deadline_secs = secs;
    }
    tracing::debug!(?config, "Loaded configuration");

    let dispatcher = Dispatcher::from_config(&config);

    match cli.command {
        Command::Run {
            agents,
            payload,
            file,
        } => {
            let payload = read_payload(payload, file).await?;
            let records = run_jobs(&dispatcher, &agents, payload, &config).await?;
            for record in &records {
                ui::print_record(record);
            }
            if records.iter().any(|r| r.status != JobStatus::Done) {
                std::process::exit(1);
            }
        }
        Command::Agents => {
            let catalog = dispatcher.executor().catalog();
            for name in catalog.names() {
                match catalog.resolve(&name) {
                    Ok(spec) => println!("{name}\t{} {}", spec.program, spec.args.join(" ")),
                    Err(failure) => println!("{name}\t({failure})"),
                }
            }
        }
        Command::Check { json } => {
            let report = dispatcher.executor().catalog().health();
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                ui::print_health(&report);
            }
            if report.missing > 0 {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

/// Payload from `--payload`, `--file`, or stdin when neither is given.
async fn read_payload(payload: Option<String>, file: Option<std::path::PathBuf>) -> Result<Vec<u8>> {
    if let Some(text) = payload {
        return Ok(text.into_bytes());
    }
    if let Some(path) = file {
        return tokio::fs::read(&path)
            .await
            .with_context(|| format!("failed to read {}", path.display()));
    }
    let mut buf = Vec::new();
    tokio::io::stdin()
        .read_to_end(&mut buf)
        .await
        .context("failed to read payload from stdin")?;
    Ok(buf)
}

/// Submit one job per agent and poll the registry until all are terminal.
async fn run_jobs(
    dispatcher: &Dispatcher,
    agents: &[String],
    payload: Vec<u8>,
    config: &AgentrunConfig,
) -> Result<Vec<JobRecord>> {
    let multi = MultiProgress::new();
    let mut pending = Vec::with_capacity(agents.len());
    for agent in agents {
        let id = dispatcher.submit(agent, payload.clone())?;
        let ack = Submission::queued(id, agent);
        tracing::debug!(ack = %serde_json::to_string(&ack)?, "Submitted");
        pending.push((id, JobProgress::start(&multi, id, agent)));
    }

    let mut finished = Vec::with_capacity(pending.len());
    while !pending.is_empty() {
        let mut still_running = Vec::with_capacity(pending.len());
        for (id, progress) in pending {
            let record = dispatcher.get(id)?;
            if record.status.is_terminal() {
                progress.complete(&record);
                finished.push(record);
            } else {
                progress.update_status(record.status);
                still_running.push((id, progress));
            }
        }
        pending = still_running;
        if !pending.is_empty() {
            sleep(config.poll_interval()).await;
        }
    }

    finished.sort_by_key(|r| r.id);
    Ok(finished)
}
