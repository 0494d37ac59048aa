//! Agent catalog: maps agent names to launch specifications.
//!
//! Agents come from two places. Explicit `[agents.<Name>]` entries in the
//! config carry a full command line. Any other name is looked up as
//! `<agents_dir>/<Name>.<extension>` and run through the configured
//! interpreter. Directory lookups happen at launch time, so an agent file
//! that disappears after submission is reported on the job, not at submit.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::{AgentEntry, AgentrunConfig};
use crate::error::ExecutionFailure;

/// Longest agent name accepted.
const MAX_NAME_LEN: usize = 128;

/// Allowed agent name characters: alphanumeric, hyphen, underscore, dot.
/// Keeps names from escaping the agents directory.
pub fn is_safe_agent_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
}

/// Everything needed to start one agent process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
}

impl LaunchSpec {
    fn from_entry(entry: &AgentEntry) -> Option<Self> {
        let (program, args) = entry.command.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
            working_dir: entry.working_dir.clone(),
        })
    }
}

/// Health of a single agent as seen by [`AgentCatalog::health`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Missing,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentHealth {
    pub agent: String,
    pub status: HealthStatus,
    pub errors: Vec<String>,
}

/// Summary produced by `agentrun check`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub timestamp: DateTime<Utc>,
    pub total_agents: usize,
    pub healthy: usize,
    pub warnings: usize,
    pub missing: usize,
    pub agents: Vec<AgentHealth>,
}

impl HealthReport {
    /// Percentage of agents that are healthy, rounded down.
    pub fn health_rate(&self) -> usize {
        if self.total_agents == 0 {
            return 0;
        }
        self.healthy * 100 / self.total_agents
    }
}

/// Name → launch specification lookup.
#[derive(Debug, Clone)]
pub struct AgentCatalog {
    explicit: BTreeMap<String, AgentEntry>,
    agents_dir: PathBuf,
    interpreter: String,
    extension: String,
    allowlist: Option<BTreeSet<String>>,
}

impl AgentCatalog {
    /// A catalog that only resolves files under `agents_dir`.
    pub fn new(agents_dir: impl Into<PathBuf>, interpreter: &str, extension: &str) -> Self {
        Self {
            explicit: BTreeMap::new(),
            agents_dir: agents_dir.into(),
            interpreter: interpreter.to_string(),
            extension: extension.trim_start_matches('.').to_string(),
            allowlist: None,
        }
    }

    pub fn from_config(config: &AgentrunConfig) -> Self {
        let mut catalog = Self::new(&config.agents_dir, &config.interpreter, &config.extension);
        catalog.explicit = config.agents.clone();
        catalog.allowlist = config
            .allowlist
            .as_ref()
            .map(|names| names.iter().cloned().collect());
        catalog
    }

    /// Register an explicit command for `name`.
    pub fn with_agent(mut self, name: &str, command: Vec<String>) -> Self {
        self.explicit.insert(
            name.to_string(),
            AgentEntry {
                command,
                working_dir: None,
            },
        );
        self
    }

    /// Restrict resolution to the given names.
    pub fn with_allowlist<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowlist = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Path an agent named `name` would be loaded from.
    pub fn agent_path(&self, name: &str) -> PathBuf {
        self.agents_dir.join(format!("{name}.{}", self.extension))
    }

    /// Resolve `name` to something runnable.
    pub fn resolve(&self, name: &str) -> Result<LaunchSpec, ExecutionFailure> {
        if !is_safe_agent_name(name) {
            return Err(ExecutionFailure::AgentUnresolved(format!(
                "{name:?} (invalid agent name)"
            )));
        }
        if let Some(allow) = &self.allowlist
            && !allow.contains(name)
        {
            return Err(ExecutionFailure::AgentUnresolved(format!(
                "{name} (not in allowlist)"
            )));
        }

        if let Some(entry) = self.explicit.get(name) {
            return LaunchSpec::from_entry(entry).ok_or_else(|| {
                ExecutionFailure::AgentUnresolved(format!("{name} (empty command)"))
            });
        }

        let path = self.agent_path(name);
        if !path.is_file() {
            return Err(ExecutionFailure::AgentUnresolved(path.display().to_string()));
        }
        Ok(LaunchSpec {
            program: self.interpreter.clone(),
            args: vec![path.display().to_string()],
            working_dir: None,
        })
    }

    /// Every name the catalog knows about: explicit entries, allowlisted
    /// names and agent files found in the agents directory.
    pub fn names(&self) -> Vec<String> {
        let mut names: BTreeSet<String> = self.explicit.keys().cloned().collect();
        if let Some(allow) = &self.allowlist {
            names.extend(allow.iter().cloned());
        }
        names.extend(self.scan_dir());
        names.into_iter().collect()
    }

    fn scan_dir(&self) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(&self.agents_dir) else {
            return Vec::new();
        };
        entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file())
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some(self.extension.as_str()))
            .filter_map(|p| p.file_stem().and_then(|s| s.to_str()).map(str::to_string))
            .filter(|name| is_safe_agent_name(name))
            .filter(|name| self.allowlist.as_ref().is_none_or(|a| a.contains(name)))
            .collect()
    }

    /// Check every known agent without running it.
    pub fn health(&self) -> HealthReport {
        let agents: Vec<AgentHealth> = self.names().iter().map(|n| self.check_agent(n)).collect();
        let count = |s: HealthStatus| agents.iter().filter(|a| a.status == s).count();

        HealthReport {
            timestamp: Utc::now(),
            total_agents: agents.len(),
            healthy: count(HealthStatus::Healthy),
            warnings: count(HealthStatus::Warning),
            missing: count(HealthStatus::Missing),
            agents,
        }
    }

    fn check_agent(&self, name: &str) -> AgentHealth {
        let mut errors = Vec::new();
        let status = match self.resolve(name) {
            Err(failure) => {
                errors.push(failure.to_string());
                HealthStatus::Missing
            }
            Ok(spec) => {
                if find_program(&spec.program).is_none() {
                    errors.push(format!("program not found: {}", spec.program));
                }
                if let Some(dir) = &spec.working_dir
                    && !dir.is_dir()
                {
                    errors.push(format!("working directory not found: {}", dir.display()));
                }
                if errors.is_empty() {
                    HealthStatus::Healthy
                } else {
                    HealthStatus::Warning
                }
            }
        };
        AgentHealth {
            agent: name.to_string(),
            status,
            errors,
        }
    }
}

/// Locate `program` the way `execvp` would: as a path if it contains a
/// separator, otherwise through `PATH`.
fn find_program(program: &str) -> Option<PathBuf> {
    if program.contains('/') {
        let path = Path::new(program);
        return path.is_file().then(|| path.to_path_buf());
    }
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}
