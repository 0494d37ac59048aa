//! Configuração do AGENTRUN carregada a partir de `agentrun.toml`.
//!
//! A struct [`AgentrunConfig`] contém todos os parâmetros configuráveis.
//! Valores não presentes no arquivo usam defaults sensíveis.
//! A variável de ambiente `AGENTRUN_AGENTS_DIR` tem precedência sobre o arquivo.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::DispatchError;

/// Nome do arquivo de configuração procurado por padrão.
pub const DEFAULT_CONFIG_FILE: &str = "agentrun.toml";

/// Variável de ambiente que sobrescreve `agents_dir`.
pub const AGENTS_DIR_ENV: &str = "AGENTRUN_AGENTS_DIR";

/// Configuração de nível superior carregada de `agentrun.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentrunConfig {
    /// Diretório onde os agentes `<Nome>.<extension>` são procurados.
    #[serde(default = "default_agents_dir")]
    pub agents_dir: PathBuf,

    /// Interpretador usado para executar agentes encontrados no diretório.
    #[serde(default = "default_interpreter")]
    pub interpreter: String,

    /// Extensão dos arquivos de agente (sem o ponto).
    #[serde(default = "default_extension")]
    pub extension: String,

    /// Prazo máximo de execução de um job, em segundos.
    #[serde(default = "default_deadline_secs")]
    pub deadline_secs: u64,

    /// Intervalo entre consultas ao registro ao aguardar um job.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Limite de bytes capturados da saída combinada de um agente.
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,

    /// Se presente, apenas estes nomes podem ser resolvidos.
    #[serde(default)]
    pub allowlist: Option<Vec<String>>,

    /// Agentes com comando explícito, indexados pelo nome.
    #[serde(default)]
    pub agents: BTreeMap<String, AgentEntry>,
}

/// Especificação explícita de lançamento de um agente.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct AgentEntry {
    /// Programa seguido de seus argumentos.
    pub command: Vec<String>,

    /// Diretório de trabalho do processo filho.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

// Valor padrão para o diretório de agentes: "backend/agents".
fn default_agents_dir() -> PathBuf {
    PathBuf::from("backend/agents")
}

// Valor padrão para o interpretador: "python3".
fn default_interpreter() -> String {
    "python3".to_string()
}

// Valor padrão para a extensão: "py".
fn default_extension() -> String {
    "py".to_string()
}

// Valor padrão para o prazo: 60s.
fn default_deadline_secs() -> u64 {
    60
}

// Valor padrão para o intervalo de consulta: 250ms.
fn default_poll_interval_ms() -> u64 {
    250
}

// Valor padrão para o limite de saída: 10 MiB.
fn default_max_output_bytes() -> usize {
    10 * 1024 * 1024
}

impl Default for AgentrunConfig {
    fn default() -> Self {
        Self {
            agents_dir: default_agents_dir(),
            interpreter: default_interpreter(),
            extension: default_extension(),
            deadline_secs: default_deadline_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            max_output_bytes: default_max_output_bytes(),
            allowlist: None,
            agents: BTreeMap::new(),
        }
    }
}

impl AgentrunConfig {
    /// Carrega a configuração do caminho fornecido.
    /// Usa valores padrão se o arquivo não existir.
    pub fn load(path: &Path) -> Result<Self, DispatchError> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            Self::from_toml(&contents)?
        } else {
            Self::default()
        };

        // Variável de ambiente tem precedência sobre o arquivo de configuração.
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Interpreta o conteúdo TOML sem consultar o ambiente.
    pub fn from_toml(contents: &str) -> Result<Self, DispatchError> {
        let config = toml::from_str::<AgentrunConfig>(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Aplica sobrescritas vindas do ambiente usando `lookup` para ler variáveis.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = lookup(AGENTS_DIR_ENV)
            && !dir.is_empty()
        {
            self.agents_dir = PathBuf::from(dir);
        }
    }

    fn validate(&self) -> Result<(), DispatchError> {
        if self.deadline_secs == 0 {
            return Err(DispatchError::Config("deadline_secs must be positive".into()));
        }
        if self.interpreter.trim().is_empty() {
            return Err(DispatchError::Config("interpreter must not be empty".into()));
        }
        for (name, entry) in &self.agents {
            if entry.command.is_empty() {
                return Err(DispatchError::Config(format!(
                    "agent {name} has an empty command"
                )));
            }
        }
        Ok(())
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let config = AgentrunConfig::default();
        assert_eq!(config.agents_dir, PathBuf::from("backend/agents"));
        assert_eq!(config.interpreter, "python3");
        assert_eq!(config.extension, "py");
        assert_eq!(config.deadline(), Duration::from_secs(60));
        assert_eq!(config.poll_interval(), Duration::from_millis(250));
        assert_eq!(config.max_output_bytes, 10 * 1024 * 1024);
        assert!(config.allowlist.is_none());
        assert!(config.agents.is_empty());
    }

    #[test]
    fn deserialize_partial_toml() {
        let toml_str = r#"
            deadline_secs = 5
            allowlist = ["Sun", "Echo"]

            [agents.Echo]
            command = ["cat"]
        "#;
        let config = AgentrunConfig::from_toml(toml_str).unwrap();
        assert_eq!(config.deadline_secs, 5);
        assert_eq!(config.interpreter, "python3");
        assert_eq!(
            config.allowlist.as_deref(),
            Some(&["Sun".to_string(), "Echo".to_string()][..])
        );
        assert_eq!(config.agents["Echo"].command, vec!["cat".to_string()]);
        assert!(config.agents["Echo"].working_dir.is_none());
    }

    #[test]
    fn zero_deadline_is_rejected() {
        let err = AgentrunConfig::from_toml("deadline_secs = 0").unwrap_err();
        assert!(matches!(err, DispatchError::Config(_)));
    }

    #[test]
    fn empty_command_is_rejected() {
        let err = AgentrunConfig::from_toml("[agents.Broken]\ncommand = []").unwrap_err();
        assert!(matches!(err, DispatchError::Config(ref m) if m.contains("Broken")));
    }

    #[test]
    fn malformed_toml_is_reported() {
        let err = AgentrunConfig::from_toml("deadline_secs = \"soon\"").unwrap_err();
        assert!(matches!(err, DispatchError::Toml(_)));
    }

    #[test]
    fn env_overrides_agents_dir() {
        let mut config = AgentrunConfig::default();
        config.apply_env(|key| (key == AGENTS_DIR_ENV).then(|| "/opt/agents".to_string()));
        assert_eq!(config.agents_dir, PathBuf::from("/opt/agents"));

        config.apply_env(|_| Some(String::new()));
        assert_eq!(config.agents_dir, PathBuf::from("/opt/agents"));
    }

    #[test]
    fn load_reads_file_and_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agentrun.toml");

        let config = AgentrunConfig::load(&path).unwrap();
        assert_eq!(config.deadline_secs, 60);

        std::fs::write(&path, "deadline_secs = 2\npoll_interval_ms = 10\n").unwrap();
        let config = AgentrunConfig::load(&path).unwrap();
        assert_eq!(config.deadline(), Duration::from_secs(2));
        assert_eq!(config.poll_interval(), Duration::from_millis(10));
    }
}
