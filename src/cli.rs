//! Interface de linha de comando do AGENTRUN baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (run, agents, check)
//! e flags globais (--config, --deadline-secs, --verbose).

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::DEFAULT_CONFIG_FILE;

/// AGENTRUN — Executa agentes isolados com prazo e acompanha seus jobs.
#[derive(Debug, Parser)]
#[command(name = "agentrun", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Caminho do arquivo de configuração.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Sobrescreve o prazo de execução (segundos) definido na configuração.
    #[arg(long, global = true)]
    pub deadline_secs: Option<u64>,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Submete um job por agente com o mesmo payload e aguarda todos terminarem.
    Run {
        /// Nomes dos agentes a executar.
        #[arg(required = true)]
        agents: Vec<String>,

        /// Payload literal enviado ao stdin de cada agente.
        #[arg(long, conflicts_with = "file")]
        payload: Option<String>,

        /// Arquivo cujo conteúdo é usado como payload.
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Lista os agentes conhecidos.
    Agents,

    /// Verifica a saúde de todos os agentes sem executá-los.
    Check {
        /// Emite o relatório em JSON.
        #[arg(long)]
        json: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_parses_run_subcommand() {
        let cli = Cli::parse_from(["agentrun", "run", "Echo", "Sun", "--payload", "{\"x\":1}"]);
        match cli.command {
            Command::Run {
                agents,
                payload,
                file,
            } => {
                assert_eq!(agents, vec!["Echo", "Sun"]);
                assert_eq!(payload.unwrap(), "{\"x\":1}");
                assert!(file.is_none());
            }
            _ => panic!("expected Run command"),
        }
    }

    #[test]
    fn cli_run_requires_an_agent() {
        assert!(Cli::try_parse_from(["agentrun", "run"]).is_err());
    }

    #[test]
    fn cli_rejects_payload_and_file_together() {
        let result = Cli::try_parse_from([
            "agentrun", "run", "Echo", "--payload", "x", "--file", "p.json",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn cli_parses_global_flags() {
        let cli = Cli::parse_from([
            "agentrun",
            "--config",
            "custom.toml",
            "--deadline-secs",
            "5",
            "--verbose",
            "agents",
        ]);
        assert!(cli.verbose);
        assert_eq!(cli.config, PathBuf::from("custom.toml"));
        assert_eq!(cli.deadline_secs, Some(5));
        assert!(matches!(cli.command, Command::Agents));
    }

    #[test]
    fn cli_defaults_config_path() {
        let cli = Cli::parse_from(["agentrun", "check"]);
        assert_eq!(cli.config, PathBuf::from("agentrun.toml"));
        assert!(matches!(cli.command, Command::Check { json: false }));
    }

    #[test]
    fn cli_check_accepts_json_flag() {
        let cli = Cli::parse_from(["agentrun", "check", "--json"]);
        assert!(matches!(cli.command, Command::Check { json: true }));
    }

    #[test]
    fn cli_verify() {
        Cli::command().debug_assert();
    }
}
