//! Interface de terminal do AGENTRUN — spinners e saída colorida.
//!
//! Usa as crates `indicatif` para spinners de progresso e `console` para
//! estilização com cores. Cada [`JobProgress`] acompanha visualmente
//! um job no terminal enquanto ele é consultado no registro.

use console::Style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use crate::agents::{HealthReport, HealthStatus};
use crate::state_machine::{JobId, JobRecord, JobStatus};

/// Indicador visual de progresso para um job no terminal.
///
/// Exibe um spinner animado enquanto o job não termina e mensagens
/// coloridas para sucesso (verde), erro (vermelho) e timeout (amarelo).
pub struct JobProgress {
    // Spinner do indicatif.
    pb: ProgressBar,
    // Prefixo exibido em todas as mensagens: "#<id> <agente>".
    label: String,
    green: Style,
    red: Style,
    yellow: Style,
}

impl JobProgress {
    /// Inicia o spinner dentro de `multi` e retorna a instância de progresso.
    pub fn start(multi: &MultiProgress, id: JobId, agent: &str) -> Self {
        let pb = multi.add(ProgressBar::new_spinner());
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg}")
                .expect("invalid template"),
        );
        let label = format!("#{id} {agent}");
        pb.set_message(format!("{label}: {}", JobStatus::Queued));
        pb.enable_steady_tick(std::time::Duration::from_millis(100));

        Self {
            pb,
            label,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow().bold(),
        }
    }

    /// Atualiza a mensagem do spinner para refletir o status atual.
    pub fn update_status(&self, status: JobStatus) {
        self.pb.set_message(format!("{}: {status}", self.label));
    }

    /// Finaliza o spinner e exibe o status terminal do job.
    pub fn complete(&self, record: &JobRecord) {
        let (mark, style) = match record.status {
            JobStatus::Done => ("✓", &self.green),
            JobStatus::Timeout => ("⏱", &self.yellow),
            _ => ("✗", &self.red),
        };
        let exit = record
            .exit_code
            .map(|c| format!(" (exit {c})"))
            .unwrap_or_default();
        self.pb.finish_with_message(format!(
            "{} {}: {}{exit}",
            style.apply_to(mark),
            self.label,
            record.status
        ));
    }
}

/// Imprime o registro do job formatado em JSON.
pub fn print_record(record: &JobRecord) {
    println!(
        "{}",
        serde_json::to_string_pretty(record).unwrap_or_default()
    );
}

/// Imprime o relatório de saúde dos agentes com um resumo colorido.
pub fn print_health(report: &HealthReport) {
    let green = Style::new().green();
    let yellow = Style::new().yellow();
    let red = Style::new().red();

    for agent in &report.agents {
        match agent.status {
            HealthStatus::Healthy => println!("{} {}: Healthy", green.apply_to("✓"), agent.agent),
            HealthStatus::Warning => println!(
                "{} {}: Warning - {}",
                yellow.apply_to("!"),
                agent.agent,
                agent.errors.join(", ")
            ),
            HealthStatus::Missing => println!("{} {}: Missing", red.apply_to("✗"), agent.agent),
        }
    }
    println!();
    println!("Healthy: {}", report.healthy);
    println!("Warnings: {}", report.warnings);
    println!("Missing: {}", report.missing);
    println!("Health Rate: {}%", report.health_rate());
}
