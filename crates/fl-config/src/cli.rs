//! CLI flag overrides — the last and highest-precedence configuration layer.

use clap::Parser;

#[derive(Parser, Debug, Clone, Default)]
#[command(name = "fl-coordinator")]
#[command(about = "Federated learning coordination core")]
pub struct CliArgs {
    /// Path to a config file (JSON or TOML, by extension)
    #[arg(long)]
    pub config: Option<String>,

    #[arg(long)]
    pub port: Option<u16>,

    #[arg(long)]
    pub metrics_port: Option<u16>,

    #[arg(long)]
    pub rounds: Option<u32>,

    #[arg(long)]
    pub stay_alive_after_training: bool,
}

impl CliArgs {
    /// Apply any flags the caller actually set over the layered config.
    pub fn apply(&self, cfg: &mut super::CoordinatorConfig) {
        if let Some(port) = self.port {
            cfg.port = port;
        }
        if let Some(metrics_port) = self.metrics_port {
            cfg.metrics_port = metrics_port;
        }
        if let Some(rounds) = self.rounds {
            cfg.rounds = rounds;
        }
        if self.stay_alive_after_training {
            cfg.stay_alive_after_training = true;
        }
    }
}
