//! Coordination core entry point. Parses configuration, runs the startup
//! policy gate, then serves the control API and the Strategy Engine loop
//! concurrently until the process is told to stop.

use std::sync::Arc;

use clap::Parser;
use fl_coordinator::{Coordinator, HttpClientManager};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug, Default)]
#[command(name = "fl-coordinator")]
#[command(about = "Federated learning coordination core")]
struct Args {
    #[command(flatten)]
    config: fl_config::CliArgs,

    /// Comma-separated client base URLs this process distributes
    /// training rounds to. Client registration/discovery is outside this
    /// core's scope; this is deliberately a simple static list.
    #[arg(long, value_delimiter = ',')]
    client_urls: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = fl_config::load(args.config.config.as_deref(), &args.config)?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let client_manager_policy = fl_coordinator::build_policy_client(&config);
    let client_manager = Arc::new(HttpClientManager::new(args.client_urls, client_manager_policy));
    let coordinator = Arc::new(Coordinator::bootstrap(config.clone(), client_manager).await?);

    match coordinator.startup_policy_check().await {
        fl_coordinator::StartupOutcome::Proceed => {
            tracing::info!("startup policy check passed");
        }
        fl_coordinator::StartupOutcome::DeniedPermanently { reason } => {
            tracing::error!(reason, "startup denied by policy after monitoring window, exiting");
            std::process::exit(2);
        }
    }

    let app = fl_coordinator::api::router(coordinator.clone());
    let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.metrics_port)).await?;
    tracing::info!(host = %config.host, port = config.metrics_port, "control API listening");

    {
        let coordinator = coordinator.clone();
        tokio::spawn(async move {
            coordinator.run_strategy_to_completion().await;
        });
    }
    {
        let coordinator = coordinator.clone();
        tokio::spawn(async move {
            coordinator.stay_alive_supervisor().await;
        });
    }
    {
        let coordinator = coordinator.clone();
        tokio::spawn(async move {
            coordinator.watch_for_fatal().await;
        });
    }
    {
        let coordinator = coordinator.clone();
        tokio::spawn(async move {
            coordinator.poll_policy_version().await;
        });
    }

    axum::serve(listener, app).await?;
    Ok(())
}
