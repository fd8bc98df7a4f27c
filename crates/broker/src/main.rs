use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use lattice_broker::{Broker, BrokerCommand};
use lattice_domain::BrokerConfig;

#[derive(Parser)]
#[command(name = "latticed", about = "Hierarchical message broker with federated upstreams")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "lattice.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let config = load_config(&cli.config)?;
    let broker = Broker::new(&config).context("starting broker")?;

    let (commands, command_rx) = mpsc::channel::<BrokerCommand>(64);
    let event_loop = tokio::spawn(broker.run(command_rx));

    tracing::info!(storage = %config.storage.root.display(), "lattice broker running");
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");

    drop(commands);
    event_loop.await?;
    Ok(())
}

fn load_config(path: &Path) -> anyhow::Result<BrokerConfig> {
    if !path.exists() {
        tracing::info!(path = %path.display(), "no config file, using defaults");
        return Ok(BrokerConfig::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
