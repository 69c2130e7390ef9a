//! receptord — the Receptor daemon.
//!
//! Loads the agent configuration, starts the ingestion pipeline (check
//! state store, transaction manager, batchers, forwarder, check manager)
//! and runs until Ctrl-C, then shuts every loop down in order.
//!
//! # Usage
//!
//! ```text
//! receptord run --config /etc/receptor/receptor.toml
//! receptord run --config receptor.toml --dry-run
//! receptord check-config --config receptor.toml
//! ```

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use receptor_core::AgentConfig;
use receptor_forwarder::{HttpTransport, HttpTransportConfig, PrintingTransport, Transport};
use receptor_handler::Pipeline;
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,receptor=debug";

#[derive(Parser)]
#[command(name = "receptord", about = "Receptor check ingestion daemon")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the pipeline until interrupted.
    Run {
        /// Path to the agent configuration file.
        #[arg(long, default_value = "/etc/receptor/receptor.toml")]
        config: PathBuf,

        /// Log payloads instead of sending them.
        #[arg(long)]
        dry_run: bool,
    },
    /// Load and validate a configuration file, then exit.
    CheckConfig {
        #[arg(long, default_value = "/etc/receptor/receptor.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Run { config, dry_run } => {
            let mut config = load_config(&config)?;
            config.forwarder_dry_run |= dry_run;
            config.validate()?;
            run(config).await
        }
        Command::CheckConfig { config } => {
            let config = load_config(&config)?;
            config.validate()?;
            info!(
                sts_url = %config.sts_url,
                state_root = %config.check_state_root_path.display(),
                transactional = config.check_transactionality_enabled,
                "configuration is valid"
            );
            Ok(())
        }
    }
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: &Path) -> anyhow::Result<AgentConfig> {
    let config = AgentConfig::from_file(path)
        .with_context(|| format!("loading configuration from {}", path.display()))?;
    info!(path = %path.display(), "configuration loaded");
    Ok(config)
}

async fn run(config: AgentConfig) -> anyhow::Result<()> {
    if config.forwarder_dry_run {
        info!("dry run: payloads are logged, not sent");
        serve(&config, PrintingTransport).await
    } else {
        let transport = HttpTransport::new(HttpTransportConfig::from_agent_config(&config)?)
            .context("building HTTP transport")?;
        info!(sts_url = %config.sts_url, "forwarding to intake");
        serve(&config, transport).await
    }
}

async fn serve<T: Transport>(config: &AgentConfig, transport: T) -> anyhow::Result<()> {
    info!(hostname = %config.hostname, "Receptor daemon starting");
    let pipeline = Pipeline::start(config, transport);

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("shutdown signal received");

    pipeline.shutdown().await;
    info!("Receptor daemon stopped");
    Ok(())
}
