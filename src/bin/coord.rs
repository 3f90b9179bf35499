//! Coordinator binary

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use storegrid::{common::config::Config, common::parse_duration, CoordinatorServer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "storegrid-coord")]
#[command(about = "storegrid coordinator: routing, membership and result correlation")]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to ./storegrid.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start coordinator server
    Serve {
        /// Bind address for clients, workers and the reducer
        #[arg(long)]
        bind: Option<String>,

        /// Replication factor for directed commands
        #[arg(long)]
        replication: Option<usize>,

        /// Re-check interval while waiting for workers or results (e.g. 1s, 500ms)
        #[arg(long)]
        recheck: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Commands::Serve {
            bind,
            replication,
            recheck,
        } => {
            // CLI flags take priority over the file and environment
            let mut coord_config = config.coordinator;
            if let Some(bind) = bind {
                coord_config.bind_addr = bind.parse()?;
            }
            if let Some(replication) = replication {
                if replication == 0 {
                    anyhow::bail!("--replication must be at least 1");
                }
                coord_config.replication_factor = replication;
            }
            if let Some(recheck) = recheck {
                coord_config.recheck_interval_ms = parse_duration(&recheck)?.as_millis() as u64;
            }

            CoordinatorServer::new(coord_config).serve().await?;
        }
    }

    Ok(())
}
