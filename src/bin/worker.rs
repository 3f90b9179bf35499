//! Worker binary

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use storegrid::{common::config::Config, WorkerServer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "storegrid-worker")]
#[command(about = "storegrid worker: owns one hash partition of the catalog")]
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
    /// Start worker server
    Serve {
        /// Bind address for coordinator commands
        #[arg(long)]
        bind: Option<String>,

        /// Coordinator address
        #[arg(long)]
        coordinator: Option<String>,

        /// Reducer address
        #[arg(long)]
        reducer: Option<String>,
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
            coordinator,
            reducer,
        } => {
            let mut worker_config = config.worker;
            if let Some(bind) = bind {
                worker_config.bind_addr = bind.parse()?;
            }
            if let Some(coordinator) = coordinator {
                worker_config.coordinator_addr = coordinator;
            }
            if let Some(reducer) = reducer {
                worker_config.reducer_addr = reducer;
            }

            WorkerServer::new(worker_config).serve().await?;
        }
    }

    Ok(())
}
