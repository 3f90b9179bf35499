//! Reducer binary

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use storegrid::{common::config::Config, ReducerServer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "storegrid-reducer")]
#[command(about = "storegrid reducer: merges per-worker partial results")]
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
    /// Start reducer server
    Serve {
        /// Bind address for partial submissions
        #[arg(long)]
        bind: Option<String>,

        /// Coordinator address for merged results
        #[arg(long)]
        coordinator: Option<String>,
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
        Commands::Serve { bind, coordinator } => {
            let mut reducer_config = config.reducer;
            if let Some(bind) = bind {
                reducer_config.bind_addr = bind.parse()?;
            }
            if let Some(coordinator) = coordinator {
                reducer_config.coordinator_addr = coordinator;
            }

            ReducerServer::new(reducer_config).serve().await?;
        }
    }

    Ok(())
}
