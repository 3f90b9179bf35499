//! CLI for sending catalog commands

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use storegrid::client::{render_reply, send_command};

#[derive(Parser)]
#[command(name = "storegrid")]
#[command(about = "storegrid catalog CLI")]
#[command(version)]
struct Cli {
    /// Coordinator address
    #[arg(long, default_value = "127.0.0.1:12345")]
    coordinator: String,

    /// Connect timeout in seconds
    #[arg(long, default_value = "5")]
    timeout: u64,

    /// Print the raw reply line instead of a rendered one
    #[arg(long)]
    raw: bool,

    /// Command name, e.g. ADD_STORE, SEARCH, PURCHASE_PRODUCT
    command: String,

    /// Command payload
    payload: Option<String>,

    /// Read the payload from a file (e.g. a store JSON document)
    #[arg(long, conflicts_with = "payload")]
    file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let payload = match (&cli.payload, &cli.file) {
        (Some(payload), _) => payload.clone(),
        (None, Some(file)) => std::fs::read_to_string(file)?,
        (None, None) => String::new(),
    };

    let reply = send_command(
        &cli.coordinator,
        &cli.command,
        &payload,
        Duration::from_secs(cli.timeout),
    )
    .await?;

    if cli.raw {
        println!("{}", reply);
    } else {
        println!("{}", render_reply(&cli.command, &reply));
    }

    Ok(())
}
