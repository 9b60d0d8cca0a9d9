//! rolewalk - offline tooling for saved access graphs
//!
//! - `report`: print a saved graph as a tree and optionally as Graphviz DOT
//! - `check-config`: validate a scan configuration file

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;

mod commands;

/// rolewalk CLI
#[derive(Parser)]
#[command(name = "rolewalk")]
#[command(about = "Inspect identity access graphs discovered by rolewalk")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the access paths stored in a saved graph
    Report {
        /// Saved graph file
        #[arg(short, long, env = "ROLEWALK_GRAPH")]
        graph: PathBuf,

        /// Start the listing at these identities instead of the entry points
        #[arg(short, long)]
        root: Vec<String>,

        /// Also write the graph as Graphviz DOT to this file
        #[arg(long)]
        dot: Option<PathBuf>,
    },

    /// Load and validate a scan configuration file
    CheckConfig {
        /// Path to configuration file
        #[arg(env = "ROLEWALK_CONFIG")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with_target(cli.verbose)
        .with_writer(std::io::stderr)
        .init();

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal (Ctrl+C)");
            on_signal.cancel();
        }
    });

    match cli.command {
        Command::Report { graph, root, dot } => {
            let report = commands::report(&graph, &root, dot.as_deref(), &cancel)?;
            print!("{}", report);
        }
        Command::CheckConfig { config } => {
            let summary = commands::check_config(&config)?;
            println!("{}", summary);
        }
    }

    Ok(())
}
