//! vwctl - operator CLI for the VW daemon supervisor
//!
//! Sends prediction requests, triggers model dumps and shows the state of a
//! running `vwd-agent`.

mod client;
mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{predict, status};
use std::path::PathBuf;

/// VW daemon supervisor CLI
#[derive(Parser)]
#[command(name = "vwctl")]
#[command(author, version, about = "CLI for the VW daemon supervisor", long_about = None)]
pub struct Cli {
    /// Agent API URL (can also be set via VWCTL_API_URL env var)
    #[arg(long, env = "VWCTL_API_URL", default_value = "http://localhost:8080")]
    pub api_url: String,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Get predictions for newline-separated examples
    Predict {
        /// File with one example per line (stdin if omitted or "-")
        input: Option<PathBuf>,
    },

    /// Ask the daemon to save its model
    Dump {
        /// Target path (defaults to the agent's configured path)
        #[arg(long)]
        path: Option<PathBuf>,
    },

    /// Show the active daemon and component health
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let client = client::ApiClient::new(&cli.api_url)?;

    match cli.command {
        Commands::Predict { input } => {
            predict::predict(&client, input.as_deref(), cli.format).await?;
        }
        Commands::Dump { path } => {
            predict::dump(&client, path, cli.format).await?;
        }
        Commands::Status => {
            status::show_status(&client, cli.format).await?;
        }
    }

    Ok(())
}
