//! crewforge CLI — the main entry point.
//!
//! Commands:
//! - `run`    — Run one agent of the crew against a task
//! - `tools`  — List the tools an MCP server exposes
//! - `check`  — Validate the crew configuration

use clap::{Parser, Subcommand};
use crewforge_config::CrewConfig;
use std::path::PathBuf;

mod commands;
mod crew;

#[derive(Parser)]
#[command(
    name = "crewforge",
    about = "crewforge — autonomous agents with MCP tool servers",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Crew configuration file (defaults to ~/.crewforge/crew.toml)
    #[arg(short, long, global = true, env = "CREWFORGE_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an agent against a task
    Run {
        /// Role of the agent to run
        #[arg(short, long)]
        agent: String,

        /// Task description
        #[arg(short, long)]
        task: String,

        /// Print the full run outcome as JSON
        #[arg(long)]
        json: bool,
    },

    /// Start an MCP server and list its tools
    Tools {
        /// Name of the server in the configuration
        #[arg(short, long)]
        server: String,
    },

    /// Validate the configuration and print a summary
    Check {
        /// Also print the effective configuration as TOML
        #[arg(long)]
        print: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let path = cli.config.unwrap_or_else(CrewConfig::default_path);
    let config =
        CrewConfig::load_with_env(&path).map_err(|e| format!("Failed to load config: {e}"))?;

    match cli.command {
        Commands::Run { agent, task, json } => {
            commands::run::run(&config, &agent, &task, json).await?
        }
        Commands::Tools { server } => commands::tools::run(&config, &server).await?,
        Commands::Check { print } => commands::check::run(&config, print)?,
    }

    Ok(())
}
