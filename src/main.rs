use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use corkboard::board::positioning::TargetPolicy;
use corkboard::config::CorkboardConfig;

mod cmd;

#[derive(Parser)]
#[command(name = "corkboard")]
#[command(version, about = "Multi-user Kanban board server")]
pub struct Cli {
    /// Debug-level logging (RUST_LOG still wins)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Directory holding `.corkboard/` (defaults to the current directory)
    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP and WebSocket server
    Serve {
        /// Port to serve on
        #[arg(short, long)]
        port: Option<u16>,

        /// Database path
        #[arg(long)]
        db_path: Option<PathBuf>,

        /// Enable dev mode (permissive CORS, bind all interfaces)
        #[arg(long)]
        dev: bool,

        /// Out-of-range move targets: clamp or reject
        #[arg(long)]
        policy: Option<TargetPolicy>,
    },
    /// Create the database and run migrations
    Init {
        /// Database path
        #[arg(long)]
        db_path: Option<PathBuf>,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default corkboard.toml file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    // A broken config file is reported by the command itself.
    let logging = CorkboardConfig::load_or_default(&project_dir)
        .map(|config| config.logging)
        .unwrap_or_default();
    if let Err(e) = corkboard::logging::init(&logging, cli.verbose) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    match &cli.command {
        Commands::Serve {
            port,
            db_path,
            dev,
            policy,
        } => {
            let overrides = corkboard::config::CliOverrides {
                port: *port,
                db_path: db_path.clone(),
                dev: *dev,
                policy: *policy,
            };
            cmd::cmd_serve(&project_dir, &overrides).await?;
        }
        Commands::Init { db_path } => cmd::cmd_init(&project_dir, db_path.clone())?,
        Commands::Config { command } => cmd::cmd_config(&project_dir, command.clone())?,
    }

    Ok(())
}
