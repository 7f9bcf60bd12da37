use std::process::ExitCode;

use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;
use warden_core::error::WardenError;
use warden_core::models::sync::RunMode;

mod commands;

#[derive(Parser)]
#[command(name = "warden", about = "Identity and entitlement sync orchestrator", version)]
struct Cli {
    /// Path to configuration file
    #[arg(long, default_value = "warden.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Initialize Warden data directory and configuration
    Init {
        /// Data directory path
        #[arg(long, default_value = "/var/lib/warden")]
        data_dir: String,
    },
    /// Run one sync pass over every due connector
    Sync {
        /// Run mode: full or discovery
        #[arg(long, default_value = "full")]
        mode: RunMode,
    },
    /// Keep both run modes on schedule until interrupted
    Worker,
    /// Ask running workers for an immediate pass
    Resync {
        /// Run mode: full or discovery
        #[arg(long, default_value = "full")]
        mode: RunMode,
    },
    /// Show locks, connector schedules and recent runs
    Status,
}

/// Exit status for operator interrupt.
const EXIT_INTERRUPTED: u8 = 130;

fn exit_code(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<WardenError>() {
        Some(WardenError::Canceled) => EXIT_INTERRUPTED,
        _ => 1,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Init { data_dir } => commands::init::run(&data_dir).await,
        Commands::Sync { mode } => commands::sync::run(&cli.config, mode).await,
        Commands::Worker => commands::worker::run(&cli.config).await,
        Commands::Resync { mode } => commands::resync::run(&cli.config, mode).await,
        Commands::Status => commands::status::run(&cli.config).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            eprintln!("Error: {e:#}");
            ExitCode::from(exit_code(&e))
        }
    }
}
