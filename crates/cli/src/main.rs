//! huddle CLI: the main entry point.
//!
//! Commands:
//! - `run`: Connect to Mattermost and answer until interrupted
//! - `doctor`: Check configuration and server reachability
//! - `config`: Print the effective configuration

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(
    name = "huddle",
    about = "huddle: a group-chat agent for Mattermost",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the TOML config file
    #[arg(short, long, global = true, env = "HUDDLE_CONFIG", default_value = huddle_config::DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and answer messages until Ctrl-C
    Run,

    /// Diagnose configuration and connectivity
    Doctor,

    /// Show the effective configuration (secrets redacted)
    Config {
        /// Print a default config file instead
        #[arg(long)]
        default: bool,
    },
}

fn init_tracing(verbose: bool, json: bool) {
    let filter = if verbose { "debug" } else { "info" };
    let builder = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Before parsing, so `.env` can supply HUDDLE_CONFIG too.
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.json);

    match cli.command {
        Commands::Run => commands::run::run(&cli.config).await?,
        Commands::Doctor => commands::doctor::run(&cli.config).await?,
        Commands::Config { default } => commands::config_cmd::show(&cli.config, default)?,
    }

    Ok(())
}
