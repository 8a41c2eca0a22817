mod config;
mod logging;
mod server;
mod signals;

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::config::{AppConfig, CliOverrides};

/// Discovery Server - caching front end for serverset membership lookups
#[derive(Parser)]
#[command(name = "discovery-server")]
#[command(about = "Discovery Server - caching front end for serverset membership lookups")]
#[command(version)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Public listener address override (overrides config)
    #[arg(long)]
    http_addr: Option<SocketAddr>,

    /// Admin listener address override (overrides config)
    #[arg(long)]
    admin_addr: Option<SocketAddr>,

    /// Print effective configuration (JSON) and exit
    #[arg(long)]
    print_config: bool,

    /// Log verbosity level (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the server
    Run,
    /// Validate configuration and exit
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Layering: defaults -> YAML -> env (DISCOVERY__*) -> CLI overrides
    let mut config = AppConfig::load(cli.config.as_deref())?;
    config.apply_cli_overrides(&CliOverrides {
        http_addr: cli.http_addr,
        admin_addr: cli.admin_addr,
    });

    logging::init(&config.logging, cli.verbose)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        commit = option_env!("GIT_COMMIT").unwrap_or("unknown"),
        "Discovery Server starting"
    );

    if cli.print_config {
        println!("{}", config.to_json()?);
        return Ok(());
    }

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            config.validate()?;
            server::run(&config).await
        }
        Commands::Check => check_config(&config),
    }
}

fn check_config(config: &AppConfig) -> Result<()> {
    config.validate()?;
    println!("Configuration is valid");
    println!("{}", config.to_json()?);
    Ok(())
}
