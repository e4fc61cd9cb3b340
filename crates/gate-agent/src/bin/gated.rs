//! Main binary for the infergate daemon (gated)

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gate_agent::init_gateway;
use gate_core::Config;
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "gated")]
#[command(about = "Health monitoring and cluster gateway for inference engines")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level, overrides the configuration file
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway
    Start {
        /// Override configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Generate default configuration
    Config {
        /// Output file path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Validate configuration
    Validate {
        /// Configuration file to validate
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Start { ref config }) => {
            let config_path = config.clone().or(cli.config.clone());
            start_gateway(config_path, &cli).await
        }
        Some(Commands::Config { output }) => generate_config(output),
        Some(Commands::Validate { config }) => validate_config(config),
        None => {
            let config_path = cli.config.clone();
            start_gateway(config_path, &cli).await
        }
    }
}

async fn start_gateway(config_path: Option<PathBuf>, cli: &Cli) -> Result<()> {
    let mut config = match config_path {
        Some(path) => Config::load_from_file(&path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => Config::load().context("Failed to load configuration")?,
    };

    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }

    let gateway = init_gateway(&config)
        .await
        .context("Failed to initialize gateway")?;
    info!(bind_addr = %config.server.bind_addr, "Starting gated");

    if let Err(e) = gateway.run().await {
        error!("Gateway failed: {}", e);
        std::process::exit(1);
    }

    Ok(())
}

fn generate_config(output: Option<PathBuf>) -> Result<()> {
    let config = Config::default();

    match output {
        Some(path) => {
            config
                .to_file(&path)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Configuration written to: {}", path.display());
        }
        None => print!("{}", config.to_yaml().context("Failed to render configuration")?),
    }

    Ok(())
}

fn validate_config(path: PathBuf) -> Result<()> {
    println!("Validating configuration: {}", path.display());

    match Config::load_from_file(&path) {
        Ok(_) => {
            println!("Configuration is valid");
            Ok(())
        }
        Err(e) => {
            println!("Configuration is invalid: {}", e);
            Err(anyhow::anyhow!("Invalid configuration {}: {}", path.display(), e))
        }
    }
}
