//! Infrawatch - behavioral analytics for DEX token markets
//!
//! Detects infrastructure wallets absorbing large sells, confirms price
//! stabilization, and emits ranked signals. Trading is virtual only: the
//! replay sandbox never routes or signs an order.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::error;

use infrawatch::cli::commands;
use infrawatch::config::{Config, ReplaySpeed};

/// Infrastructure-wallet detector and replay sandbox
#[derive(Parser)]
#[command(name = "infrawatch")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a recorded dataset through the full pipeline
    Replay {
        /// Dataset path (JSON lines); overrides the config
        #[arg(long)]
        dataset: Option<String>,

        /// First slot to include
        #[arg(long)]
        start_slot: Option<u64>,

        /// Last slot to include
        #[arg(long)]
        end_slot: Option<u64>,

        /// Pace: 1x, 10x, 100x, or max
        #[arg(long)]
        speed: Option<String>,

        /// Fill-simulator seed
        #[arg(long)]
        seed: Option<u32>,

        /// Output directory for run artifacts
        #[arg(long)]
        output: Option<String>,
    },

    /// Run against the live transaction feed
    Live,

    /// Show current configuration (endpoints masked)
    Config,

    /// Validate a recorded dataset without replaying it
    Dataset {
        /// Dataset path (JSON lines)
        path: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("infrawatch=info".parse().unwrap()),
        )
        .with_target(true)
        .init();

    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration (fail fast on invalid values)
    let mut config = match Config::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Replay {
            dataset,
            start_slot,
            end_slot,
            speed,
            seed,
            output,
        } => {
            if let Some(dataset) = dataset {
                config.replay.dataset_path = dataset;
            }
            if let Some(start_slot) = start_slot {
                config.replay.start_slot = Some(start_slot);
            }
            if let Some(end_slot) = end_slot {
                config.replay.end_slot = Some(end_slot);
            }
            if let Some(speed) = speed {
                config.replay.speed = parse_speed(&speed)?;
            }
            if let Some(seed) = seed {
                config.replay.seed = seed;
            }
            if let Some(output) = output {
                config.replay.output_dir = output;
            }
            if config.replay.dataset_path.is_empty() {
                anyhow::bail!("No dataset: pass --dataset or set replay.dataset_path");
            }
            commands::replay(&config).await
        }
        Commands::Live => commands::live(&config).await,
        Commands::Config => commands::show_config(&config),
        Commands::Dataset { path } => commands::validate_dataset(&path),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        std::process::exit(1);
    }

    Ok(())
}

fn parse_speed(s: &str) -> Result<ReplaySpeed> {
    match s {
        "1x" => Ok(ReplaySpeed::X1),
        "10x" => Ok(ReplaySpeed::X10),
        "100x" => Ok(ReplaySpeed::X100),
        "max" => Ok(ReplaySpeed::Max),
        other => anyhow::bail!("Unknown speed '{}', expected 1x|10x|100x|max", other),
    }
}
