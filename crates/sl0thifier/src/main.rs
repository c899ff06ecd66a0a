//! sl0thifier CLI - batch image enhancement for dataset preparation.
//!
//! Every image goes through face restoration, Real-ESRGAN upscaling, CLAHE
//! contrast enhancement, optional background removal and a final exact
//! resize, and is written next to its siblings in one output directory.
//!
//! # Usage
//!
//! ```bash
//! # Enhance a directory to 1024x1024
//! sl0thifier process ./photos --width 1024 --height 1024
//!
//! # Cut subjects out onto white, write a JSON report
//! sl0thifier process ./photos --remove-background --background-color white --report run.json
//!
//! # List installed upscaler models
//! sl0thifier models list
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use sl0thifier_core::Config;

mod cli;
mod logging;

/// sl0thifier - face restore, upscale, contrast enhance and resize image batches.
#[derive(Parser, Debug)]
#[command(name = "sl0thifier")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose (debug) logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long, global = true)]
    json_logs: bool,

    /// Use this config file instead of the default location
    #[arg(long, global = true, env = "SL0THIFIER_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Enhance images and write them at an exact target size
    Process(cli::process::ProcessArgs),

    /// Inspect installed upscaler and ONNX models
    Models(cli::models::ModelsArgs),

    /// View and manage configuration
    Config(cli::config::ConfigArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logging isn't up yet, so config problems go to stderr directly.
    let loaded = match &cli.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    };
    let config = match loaded {
        Ok(config) => config,
        Err(e) if cli.config.is_some() => return Err(e.into()),
        Err(e) => {
            eprintln!(
                "Warning: Failed to load config: {e}\n  \
                 Using default configuration. Check your config file with `sl0thifier config path`."
            );
            Config::default()
        }
    };
    logging::init_from_config(&config, cli.verbose, cli.json_logs);

    tracing::debug!("sl0thifier v{}", sl0thifier_core::VERSION);

    match cli.command {
        Commands::Process(args) => cli::process::execute(args, config).await,
        Commands::Models(args) => cli::models::execute(args, &config),
        Commands::Config(args) => cli::config::execute(args, &config, cli.config.as_deref()),
    }
}
