//! pipeweld - CI pipeline composition tool
//!
//! Composes a project's CI configuration with pipeline execution
//! policies into a single stage/job graph, or validates individual
//! configuration documents.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod repository;

/// pipeweld - CI pipeline composition tool
#[derive(Parser, Debug)]
#[command(name = "pipeweld")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Compose a pipeline from project config and policies
    Compose(commands::compose::ComposeArgs),

    /// Validate a single configuration document
    Validate(commands::validate::ValidateArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_level.clone()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Compose(args) => commands::compose::run(&args),
        Commands::Validate(args) => commands::validate::run(&args),
    }
}
