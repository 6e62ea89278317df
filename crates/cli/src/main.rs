//! pixl CLI - Main Entry Point
//!
//! Runs visual regression scenarios, approves the latest run as the new
//! reference set and lists what a pattern would run.

use clap::{Parser, Subcommand};

mod commands;
mod output;

use commands::{approve, list, run};

/// pixl - scenario-driven visual regression testing
#[derive(Parser)]
#[command(name = "pixl")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Output format
    #[arg(long, default_value = "table", global = true, env = "PIXL_FORMAT")]
    format: output::OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every matching scenario and compare against the reference set
    Run(run::RunArgs),

    /// Approve the last run as the new reference set
    Approve(approve::ApproveArgs),

    /// List matching scenarios and their storage folders
    List(list::ListArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .init();

    let code = match cli.command {
        Commands::Run(args) => run::execute(args, cli.format).await?,
        Commands::Approve(args) => approve::execute(args)?,
        Commands::List(args) => list::execute(args, cli.format)?,
    };

    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
