//! Waypoint CLI - Command line interface for Waypoint
//!
//! Keeps an agent session inside a consent-gated development workflow.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use waypoint_core::{Config, WorkflowFlag};

use commands::{CheckArgs, PhasesArgs, ServeArgs, StateArgs};

/// Waypoint: workflow coordination for agent sessions
#[derive(Parser, Debug)]
#[command(name = "waypoint")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file to use instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Workflow state file (overrides config and env)
    #[arg(long, global = true, env = "WAYPOINT_STATE_FILE")]
    state_file: Option<PathBuf>,

    /// Workflow flag as JSON: true, false, ["discussion", ...] or {"review": true, ...}
    #[arg(long, global = true)]
    phases: Option<WorkflowFlag>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show version information
    Version,

    /// Run the engine over stdin/stdout
    #[command(visible_alias = "s")]
    Serve(ServeArgs),

    /// Show the resolved phase sequence
    Phases(PhasesArgs),

    /// Check whether a phase transition is permitted
    Check(CheckArgs),

    /// Read or update the workflow state file
    State(StateArgs),

    /// Show current configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // stdout carries responses in serve mode, so logs go to stderr
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    // Load configuration with overrides
    let config = Config::load_with_overrides(
        cli.config.as_deref(),
        cli.state_file.clone(),
        cli.phases.clone(),
    )?;

    if cli.verbose {
        tracing::info!(
            state_file = %config.workflow.state_file.display(),
            max_retries = config.retry.max_retries,
            "Configuration loaded"
        );
    }

    match cli.command {
        Some(Commands::Version) => {
            println!("waypoint {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Serve(args)) => {
            args.execute(&config).await?;
        }
        Some(Commands::Phases(args)) => {
            args.execute(&config)?;
        }
        Some(Commands::Check(args)) => {
            args.execute(&config)?;
        }
        Some(Commands::State(args)) => {
            args.execute(&config)?;
        }
        Some(Commands::Config) => {
            print_config(&config, cli.config.as_deref());
        }
        None => {
            println!("Waypoint - workflow coordination for agent sessions");
            println!();
            println!("Use --help for usage information");
        }
    }

    Ok(())
}

fn print_config(config: &Config, explicit: Option<&std::path::Path>) {
    println!("Waypoint Configuration");
    println!("======================");
    println!();
    println!("Workflow Settings:");
    match config.phase_sequence() {
        Ok(Some(sequence)) => println!("  phases: {}", sequence),
        Ok(None) => println!("  phases: (disabled)"),
        Err(e) => println!("  phases: invalid ({})", e),
    }
    println!("  state_file: {}", config.workflow.state_file.display());
    println!(
        "  guidance_dir: {}",
        config
            .workflow
            .guidance_dir
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(built-in)".to_string())
    );
    println!();
    println!("Retry Settings:");
    println!("  interval: {:?}", config.retry.interval);
    println!("  min_dwell: {:?}", config.retry.min_dwell);
    println!("  max_retries: {}", config.retry.max_retries);
    println!();
    println!("Monitor Settings:");
    println!("  poll_interval: {:?}", config.monitor.poll_interval);
    println!();

    let path = explicit
        .map(|p| p.to_path_buf())
        .or_else(Config::default_config_path);
    if let Some(path) = path {
        println!("Config file: {}", path.display());
        if path.exists() {
            println!("  (exists)");
        } else {
            println!("  (not found - using defaults)");
        }
    }
}
