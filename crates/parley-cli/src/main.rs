//! `parley` - run behaviour tests against a chat bot.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use parley_cli::gateway::GatewayTransport;
use parley_cli::summary::{ColorMode, TerminalReporter, render_failures, render_summary};
use parley_cli::{SuiteOutcome, run_suite};
use parley_core::ParleyConfig;
use tracing::{debug, info};

/// Parley - behaviour tests for chat bots
#[derive(Parser, Debug)]
#[command(name = "parley", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to the configuration file (defaults to parley.yml, parley.yaml or parley.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Color output mode (auto, always, never)
    #[arg(long, value_enum, default_value_t = ColorMode::Auto, global = true)]
    color: ColorMode,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the test suite (default if no subcommand given)
    Run(RunArgs),

    /// Print the resolved configuration with the token masked
    ShowConfig,
}

#[derive(Parser, Debug, Default)]
struct RunArgs {
    /// Test files or directories, overriding `test_files` from the config
    paths: Vec<PathBuf>,

    /// Default assertion timeout in milliseconds
    #[arg(long, value_name = "MS")]
    timeout_ms: Option<u64>,

    /// Write the execution report as JSON
    #[arg(long, value_name = "PATH")]
    report: Option<PathBuf>,

    /// Only print the final summary
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    cli.color.apply();

    let cwd = std::env::current_dir().context("Failed to resolve the working directory")?;
    let config = ParleyConfig::load(cli.config.as_deref(), &cwd)?;

    match cli.command {
        Some(Commands::ShowConfig) => show_config(&config),
        Some(Commands::Run(args)) => run_command(config, cwd, args).await,
        None => run_command(config, cwd, RunArgs::default()).await,
    }
}

fn show_config(config: &ParleyConfig) -> Result<()> {
    let yaml = serde_yaml::to_string(&config.redacted()).context("Failed to render config")?;
    print!("{}", yaml);
    if let Err(e) = config.validate() {
        eprintln!("{} {}", "warning:".yellow().bold(), e);
    }
    Ok(())
}

async fn run_command(mut config: ParleyConfig, cwd: PathBuf, args: RunArgs) -> Result<()> {
    if !args.paths.is_empty() {
        config.test_files = args.paths;
    }
    if let Some(timeout_ms) = args.timeout_ms {
        config.timeout_ms = timeout_ms;
    }
    config.validate()?;
    debug!(config = ?config, "Resolved configuration");

    let transport = Arc::new(GatewayTransport::new(
        config.gateway_url.clone(),
        config.token.clone(),
    ));
    let outcome = run_suite(&config, &cwd, transport, TerminalReporter::new(args.quiet)).await?;

    print_outcome(&outcome);
    if let Some(path) = &args.report {
        let json = serde_json::to_string_pretty(&outcome.report)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
        info!(path = %path.display(), "Wrote execution report");
    }

    if outcome.failed() {
        std::process::exit(1);
    }
    Ok(())
}

fn print_outcome(outcome: &SuiteOutcome) {
    for failure in &outcome.unreadable {
        eprintln!("{} {}", "skipped:".yellow().bold(), failure.error);
    }
    let failures = render_failures(&outcome.report);
    if !failures.is_empty() {
        println!("\n{}", failures.trim_end());
    }
    println!("\n{}", render_summary(&outcome.report));
}
