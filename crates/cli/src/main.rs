//! Golem CLI - Main Entry Point
//!
//! Runs suites, directories and single test cases of a Golem project against
//! one or more browser drivers.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;
mod output;

use commands::{list, run};

/// Golem - parallel browser test runner
#[derive(Parser)]
#[command(name = "golem")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Directory holding `projects/` and `golem.toml`
    #[arg(long, env = "GOLEM_ROOT", default_value = ".", global = true)]
    root: PathBuf,

    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: output::OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a suite, a test directory or a single test case
    Run(run::RunArgs),

    /// List projects, or the suites and test cases of a project
    List(list::ListArgs),

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Commands::Run(args) => run::execute(args, &cli.root, cli.format).await,
        Commands::List(args) => list::execute(args, &cli.root, cli.format),
        Commands::Version => {
            println!("Golem v{}", golem_core::VERSION);
            Ok(())
        }
    };

    if let Err(e) = result {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
}
