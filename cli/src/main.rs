use clap::{Parser, Subcommand};
use std::process;

mod commands;
mod error;
mod output;

use commands::{check, run};

/// Vigil - an embeddable online diagnostics engine and its CLI harness
#[derive(Parser)]
#[command(name = "vigil")]
#[command(author = "Vigil Contributors")]
#[command(version)]
#[command(about = "Run the Vigil diagnostics engine from JSON configuration batches", long_about = None)]
#[command(propagate_version = true)]
#[command(arg_required_else_help = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Load configuration batches and run the engine
    #[command(visible_alias = "r")]
    Run(run::RunArgs),

    /// Validate configuration batches without running the engine
    #[command(visible_alias = "c")]
    Check(check::CheckArgs),
}

fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    // Handle color output
    if cli.no_color {
        colored::control::set_override(false);
    }

    // Execute command
    let result = match cli.command {
        Commands::Run(args) => run::execute(args, cli.verbose),
        Commands::Check(args) => check::execute(args, cli.verbose),
    };

    // Handle errors
    if let Err(e) = result {
        eprintln!("Error: {}", e);
        if cli.verbose {
            eprintln!("\nCaused by:");
            for cause in e.chain().skip(1) {
                eprintln!("  {}", cause);
            }
        }
        process::exit(1);
    }
}
