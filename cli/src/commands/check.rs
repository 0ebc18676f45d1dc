use crate::error::CliError;
use crate::output;
use anyhow::Result;
use clap::Args;
use colored::Colorize;
use std::path::PathBuf;
use vigil_core::config::{apply_batch, ModuleHandlers};
use vigil_core::{Engine, EngineConfig};

/// Arguments for the check command
#[derive(Args)]
pub struct CheckArgs {
    /// Configuration batch files to validate
    #[arg(required = true, value_name = "FILE")]
    pub files: Vec<PathBuf>,
}

/// Validate configuration batches against a throwaway engine.
pub fn execute(args: CheckArgs, verbose: bool) -> Result<()> {
    let engine = Engine::with_config(EngineConfig {
        workers: 1,
        internal_diagnostics: false,
        ..Default::default()
    });

    let mut failed = 0usize;
    for file in &args.files {
        let path = file.display().to_string();
        if !file.exists() {
            engine.shutdown();
            return Err(CliError::file_not_found(&path).into());
        }
        let text = std::fs::read_to_string(file)?;

        match apply_batch(&engine, &path, &text, &ModuleHandlers::default()) {
            Ok(report) if report.failed == 0 => {
                println!("{} {}", "ok".green().bold(), path);
                if verbose {
                    println!("  {} commands applied", report.applied);
                }
            }
            Ok(report) => {
                failed += report.failed;
                println!(
                    "{} {} ({} dropped)",
                    "warn".yellow().bold(),
                    path,
                    report.failed
                );
                for error in &report.errors {
                    println!("    {}", error);
                }
            }
            Err(err) => {
                engine.shutdown();
                return Err(CliError::configuration_error(&path, &err.to_string()).into());
            }
        }
    }

    engine.shutdown();

    if failed > 0 {
        output::heading("Summary");
        println!("  {} command(s) would be dropped", failed);
    }
    Ok(())
}
