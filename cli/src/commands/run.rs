use crate::error::CliError;
use crate::output;
use anyhow::Result;
use clap::Args;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::info;
use vigil_core::config::{apply_batch, ModuleHandlers};
use vigil_core::prelude::*;

/// Arguments for the run command
#[derive(Args)]
pub struct RunArgs {
    /// Configuration batch files to load before starting
    #[arg(short, long = "config", value_name = "FILE")]
    pub configs: Vec<PathBuf>,

    /// How long to run, in seconds (0 = run until killed)
    #[arg(short, long, default_value_t = 0)]
    pub duration: u64,

    /// Seconds between component status summaries
    #[arg(short, long, default_value_t = 10)]
    pub status_interval: u64,

    /// Number of worker threads
    #[arg(long, default_value_t = 4)]
    pub workers: usize,
}

/// Run the engine, echoing results and periodic health summaries.
pub fn execute(args: RunArgs, verbose: bool) -> Result<()> {
    if args.status_interval == 0 {
        return Err(
            CliError::invalid_input("status interval must be non-zero", "try --status-interval 10")
                .into(),
        );
    }

    let engine = Engine::with_config(EngineConfig {
        workers: args.workers,
        ..Default::default()
    });

    engine.on_test_result(move |event: &TestResultEvent| {
        output::event_line("test", &event.test, event.instance.as_deref(), event.result);
    });
    engine.on_rule_result(move |event: &RuleResultEvent| {
        output::event_line("rule", &event.rule, event.instance.as_deref(), event.result);
        if let Some(by) = &event.suppressed_by {
            println!("         suppressed by {}", by);
        }
    });
    engine.on_action_result(move |event: &ActionResultEvent| {
        output::event_line(
            "action",
            &event.action,
            event.instance.as_deref(),
            event.result,
        );
    });
    engine.on_user_alert(move |event: &UserAlertEvent| {
        println!("  ALERT  {}: {}", event.action, event.text);
    });

    for file in &args.configs {
        let path = file.display().to_string();
        if !file.exists() {
            engine.shutdown();
            return Err(CliError::file_not_found(&path).into());
        }
        let text = std::fs::read_to_string(file)?;
        let report = apply_batch(&engine, &path, &text, &ModuleHandlers::default())
            .map_err(|err| CliError::configuration_error(&path, &err.to_string()))?;
        info!(
            config = %path,
            applied = report.applied,
            failed = report.failed,
            "configuration loaded"
        );
        if verbose {
            for error in &report.errors {
                println!("  dropped: {}", error);
            }
        }
    }

    let started = Instant::now();
    let status_every = Duration::from_secs(args.status_interval);
    let mut next_status = started + status_every;

    info!(duration = args.duration, "engine running");
    loop {
        std::thread::sleep(Duration::from_millis(250));

        if Instant::now() >= next_status {
            next_status += status_every;
            output::heading("Components");
            for name in engine.list_objects(ObjKind::Component) {
                if let Some(snapshot) = engine.component_snapshot(&name) {
                    output::component_line(&snapshot);
                }
            }
        }

        if args.duration > 0 && started.elapsed() >= Duration::from_secs(args.duration) {
            break;
        }
    }

    output::heading("Final state");
    for name in engine.list_objects(ObjKind::Component) {
        if let Some(snapshot) = engine.component_snapshot(&name) {
            output::component_line(&snapshot);
        }
    }

    engine.shutdown();
    Ok(())
}
