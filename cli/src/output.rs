use colored::Colorize;
use vigil_core::prelude::*;

/// Print a section heading.
pub fn heading(text: &str) {
    println!("\n{}", text.bold().underline());
}

/// Render a result with a color matching its meaning.
pub fn result_label(result: DiagResult) -> String {
    match result {
        DiagResult::Pass => "pass".green().to_string(),
        DiagResult::Fail => "fail".red().bold().to_string(),
        DiagResult::Value(v) => format!("value({})", v).cyan().to_string(),
        DiagResult::InProgress => "in-progress".yellow().to_string(),
        DiagResult::Abort => "abort".yellow().bold().to_string(),
        DiagResult::Ignore => "ignore".dimmed().to_string(),
    }
}

/// Render health out of 1000 as a colored percentage.
pub fn health_label(health: i64) -> String {
    let percent = health as f64 / 10.0;
    let text = format!("{:.1}%", percent);
    if health >= 900 {
        text.green().to_string()
    } else if health >= 500 {
        text.yellow().to_string()
    } else {
        text.red().bold().to_string()
    }
}

/// Print one component snapshot line.
pub fn component_line(snapshot: &ComponentSnapshot) {
    println!(
        "  {:<24} health {:>8}  confidence {:>5}  members {}",
        snapshot.name,
        health_label(snapshot.health),
        snapshot.confidence,
        snapshot.members.len()
    );
}

/// Print a test/rule/action event as it arrives.
pub fn event_line(kind: &str, name: &str, instance: Option<&str>, result: DiagResult) {
    let target = match instance {
        Some(instance) => format!("{}[{}]", name, instance),
        None => name.to_string(),
    };
    println!(
        "  {:<6} {:<32} {}",
        kind.dimmed(),
        target,
        result_label(result)
    );
}
