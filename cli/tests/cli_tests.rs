use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    file.write_all(contents.as_bytes()).expect("write config");
    file
}

#[test]
fn test_help_lists_subcommands() {
    Command::cargo_bin("vigil")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("check"));
}

#[test]
fn test_check_accepts_valid_batch() {
    let config = write_config(
        r#"{
            "comp": {"name": "Power"},
            "test": {"name": "fan", "polled": false, "comp": "Power"},
            "rule": {"name": "fan-bad", "input": "fan",
                     "severity": "SWDIAG_SEVERITY_HIGH", "comp": "Power"},
            "ready": ["fan"]
        }"#,
    );

    Command::cargo_bin("vigil")
        .unwrap()
        .arg("--no-color")
        .arg("check")
        .arg(config.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("ok"));
}

#[test]
fn test_check_reports_dropped_commands() {
    let config = write_config(r#"{"test": {"name": "t", "unknown_attr": true}}"#);

    Command::cargo_bin("vigil")
        .unwrap()
        .arg("--no-color")
        .arg("check")
        .arg(config.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("dropped"));
}

#[test]
fn test_check_missing_file_fails() {
    Command::cargo_bin("vigil")
        .unwrap()
        .arg("check")
        .arg("no-such-config.json")
        .assert()
        .failure()
        .stderr(predicate::str::contains("File not found"));
}

#[test]
fn test_run_bounded_duration() {
    let config = write_config(
        r#"{
            "comp": {"name": "Net"},
            "test": {"name": "link", "polled": false, "comp": "Net"},
            "ready": ["link"]
        }"#,
    );

    Command::cargo_bin("vigil")
        .unwrap()
        .arg("--no-color")
        .arg("run")
        .arg("--config")
        .arg(config.path())
        .arg("--duration")
        .arg("1")
        .assert()
        .success()
        .stdout(predicate::str::contains("Final state"))
        .stdout(predicate::str::contains("Net"));
}
